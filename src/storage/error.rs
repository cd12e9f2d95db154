use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid piece index: {0}")]
    InvalidPieceIndex(u32),

    #[error("invalid chunk: piece {piece}, offset {offset}, length {length}")]
    InvalidChunk { piece: u32, offset: u32, length: u32 },

    #[error("piece {0} is not available")]
    NotAvailable(u32),

    #[error("{piece_count} piece hashes do not cover {total_length} bytes")]
    Geometry { piece_count: usize, total_length: u64 },

    #[error("integrity: {0}")]
    Integrity(#[from] crate::merkle::MerkleError),
}
