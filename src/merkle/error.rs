use thiserror::Error;

#[derive(Debug, Error)]
pub enum MerkleError {
    #[error("uncle list has {actual} entries, expected {expected}")]
    BadUncleListLength { expected: usize, actual: usize },

    #[error("uncle list entry {position} has tree index {actual}, expected {expected}")]
    SiblingIndexMismatch {
        position: usize,
        expected: u32,
        actual: u32,
    },

    #[error("leaf hash in uncle list does not match piece data")]
    LeafMismatch,

    #[error("computed root does not match known root")]
    RootMismatch,

    #[error("invalid piece index: {0}")]
    InvalidPieceIndex(u32),

    #[error("invalid piece length {piece_length} for total length {total_length}")]
    InvalidPieceLength { piece_length: u64, total_length: u64 },

    #[error("{actual} piece hashes given, torrent has {expected} pieces")]
    PieceCountMismatch { expected: usize, actual: usize },

    #[error("malformed uncle list: {0}")]
    Malformed(String),

    #[error("bencode error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),
}
