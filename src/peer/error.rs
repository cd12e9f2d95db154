use thiserror::Error;

/// Errors raised while decoding or validating peer wire traffic.
///
/// Every variant is a protocol violation from the host's point of view: the
/// offending connection is closed and nothing propagates further.
#[derive(Debug, Error)]
pub enum PeerError {
    /// Received a malformed protocol message.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// A bitfield shorter than the torrent's piece count.
    #[error("bitfield has {actual} bytes, expected {expected}")]
    BadLength { expected: usize, actual: usize },

    /// The peer sent something it is not allowed to at this point.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The HASHPIECE uncle list could not be decoded.
    #[error("uncle list: {0}")]
    Merkle(#[from] crate::merkle::MerkleError),
}
