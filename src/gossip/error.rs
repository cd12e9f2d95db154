use thiserror::Error;

use super::message::PermId;
use crate::bencode::BencodeError;

#[derive(Debug, Error)]
pub enum GossipError {
    #[error("peer {0} is blocked")]
    Blocked(PermId),

    #[error("cast of {actual} bytes exceeds limit of {limit}")]
    TooLarge { limit: usize, actual: usize },

    #[error("bad cast encoding: {0}")]
    BadEncoding(String),

    #[error("bencode error: {0}")]
    Bencode(#[from] BencodeError),

    #[error("unknown overlay peer {0}")]
    UnknownPeer(PermId),
}
