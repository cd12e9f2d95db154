use std::net::IpAddr;

use thiserror::Error;

use crate::peer::{ConnId, PeerError};

#[derive(Debug, Error)]
pub enum SwarmError {
    #[error("address banned: {0}")]
    Banned(IpAddr),

    #[error("unknown connection: {0}")]
    UnknownConnection(ConnId),

    #[error("peer error: {0}")]
    Peer(#[from] PeerError),
}
