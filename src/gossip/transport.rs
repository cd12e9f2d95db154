use std::net::SocketAddr;

use bytes::Bytes;

use super::message::PermId;

/// Overlay connections, as the engine sees them.
///
/// Calls return immediately; their outcomes come back later as
/// [`TransportEvent`]s fed to [`GossipEngine::handle_event`](super::GossipEngine::handle_event).
pub trait OverlayTransport: Send {
    fn connect(&mut self, peer: &PermId);

    fn send(&mut self, peer: &PermId, payload: Bytes);

    fn close(&mut self, peer: &PermId);
}

/// Completions and inbound traffic from the overlay transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A connection is up. `initiated` is true when we dialled.
    Connected {
        peer: PermId,
        version: u32,
        address: SocketAddr,
        initiated: bool,
    },
    ConnectFailed {
        peer: PermId,
        reason: String,
    },
    Sent {
        peer: PermId,
    },
    SendFailed {
        peer: PermId,
        reason: String,
    },
    Received {
        peer: PermId,
        version: u32,
        payload: Bytes,
    },
    Disconnected {
        peer: PermId,
    },
}
