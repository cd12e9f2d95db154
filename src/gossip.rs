//! Gossip-cast overlay.
//!
//! Peers periodically exchange casts: their recent download preferences
//! plus a sample of peers they are connected to. Similarity between
//! preference sets steers who we cast to next, so peers with overlapping
//! taste find each other. The engine is sans-IO: connections are made
//! through an [`OverlayTransport`] and persistent state lives behind an
//! [`OverlayStore`].

mod block_list;
mod connections;
mod engine;
mod error;
mod message;
mod similarity;
mod store;
mod transport;

pub use block_list::BlockList;
pub use connections::{Candidates, ConnectedPeer, ConnectionLists, PeerList};
pub use engine::GossipEngine;
pub use error::GossipError;
pub use message::{
    CastMessage, CastStats, ClickLog, InfoHash, OverlayFrame, PeerEntry, PermId, Preference,
};
pub use similarity::{is_direct, relative_similarity, similarity};
pub use store::{
    MemoryOverlayStore, OverlayStats, OverlayStore, PeerRecord, PeerUpdate, SimilarityUpdate,
    StoreBatch,
};
pub use transport::{OverlayTransport, TransportEvent};
