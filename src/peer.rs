//! Peer wire protocol (BEP-3) with the Merkle HASHPIECE extension.
//!
//! Types shared by the download and upload engines: the have-set
//! [`Bitfield`], the [`Chunk`] triple that REQUEST/PIECE/CANCEL address,
//! peer identities and the framed [`Message`] codec.

mod bitfield;
mod chunk;
mod error;
mod message;
mod outbound;
mod peer_id;

pub use bitfield::Bitfield;
pub use chunk::{chunk_lengths, Chunk, ConnId};
pub use error::PeerError;
pub use message::{Message, MessageId};
pub use outbound::Outbound;
pub use peer_id::PeerId;
