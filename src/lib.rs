//! swarmcast - a BitTorrent peer engine with Merkle piece verification and
//! an epidemic preference-exchange overlay.
//!
//! The engines are sans-IO: they take decoded messages and the current time
//! and queue the wire actions a host should carry out. [`runtime`] drives
//! them on tokio.
//!
//! # Modules
//!
//! - [`bencode`] - Bencode encoding/decoding
//! - [`merkle`] - Merkle hash trees and uncle-list verification
//! - [`peer`] - Peer wire protocol with the HASHPIECE extension
//! - [`storage`] - Piece store and piece picker capabilities
//! - [`download`] - Request pipelining, endgame, snubbing and bad-data policy
//! - [`upload`] - Serving requests and super-seeding
//! - [`swarm`] - Per-torrent host tying downloads, uploads and choking together
//! - [`gossip`] - Gossip-cast preference exchange between overlay peers
//! - [`runtime`] - tokio driver for the above

pub mod bencode;
pub mod config;
pub mod constants;
pub mod download;
pub mod gossip;
pub mod merkle;
pub mod peer;
pub mod rate;
pub mod runtime;
pub mod storage;
pub mod swarm;
pub mod upload;

pub use bencode::{decode, encode, BencodeError, Value};
pub use config::{DownloadConfig, GossipConfig, UploadConfig};
pub use download::{DownloadCoordinator, HelperMode, PeerDownloader};
pub use gossip::{CastMessage, GossipEngine, GossipError, MemoryOverlayStore, OverlayStore, PermId};
pub use merkle::{MerkleError, MerkleRoot, MerkleTree, UncleList};
pub use peer::{Bitfield, Chunk, ConnId, Message, Outbound, PeerError, PeerId};
pub use rate::{RateMeter, TokenBucket};
pub use runtime::{Engine, EngineEvent, EngineHandle, RuntimeError};
pub use storage::{MemoryPieceStore, PiecePicker, PieceStore, RarestFirstPicker, StorageError};
pub use swarm::{Swarm, SwarmError};
pub use upload::{PeerUploader, SuperSeeder};
