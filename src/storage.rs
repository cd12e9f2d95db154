//! Piece storage and piece selection.
//!
//! The engine talks to storage through two capabilities:
//!
//! - [`PieceStore`] - chunk reservation, arrival and integrity checking
//! - [`PiecePicker`] - which piece to start next and availability bookkeeping
//!
//! Both are called synchronously from the engine's executor. Real hosts back
//! them with disk I/O; [`MemoryPieceStore`] and [`RarestFirstPicker`] keep
//! everything in memory and serve as the reference implementations.
//!
//! # Examples
//!
//! ```
//! use std::net::{IpAddr, Ipv4Addr};
//! use swarmcast::peer::ConnId;
//! use swarmcast::storage::{ChunkOutcome, ChunkSource, MemoryPieceStore, PieceStore};
//!
//! let data = vec![1u8; 64];
//! let mut seed = MemoryPieceStore::seeded(&data, 32, 32).unwrap();
//! let mut leech = MemoryPieceStore::merkle(seed.merkle_root().unwrap(), 32).unwrap();
//!
//! let chunk = leech.new_request(1).unwrap();
//! let payload = seed.read(&chunk).unwrap();
//! let uncles = seed.uncles_for(1);
//! let source = ChunkSource::new(ConnId(1), IpAddr::V4(Ipv4Addr::LOCALHOST));
//! let outcome = leech
//!     .piece_came_in(&chunk, uncles.as_ref(), &payload, source)
//!     .unwrap();
//! assert!(matches!(outcome, ChunkOutcome::Complete { .. }));
//! assert!(leech.do_i_have(1));
//! ```

mod error;
mod memory;
mod picker;

pub use error::StorageError;
pub use memory::{Integrity, MemoryPieceStore};
pub use picker::RarestFirstPicker;

use std::net::IpAddr;

use bytes::Bytes;

use crate::merkle::UncleList;
use crate::peer::{Bitfield, Chunk, ConnId};

/// The connection (and its IP) that delivered a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkSource {
    pub conn: ConnId,
    pub ip: IpAddr,
}

impl ChunkSource {
    pub fn new(conn: ConnId, ip: IpAddr) -> Self {
        Self { conn, ip }
    }
}

/// Result of handing one chunk to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Stored; the piece still has missing chunks.
    Partial,
    /// The chunk was already held (endgame duplicate); nothing was written.
    Duplicate,
    /// The piece is complete and passed its integrity check.
    Complete { sources: Vec<ChunkSource> },
    /// The piece is complete but failed its integrity check. Every chunk of
    /// it is unreserved again.
    Flunked { sources: Vec<ChunkSource> },
}

impl ChunkOutcome {
    /// False only when the piece flunked.
    pub fn is_ok(&self) -> bool {
        !matches!(self, ChunkOutcome::Flunked { .. })
    }
}

/// Chunk-level view of a torrent's data.
pub trait PieceStore: Send {
    /// Reserves the next unrequested chunk of `piece`.
    fn new_request(&mut self, piece: u32) -> Option<Chunk>;

    /// Returns a reservation made by [`new_request`](Self::new_request).
    fn request_lost(&mut self, chunk: &Chunk);

    /// Stores an arriving chunk and, if it completes the piece, checks it.
    fn piece_came_in(
        &mut self,
        chunk: &Chunk,
        uncles: Option<&UncleList>,
        data: &[u8],
        source: ChunkSource,
    ) -> Result<ChunkOutcome, StorageError>;

    fn do_i_have(&self, piece: u32) -> bool;

    /// True while `piece` is missing and has chunks nobody reserved yet.
    fn do_i_have_requests(&self, piece: u32) -> bool;

    /// True once every missing chunk is reserved by someone.
    fn is_endgame(&self) -> bool;

    /// Hands the endgame request set back so normal reservation resumes.
    fn reset_endgame(&mut self, requests: &[Chunk]);

    /// Reservations currently outstanding.
    fn outstanding(&self) -> usize;

    /// Our have-set.
    fn have(&self) -> &Bitfield;

    fn piece_count(&self) -> usize {
        self.have().len()
    }

    /// Nominal piece length; the last piece may be shorter.
    fn piece_length(&self) -> u64;

    fn total_length(&self) -> u64;

    /// Length of `piece`, accounting for a short last piece.
    fn piece_size(&self, piece: u32) -> u64 {
        let start = u64::from(piece) * self.piece_length();
        self.total_length()
            .saturating_sub(start)
            .min(self.piece_length())
    }

    /// Chunk size used for reservations.
    fn request_size(&self) -> u32;

    /// Pieces partially held or partially reserved.
    fn dirty(&self) -> Vec<u32>;

    fn read(&mut self, chunk: &Chunk) -> Result<Bytes, StorageError>;

    fn read_piece(&mut self, piece: u32) -> Result<Bytes, StorageError>;

    /// Uncle list to attach when serving `piece`, if the torrent is Merkle.
    fn uncles_for(&self, piece: u32) -> Option<UncleList>;

    fn amount_left(&self) -> u64;
}

/// Piece selection and availability bookkeeping.
pub trait PiecePicker: Send {
    /// Picks the next piece to start from a peer with `have`.
    ///
    /// `has_requests` tells whether a piece still has unreserved chunks.
    /// With `too_many_partials` set, only already started pieces qualify.
    fn next(
        &mut self,
        have: &Bitfield,
        has_requests: &dyn Fn(u32) -> bool,
        peer: ConnId,
        too_many_partials: bool,
    ) -> Option<u32>;

    fn got_have(&mut self, piece: u32);

    fn lost_have(&mut self, piece: u32);

    fn got_seed(&mut self);

    fn lost_seed(&mut self);

    /// A peer's have-set just became complete: its per-piece counts turn
    /// into one seed.
    fn became_seed(&mut self, have: &Bitfield) {
        for piece in have.iter() {
            self.lost_have(piece as u32);
        }
        self.got_seed();
    }

    fn complete(&mut self, piece: u32);

    fn requested(&mut self, piece: u32);

    /// Moves `piece` to the back of the queue after it flunked.
    fn bump(&mut self, piece: u32);

    fn am_i_complete(&self) -> bool;

    fn is_blocked(&self, piece: u32) -> bool;
}

#[cfg(test)]
mod tests;
