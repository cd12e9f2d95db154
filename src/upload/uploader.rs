use std::collections::{HashSet, VecDeque};
use std::time::Instant;

use bytes::Bytes;
use tracing::trace;

use crate::config::UploadConfig;
use crate::peer::{Chunk, ConnId, Message, PeerError};
use crate::rate::RateMeter;
use crate::storage::{PieceStore, StorageError};

/// Upload-side state of one peer connection.
#[derive(Debug)]
pub struct PeerUploader {
    conn: ConnId,
    max_slice_length: u32,
    buffer_reads: bool,
    choked: bool,
    /// Set by a choke; requests that arrive afterwards are dropped.
    cleared: bool,
    interested: bool,
    was_ever_interested: bool,
    super_seeding: bool,
    revealed: HashSet<u32>,
    buffer: VecDeque<Chunk>,
    cached_piece: Option<(u32, Bytes)>,
    rate: RateMeter,
}

impl PeerUploader {
    /// Super-seeding only applies when we hold the whole torrent.
    pub fn new(conn: ConnId, config: &UploadConfig, store: &dyn PieceStore, now: Instant) -> Self {
        Self {
            conn,
            max_slice_length: config.max_slice_length,
            buffer_reads: config.buffer_reads,
            choked: true,
            cleared: true,
            interested: false,
            was_ever_interested: false,
            super_seeding: config.super_seed && store.amount_left() == 0,
            revealed: HashSet::new(),
            buffer: VecDeque::new(),
            cached_piece: None,
            rate: RateMeter::new_at(config.max_rate_period, now),
        }
    }

    /// The BITFIELD to open the connection with, if any.
    pub fn greeting(&self, store: &dyn PieceStore) -> Option<Message> {
        if self.super_seeding || store.have().count() == 0 {
            return None;
        }
        Some(Message::Bitfield(store.have().to_bytes()))
    }

    pub fn conn(&self) -> ConnId {
        self.conn
    }

    pub fn is_choked(&self) -> bool {
        self.choked
    }

    pub fn is_interested(&self) -> bool {
        self.interested
    }

    pub fn was_ever_interested(&self) -> bool {
        self.was_ever_interested
    }

    pub fn is_super_seeding(&self) -> bool {
        self.super_seeding
    }

    /// Pieces revealed to this peer while super-seeding.
    pub fn revealed(&self) -> &HashSet<u32> {
        &self.revealed
    }

    /// True when unchoked with requests waiting.
    pub fn has_queries(&self) -> bool {
        !self.choked && !self.buffer.is_empty()
    }

    pub fn queued(&self) -> usize {
        self.buffer.len()
    }

    /// Length of the chunk [`next_chunk`](Self::next_chunk) would serve.
    pub fn next_len(&self) -> Option<u32> {
        if self.choked {
            return None;
        }
        self.buffer.front().map(|c| c.length)
    }

    pub fn upload_rate(&mut self, now: Instant) -> f64 {
        self.rate.rate_at(now)
    }

    pub fn uploaded(&self) -> u64 {
        self.rate.total()
    }

    /// Queues a REQUEST. An error means the connection must be closed.
    pub fn on_request(&mut self, chunk: Chunk) -> Result<(), PeerError> {
        if self.super_seeding && !self.revealed.contains(&chunk.piece) {
            return Err(PeerError::Protocol(format!(
                "request for unrevealed piece {}",
                chunk.piece
            )));
        }
        if !self.interested {
            return Err(PeerError::Protocol("request while not interested".into()));
        }
        if chunk.length > self.max_slice_length {
            return Err(PeerError::Protocol(format!(
                "request of {} bytes exceeds {}",
                chunk.length, self.max_slice_length
            )));
        }
        if !self.cleared {
            self.buffer.push_back(chunk);
        }
        Ok(())
    }

    pub fn on_cancel(&mut self, chunk: &Chunk) {
        self.buffer.retain(|c| c != chunk);
    }

    pub fn on_interested(&mut self) {
        self.interested = true;
        self.was_ever_interested = true;
    }

    pub fn on_not_interested(&mut self) {
        if self.interested {
            self.interested = false;
            self.buffer.clear();
            self.cached_piece = None;
        }
    }

    /// Chokes the peer, returning the CHOKE to send on a state change.
    /// Queued requests are dropped either way.
    pub fn choke(&mut self) -> Option<Message> {
        let message = if self.choked {
            None
        } else {
            self.choked = true;
            Some(Message::Choke)
        };
        self.cleared = true;
        self.buffer.clear();
        self.cached_piece = None;
        message
    }

    pub fn unchoke(&mut self) -> Option<Message> {
        if !self.choked {
            return None;
        }
        self.choked = false;
        self.cleared = false;
        Some(Message::Unchoke)
    }

    /// Reveals `piece` to a super-seeded peer.
    pub fn reveal(&mut self, piece: u32) -> Message {
        self.revealed.insert(piece);
        Message::Have { piece }
    }

    /// Pops the next request and builds its PIECE (HASHPIECE for the first
    /// chunk of a Merkle piece). Read errors mean the connection must close.
    pub fn next_chunk(
        &mut self,
        store: &mut dyn PieceStore,
        now: Instant,
    ) -> Result<Option<Message>, StorageError> {
        if self.choked {
            return Ok(None);
        }
        let Some(chunk) = self.buffer.pop_front() else {
            return Ok(None);
        };

        let data = if self.buffer_reads {
            self.read_cached(store, &chunk)?
        } else {
            self.cached_piece = None;
            store.read(&chunk)?
        };

        self.rate.update_at(data.len() as u64, now);
        trace!(conn = %self.conn, piece = chunk.piece, offset = chunk.offset, "serving chunk");

        let uncles = if chunk.offset == 0 {
            store.uncles_for(chunk.piece)
        } else {
            None
        };
        Ok(Some(match uncles {
            Some(uncles) => Message::HashPiece {
                piece: chunk.piece,
                offset: chunk.offset,
                uncles,
                data,
            },
            None => Message::Piece {
                piece: chunk.piece,
                offset: chunk.offset,
                data,
            },
        }))
    }

    fn read_cached(&mut self, store: &mut dyn PieceStore, chunk: &Chunk) -> Result<Bytes, StorageError> {
        let piece = match &self.cached_piece {
            Some((index, piece)) if *index == chunk.piece => piece.clone(),
            _ => {
                self.cached_piece = None;
                let piece = store.read_piece(chunk.piece)?;
                self.cached_piece = Some((chunk.piece, piece.clone()));
                piece
            }
        };

        let start = chunk.offset as usize;
        let end = start + chunk.length as usize;
        if end > piece.len() {
            return Err(StorageError::InvalidChunk {
                piece: chunk.piece,
                offset: chunk.offset,
                length: chunk.length,
            });
        }
        Ok(piece.slice(start..end))
    }

    /// Releases the cached piece.
    pub fn disconnected(&mut self) {
        self.cached_piece = None;
        self.buffer.clear();
    }
}
