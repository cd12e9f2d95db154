use std::collections::{BTreeSet, HashMap, HashSet};

use bytes::Bytes;
use tracing::{debug, trace};

use super::{ChunkOutcome, ChunkSource, PieceStore, StorageError};
use crate::merkle::{hash_piece, Hash, MerkleRoot, MerkleTree, UncleList};
use crate::peer::{chunk_lengths, Bitfield, Chunk};

/// How completed pieces are checked.
#[derive(Debug, Clone)]
pub enum Integrity {
    /// Only the root is known; uncles arrive with the data.
    Merkle(MerkleRoot),
    /// One SHA-1 per piece, known up front.
    PieceHashes(Vec<Hash>),
}

#[derive(Debug, Default)]
struct PieceProgress {
    unrequested: BTreeSet<u32>,
    requested: HashSet<u32>,
    received: HashSet<u32>,
    chunk_count: usize,
    sources: Vec<ChunkSource>,
}

impl PieceProgress {
    fn new(piece_size: u64, request_size: u32) -> Self {
        let unrequested: BTreeSet<u32> = chunk_lengths(piece_size, request_size)
            .map(|(offset, _)| offset)
            .collect();
        Self {
            chunk_count: unrequested.len(),
            unrequested,
            ..Default::default()
        }
    }

    /// Partially held: some chunk arrived. Reservations alone don't count.
    fn is_dirty(&self) -> bool {
        !self.received.is_empty()
    }
}

/// A [`PieceStore`] holding the whole torrent in memory.
///
/// Pieces that have never been touched carry no bookkeeping; their chunk
/// tracking is created on the first reservation or arrival.
#[derive(Debug)]
pub struct MemoryPieceStore {
    integrity: Integrity,
    piece_length: u64,
    total_length: u64,
    request_size: u32,
    data: Vec<u8>,
    have: Bitfield,
    left: u64,
    progress: HashMap<u32, PieceProgress>,
    uncles: HashMap<u32, UncleList>,
    tree: Option<MerkleTree>,
}

impl MemoryPieceStore {
    /// An empty store for a torrent.
    ///
    /// Fails when the geometry is invalid or doesn't match the piece hashes.
    pub fn new(
        integrity: Integrity,
        piece_length: u64,
        total_length: u64,
        request_size: u32,
    ) -> Result<Self, StorageError> {
        let piece_count = match &integrity {
            Integrity::Merkle(root) => {
                if root.piece_length() != piece_length || root.total_length() != total_length {
                    return Err(StorageError::Geometry {
                        piece_count: root.piece_count(),
                        total_length,
                    });
                }
                root.piece_count()
            }
            Integrity::PieceHashes(hashes) => {
                let expected = if piece_length == 0 {
                    None
                } else {
                    usize::try_from(total_length.div_ceil(piece_length)).ok()
                };
                if expected != Some(hashes.len()) || total_length == 0 {
                    return Err(StorageError::Geometry {
                        piece_count: hashes.len(),
                        total_length,
                    });
                }
                hashes.len()
            }
        };
        let len = usize::try_from(total_length).map_err(|_| StorageError::Geometry {
            piece_count,
            total_length,
        })?;

        Ok(Self {
            integrity,
            piece_length,
            total_length,
            request_size: request_size.max(1),
            data: vec![0; len],
            have: Bitfield::new(piece_count),
            left: total_length,
            progress: HashMap::new(),
            uncles: HashMap::new(),
            tree: None,
        })
    }

    /// An empty store verifying pieces against a Merkle root.
    pub fn merkle(root: MerkleRoot, request_size: u32) -> Result<Self, StorageError> {
        Self::new(
            Integrity::Merkle(root),
            root.piece_length(),
            root.total_length(),
            request_size,
        )
    }

    /// A complete store for a seeder, serving uncles from the full tree.
    pub fn seeded(data: &[u8], piece_length: u64, request_size: u32) -> Result<Self, StorageError> {
        let tree = MerkleTree::from_data(data, piece_length)?;
        let mut store = Self::merkle(tree.verifier(), request_size)?;
        store.data.copy_from_slice(data);
        store.have = Bitfield::full(tree.piece_count());
        store.left = 0;
        store.tree = Some(tree);
        Ok(store)
    }

    pub fn merkle_root(&self) -> Option<MerkleRoot> {
        match &self.integrity {
            Integrity::Merkle(root) => Some(*root),
            Integrity::PieceHashes(_) => None,
        }
    }

    fn check_index(&self, piece: u32) -> Result<(), StorageError> {
        if (piece as usize) < self.have.len() {
            Ok(())
        } else {
            Err(StorageError::InvalidPieceIndex(piece))
        }
    }

    fn check_chunk(&self, chunk: &Chunk) -> Result<(), StorageError> {
        self.check_index(chunk.piece)?;
        if chunk.fits(self.piece_size(chunk.piece)) {
            Ok(())
        } else {
            Err(StorageError::InvalidChunk {
                piece: chunk.piece,
                offset: chunk.offset,
                length: chunk.length,
            })
        }
    }

    fn piece_start(&self, piece: u32) -> usize {
        (u64::from(piece) * self.piece_length) as usize
    }

    fn chunk_length(&self, piece: u32, offset: u32) -> u32 {
        let remaining = self.piece_size(piece).saturating_sub(u64::from(offset));
        remaining.min(u64::from(self.request_size)) as u32
    }

    fn verify(&self, piece: u32) -> bool {
        let start = self.piece_start(piece);
        let bytes = &self.data[start..start + self.piece_size(piece) as usize];
        match &self.integrity {
            Integrity::Merkle(root) => match self.uncles.get(&piece) {
                Some(uncles) => match root.verify(piece, bytes, uncles) {
                    Ok(()) => true,
                    Err(e) => {
                        debug!(piece, error = %e, "merkle verification failed");
                        false
                    }
                },
                None => {
                    debug!(piece, "piece completed without uncle hashes");
                    false
                }
            },
            Integrity::PieceHashes(hashes) => hash_piece(bytes) == hashes[piece as usize],
        }
    }
}

impl PieceStore for MemoryPieceStore {
    fn new_request(&mut self, piece: u32) -> Option<Chunk> {
        if self.check_index(piece).is_err() || self.have.get(piece as usize) {
            return None;
        }
        let size = self.piece_size(piece);
        let request_size = self.request_size;
        let progress = self
            .progress
            .entry(piece)
            .or_insert_with(|| PieceProgress::new(size, request_size));

        let offset = progress.unrequested.pop_first()?;
        progress.requested.insert(offset);
        Some(Chunk::new(piece, offset, self.chunk_length(piece, offset)))
    }

    fn request_lost(&mut self, chunk: &Chunk) {
        if self.have.get(chunk.piece as usize) {
            return;
        }
        if let Some(progress) = self.progress.get_mut(&chunk.piece) {
            if progress.requested.remove(&chunk.offset) && !progress.received.contains(&chunk.offset)
            {
                progress.unrequested.insert(chunk.offset);
            }
        }
    }

    fn piece_came_in(
        &mut self,
        chunk: &Chunk,
        uncles: Option<&UncleList>,
        data: &[u8],
        source: ChunkSource,
    ) -> Result<ChunkOutcome, StorageError> {
        self.check_chunk(chunk)?;
        let piece = chunk.piece;
        if data.len() != chunk.length as usize
            || chunk.offset % self.request_size != 0
            || chunk.length != self.chunk_length(piece, chunk.offset)
        {
            return Err(StorageError::InvalidChunk {
                piece,
                offset: chunk.offset,
                length: chunk.length,
            });
        }
        if self.have.get(piece as usize) {
            return Ok(ChunkOutcome::Duplicate);
        }

        let size = self.piece_size(piece);
        let request_size = self.request_size;
        let progress = self
            .progress
            .entry(piece)
            .or_insert_with(|| PieceProgress::new(size, request_size));
        if !progress.received.insert(chunk.offset) {
            return Ok(ChunkOutcome::Duplicate);
        }
        progress.requested.remove(&chunk.offset);
        progress.unrequested.remove(&chunk.offset);
        if !progress.sources.contains(&source) {
            progress.sources.push(source);
        }
        let finished = progress.received.len() == progress.chunk_count;

        let start = self.piece_start(piece) + chunk.offset as usize;
        self.data[start..start + data.len()].copy_from_slice(data);
        if let (Some(uncles), Integrity::Merkle(_)) = (uncles, &self.integrity) {
            self.uncles.insert(piece, uncles.clone());
        }
        trace!(piece, offset = chunk.offset, conn = %source.conn, "chunk stored");

        if !finished {
            return Ok(ChunkOutcome::Partial);
        }

        let valid = self.verify(piece);
        let sources = self
            .progress
            .remove(&piece)
            .map(|p| p.sources)
            .unwrap_or_default();
        if valid {
            self.have.set(piece as usize);
            self.left = self.left.saturating_sub(size);
            Ok(ChunkOutcome::Complete { sources })
        } else {
            self.uncles.remove(&piece);
            Ok(ChunkOutcome::Flunked { sources })
        }
    }

    fn do_i_have(&self, piece: u32) -> bool {
        self.have.get(piece as usize)
    }

    fn do_i_have_requests(&self, piece: u32) -> bool {
        if self.check_index(piece).is_err() || self.have.get(piece as usize) {
            return false;
        }
        self.progress
            .get(&piece)
            .is_none_or(|p| !p.unrequested.is_empty())
    }

    fn is_endgame(&self) -> bool {
        !self.have.complete()
            && (0..self.have.len() as u32)
                .filter(|&p| !self.have.get(p as usize))
                .all(|p| {
                    self.progress
                        .get(&p)
                        .is_some_and(|progress| progress.unrequested.is_empty())
                })
    }

    fn reset_endgame(&mut self, requests: &[Chunk]) {
        for chunk in requests {
            self.request_lost(chunk);
        }
    }

    fn outstanding(&self) -> usize {
        self.progress.values().map(|p| p.requested.len()).sum()
    }

    fn have(&self) -> &Bitfield {
        &self.have
    }

    fn piece_length(&self) -> u64 {
        self.piece_length
    }

    fn total_length(&self) -> u64 {
        self.total_length
    }

    fn request_size(&self) -> u32 {
        self.request_size
    }

    fn dirty(&self) -> Vec<u32> {
        let mut dirty: Vec<u32> = self
            .progress
            .iter()
            .filter(|(_, p)| p.is_dirty())
            .map(|(&piece, _)| piece)
            .collect();
        dirty.sort_unstable();
        dirty
    }

    fn read(&mut self, chunk: &Chunk) -> Result<Bytes, StorageError> {
        self.check_chunk(chunk)?;
        if !self.have.get(chunk.piece as usize) {
            return Err(StorageError::NotAvailable(chunk.piece));
        }
        let start = self.piece_start(chunk.piece) + chunk.offset as usize;
        Ok(Bytes::copy_from_slice(
            &self.data[start..start + chunk.length as usize],
        ))
    }

    fn read_piece(&mut self, piece: u32) -> Result<Bytes, StorageError> {
        self.check_index(piece)?;
        let size = self.piece_size(piece) as u32;
        self.read(&Chunk::new(piece, 0, size))
    }

    fn uncles_for(&self, piece: u32) -> Option<UncleList> {
        if let Some(tree) = &self.tree {
            return tree.uncles_for(piece).ok();
        }
        if self.have.get(piece as usize) {
            self.uncles.get(&piece).cloned()
        } else {
            None
        }
    }

    fn amount_left(&self) -> u64 {
        self.left
    }
}
