use sha1::{Digest, Sha1};

use super::error::MerkleError;
use super::uncles::UncleList;
use super::{Hash, ZERO_HASH};

/// A full hash tree over a torrent's pieces, held by seeders.
///
/// Immutable once built.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    piece_length: u64,
    total_length: u64,
    piece_count: usize,
    hashes: Vec<Hash>,
}

impl MerkleTree {
    /// Builds the tree from per-piece leaf hashes.
    ///
    /// Fails when the piece geometry is invalid or `piece_hashes` doesn't
    /// hold exactly one hash per piece.
    pub fn build(
        piece_hashes: &[Hash],
        piece_length: u64,
        total_length: u64,
    ) -> Result<Self, MerkleError> {
        let piece_count = piece_count(piece_length, total_length)?;
        if piece_hashes.len() != piece_count {
            return Err(MerkleError::PieceCountMismatch {
                expected: piece_count,
                actual: piece_hashes.len(),
            });
        }

        let leaf_count = piece_count.next_power_of_two();
        let first_leaf = leaf_count - 1;
        let mut hashes = vec![ZERO_HASH; 2 * leaf_count - 1];
        hashes[first_leaf..first_leaf + piece_count].copy_from_slice(piece_hashes);

        for i in (0..first_leaf).rev() {
            hashes[i] = hash_pair(&hashes[2 * i + 1], &hashes[2 * i + 2]);
        }

        Ok(Self {
            piece_length,
            total_length,
            piece_count,
            hashes,
        })
    }

    /// Hashes `data` piece by piece and builds the tree over it.
    pub fn from_data(data: &[u8], piece_length: u64) -> Result<Self, MerkleError> {
        let step = usize::try_from(piece_length)
            .ok()
            .filter(|&s| s > 0)
            .ok_or(MerkleError::InvalidPieceLength {
                piece_length,
                total_length: data.len() as u64,
            })?;
        let leaves: Vec<Hash> = data.chunks(step).map(hash_piece).collect();
        Self::build(&leaves, piece_length, data.len() as u64)
    }

    pub fn root(&self) -> Hash {
        self.hashes[0]
    }

    /// Every node, heap-ordered; `hashes()[0]` is the root.
    pub fn hashes(&self) -> &[Hash] {
        &self.hashes
    }

    pub fn piece_count(&self) -> usize {
        self.piece_count
    }

    pub fn leaf_count(&self) -> usize {
        self.hashes.len().div_ceil(2)
    }

    /// Root-only view of this tree, as a downloader would hold it.
    pub fn verifier(&self) -> MerkleRoot {
        MerkleRoot {
            root: self.root(),
            piece_length: self.piece_length,
            total_length: self.total_length,
            piece_count: self.piece_count,
        }
    }

    /// The leaf of `piece`, then the sibling at each level up to the root.
    pub fn uncles_for(&self, piece: u32) -> Result<UncleList, MerkleError> {
        if piece as usize >= self.piece_count {
            return Err(MerkleError::InvalidPieceIndex(piece));
        }

        let mut index = self.leaf_count() - 1 + piece as usize;
        let mut entries = vec![(index as u32, self.hashes[index])];
        while index > 0 {
            let sibling = sibling_of(index);
            entries.push((sibling as u32, self.hashes[sibling]));
            index = (index - 1) / 2;
        }

        Ok(UncleList::new(entries))
    }

    pub fn verify(&self, piece: u32, data: &[u8], uncles: &UncleList) -> Result<(), MerkleError> {
        self.verifier().verify(piece, data, uncles)
    }
}

/// What a downloader knows a priori: the root hash and the torrent geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MerkleRoot {
    root: Hash,
    piece_length: u64,
    total_length: u64,
    piece_count: usize,
}

impl MerkleRoot {
    pub fn new(root: Hash, piece_length: u64, total_length: u64) -> Result<Self, MerkleError> {
        Ok(Self {
            root,
            piece_length,
            total_length,
            piece_count: piece_count(piece_length, total_length)?,
        })
    }

    pub fn root(&self) -> &Hash {
        &self.root
    }

    pub fn piece_count(&self) -> usize {
        self.piece_count
    }

    pub fn piece_length(&self) -> u64 {
        self.piece_length
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    /// Number of sibling levels between a leaf and the root.
    pub fn height(&self) -> usize {
        self.piece_count.next_power_of_two().trailing_zeros() as usize
    }

    /// Checks `data` as piece `piece` against the known root.
    ///
    /// The uncle list must hold `height() + 1` entries. Each sibling index is
    /// checked against the path implied by the piece index, so a list for a
    /// different piece fails even if its hashes chain to the right root.
    pub fn verify(&self, piece: u32, data: &[u8], uncles: &UncleList) -> Result<(), MerkleError> {
        if piece as usize >= self.piece_count {
            return Err(MerkleError::InvalidPieceIndex(piece));
        }

        let expected = self.height() + 1;
        let entries = uncles.entries();
        if entries.len() != expected {
            return Err(MerkleError::BadUncleListLength {
                expected,
                actual: entries.len(),
            });
        }

        let mut index = self.piece_count.next_power_of_two() - 1 + piece as usize;
        let (leaf_index, leaf_hash) = entries[0];
        if leaf_index as usize != index {
            return Err(MerkleError::SiblingIndexMismatch {
                position: 0,
                expected: index as u32,
                actual: leaf_index,
            });
        }

        let mut hash = hash_piece(data);
        if hash != leaf_hash {
            return Err(MerkleError::LeafMismatch);
        }

        for (position, &(sibling_index, sibling_hash)) in entries.iter().enumerate().skip(1) {
            let sibling = sibling_of(index);
            if sibling_index as usize != sibling {
                return Err(MerkleError::SiblingIndexMismatch {
                    position,
                    expected: sibling as u32,
                    actual: sibling_index,
                });
            }
            hash = if index < sibling {
                hash_pair(&hash, &sibling_hash)
            } else {
                hash_pair(&sibling_hash, &hash)
            };
            index = (index - 1) / 2;
        }

        if hash != self.root {
            return Err(MerkleError::RootMismatch);
        }
        Ok(())
    }

    pub fn is_valid(&self, piece: u32, data: &[u8], uncles: &UncleList) -> bool {
        self.verify(piece, data, uncles).is_ok()
    }
}

fn piece_count(piece_length: u64, total_length: u64) -> Result<usize, MerkleError> {
    if piece_length == 0 || total_length == 0 {
        return Err(MerkleError::InvalidPieceLength {
            piece_length,
            total_length,
        });
    }
    usize::try_from(total_length.div_ceil(piece_length)).map_err(|_| {
        MerkleError::InvalidPieceLength {
            piece_length,
            total_length,
        }
    })
}

/// Left children sit at odd heap indices, right children at even ones.
fn sibling_of(index: usize) -> usize {
    if index % 2 == 1 {
        index + 1
    } else {
        index - 1
    }
}

fn hash_pair(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Sha1::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Leaf hash of one piece's bytes.
pub fn hash_piece(data: &[u8]) -> Hash {
    Sha1::digest(data).into()
}
