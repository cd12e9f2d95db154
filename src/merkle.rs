//! Merkle-hash piece verification.
//!
//! Only the root hash of a torrent is known up front. Every piece travels
//! with its *uncle list*: the piece's own leaf hash followed by the sibling
//! hash at every level up to the root. A downloader holding just the
//! [`MerkleRoot`] can verify any piece in isolation.
//!
//! The tree is stored as a binary heap: node `i` has children `2i + 1` and
//! `2i + 2`, the root sits at index 0 and the leaves occupy the last
//! `leaf_count` slots. Leaves past the real piece count hold the zero digest.
//!
//! ```
//! use swarmcast::merkle::MerkleTree;
//!
//! let data = vec![7u8; 1000];
//! let tree = MerkleTree::from_data(&data, 256).unwrap();
//! let uncles = tree.uncles_for(2).unwrap();
//! assert!(tree.verifier().verify(2, &data[512..768], &uncles).is_ok());
//! ```

mod error;
mod tree;
mod uncles;

pub use error::MerkleError;
pub use tree::{hash_piece, MerkleRoot, MerkleTree};
pub use uncles::UncleList;

/// SHA-1 digest, the hash function of the tree.
pub type Hash = [u8; 20];

/// Digest stored in padded leaves.
pub const ZERO_HASH: Hash = [0u8; 20];

#[cfg(test)]
mod tests;
