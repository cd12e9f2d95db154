use bytes::Bytes;

use super::error::MerkleError;
use super::Hash;
use crate::bencode::{self, Value};

/// The verification chain of one piece: `(tree_index, hash)` pairs, the
/// leaf first, then the sibling at each level toward the root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UncleList {
    entries: Vec<(u32, Hash)>,
}

impl UncleList {
    pub fn new(entries: Vec<(u32, Hash)>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[(u32, Hash)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bencoded wire form: `[[index, hash], ...]`.
    pub fn to_bencode(&self) -> Vec<u8> {
        let list = self
            .entries
            .iter()
            .map(|(index, hash)| {
                Value::List(vec![
                    Value::Integer(i64::from(*index)),
                    Value::Bytes(Bytes::copy_from_slice(hash)),
                ])
            })
            .collect();
        // Integer and byte-string writes into a Vec cannot fail.
        bencode::encode(&Value::List(list)).unwrap_or_default()
    }

    pub fn from_bencode(data: &[u8]) -> Result<Self, MerkleError> {
        let value = bencode::decode(data)?;
        let items = value
            .as_list()
            .ok_or_else(|| MerkleError::Malformed("not a list".into()))?;

        let entries = items
            .iter()
            .map(|item| {
                let pair = item
                    .as_list()
                    .filter(|pair| pair.len() == 2)
                    .ok_or_else(|| MerkleError::Malformed("entry is not a pair".into()))?;
                let index = pair[0]
                    .as_integer()
                    .and_then(|i| u32::try_from(i).ok())
                    .ok_or_else(|| MerkleError::Malformed("bad tree index".into()))?;
                let hash = pair[1]
                    .as_bytes()
                    .and_then(|b| Hash::try_from(b.as_ref()).ok())
                    .ok_or_else(|| MerkleError::Malformed("bad hash".into()))?;
                Ok((index, hash))
            })
            .collect::<Result<Vec<_>, MerkleError>>()?;

        Ok(Self { entries })
    }
}
