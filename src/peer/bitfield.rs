use bytes::Bytes;

use super::error::PeerError;

/// A fixed-length have-set, one bit per piece.
///
/// Bits are numbered from the high bit of the first byte, as on the wire.
/// Spare bits in the last byte are always zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitfield {
    bits: Vec<u8>,
    len: usize,
}

impl Bitfield {
    /// Creates an empty bitfield of `len` pieces.
    pub fn new(len: usize) -> Self {
        Self {
            bits: vec![0; len.div_ceil(8)],
            len,
        }
    }

    /// Creates a bitfield with every piece set.
    pub fn full(len: usize) -> Self {
        let mut bf = Self {
            bits: vec![0xFF; len.div_ceil(8)],
            len,
        };
        bf.clear_spare_bits();
        bf
    }

    /// Parses the wire form of a `len`-piece bitfield.
    ///
    /// Fails with [`PeerError::BadLength`] if `buf` is shorter than
    /// `ceil(len / 8)`; surplus bytes and spare bits are dropped.
    pub fn from_bytes(buf: &[u8], len: usize) -> Result<Self, PeerError> {
        let expected = len.div_ceil(8);
        if buf.len() < expected {
            return Err(PeerError::BadLength {
                expected,
                actual: buf.len(),
            });
        }

        let mut bf = Self {
            bits: buf[..expected].to_vec(),
            len,
        };
        bf.clear_spare_bits();
        Ok(bf)
    }

    /// Wire form: big-endian bit order, zero padding.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.bits)
    }

    pub fn get(&self, index: usize) -> bool {
        if index >= self.len {
            return false;
        }
        self.bits[index / 8] & mask(index) != 0
    }

    pub fn set(&mut self, index: usize) {
        if index < self.len {
            self.bits[index / 8] |= mask(index);
        }
    }

    pub fn clear(&mut self, index: usize) {
        if index < self.len {
            self.bits[index / 8] &= !mask(index);
        }
    }

    /// Number of set bits.
    pub fn count(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// True when every piece is set; trivially true for a zero-length field.
    pub fn complete(&self) -> bool {
        self.count() == self.len
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|&b| b == 0)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Indices of the set bits, ascending.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).filter(move |&i| self.get(i))
    }

    fn clear_spare_bits(&mut self) {
        let spare = self.bits.len() * 8 - self.len;
        if spare > 0 {
            if let Some(last) = self.bits.last_mut() {
                *last &= 0xFFu8 << spare;
            }
        }
    }
}

fn mask(index: usize) -> u8 {
    0x80 >> (index % 8)
}
