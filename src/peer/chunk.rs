/// Stable handle of one peer connection.
///
/// Downloaders, uploaders and guards refer to each other through this id and
/// re-resolve through their owner; nothing holds a pointer across events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u64);

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// A byte range within a piece: the unit of REQUEST, PIECE and CANCEL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Chunk {
    pub piece: u32,
    pub offset: u32,
    pub length: u32,
}

impl Chunk {
    pub fn new(piece: u32, offset: u32, length: u32) -> Self {
        Self {
            piece,
            offset,
            length,
        }
    }

    /// Byte just past the end of the chunk, relative to the piece start.
    pub fn end(&self) -> u64 {
        u64::from(self.offset) + u64::from(self.length)
    }

    /// Checks `offset + length <= piece_length` and a non-empty range.
    pub fn fits(&self, piece_length: u64) -> bool {
        self.length > 0 && self.end() <= piece_length
    }
}

/// Splits a piece into chunk lengths of at most `chunk_size`.
pub fn chunk_lengths(piece_length: u64, chunk_size: u32) -> impl Iterator<Item = (u32, u32)> {
    let chunk_size = u64::from(chunk_size.max(1));
    let count = piece_length.div_ceil(chunk_size);
    (0..count).map(move |i| {
        let offset = i * chunk_size;
        let length = (piece_length - offset).min(chunk_size);
        (offset as u32, length as u32)
    })
}
