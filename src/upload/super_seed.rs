use std::collections::HashMap;

use tracing::debug;

use crate::peer::{Bitfield, ConnId};

/// Decides which piece to reveal to each peer while super-seeding.
///
/// Every peer is shown one piece at a time, the one we have revealed least
/// often so far. The next piece is revealed once the peer announces it holds
/// the current one.
#[derive(Debug)]
pub struct SuperSeeder {
    reveal_counts: Vec<u32>,
    assigned: HashMap<ConnId, u32>,
    /// HAVEs from other peers for pieces we revealed.
    spread: HashMap<u32, u32>,
}

impl SuperSeeder {
    pub fn new(piece_count: usize) -> Self {
        Self {
            reveal_counts: vec![0; piece_count],
            assigned: HashMap::new(),
            spread: HashMap::new(),
        }
    }

    /// Picks the least-revealed piece the peer lacks and assigns it.
    ///
    /// Ties go to the lowest index.
    pub fn next_reveal(&mut self, conn: ConnId, peer_have: &Bitfield) -> Option<u32> {
        let piece = (0..self.reveal_counts.len())
            .filter(|&p| !peer_have.get(p))
            .min_by_key(|&p| (self.reveal_counts[p], p))? as u32;

        self.reveal_counts[piece as usize] += 1;
        self.assigned.insert(conn, piece);
        self.spread.insert(piece, 0);
        debug!(conn = %conn, piece, "super-seed reveal");
        Some(piece)
    }

    /// Records a HAVE. Returns true when `conn` now holds the piece it was
    /// shown, meaning the next piece may be revealed to it.
    pub fn on_have(&mut self, conn: ConnId, piece: u32) -> bool {
        if self.assigned.get(&conn) == Some(&piece) {
            self.assigned.remove(&conn);
            return true;
        }
        if let Some(count) = self.spread.get_mut(&piece) {
            *count += 1;
        }
        false
    }

    /// Piece currently shown to `conn`.
    pub fn assigned(&self, conn: ConnId) -> Option<u32> {
        self.assigned.get(&conn).copied()
    }

    pub fn has_assignment(&self, conn: ConnId) -> bool {
        self.assigned.contains_key(&conn)
    }

    pub fn reveal_count(&self, piece: u32) -> u32 {
        self.reveal_counts.get(piece as usize).copied().unwrap_or(0)
    }

    /// How many other peers announced `piece` since it was last revealed.
    pub fn spread(&self, piece: u32) -> u32 {
        self.spread.get(&piece).copied().unwrap_or(0)
    }

    pub fn disconnected(&mut self, conn: ConnId) {
        self.assigned.remove(&conn);
    }
}
