use std::collections::HashSet;

use crate::peer::{Bitfield, ConnId};

use super::PiecePicker;

/// Rarest-first piece selection.
///
/// Pieces already started are always finished first. New pieces are taken
/// by lowest availability; pieces that flunked are bumped behind every
/// untouched piece of the same rarity.
#[derive(Debug, Clone)]
pub struct RarestFirstPicker {
    availability: Vec<u32>,
    seeds: u32,
    have: Bitfield,
    started: HashSet<u32>,
    bumped: HashSet<u32>,
    blocked: HashSet<u32>,
}

impl RarestFirstPicker {
    pub fn new(piece_count: usize) -> Self {
        Self::with_have(Bitfield::new(piece_count))
    }

    /// A picker for a store that already holds `have`.
    pub fn with_have(have: Bitfield) -> Self {
        Self {
            availability: vec![0; have.len()],
            seeds: 0,
            have,
            started: HashSet::new(),
            bumped: HashSet::new(),
            blocked: HashSet::new(),
        }
    }

    /// Connected peers known to hold `piece`.
    pub fn availability(&self, piece: u32) -> u32 {
        self.availability
            .get(piece as usize)
            .map_or(0, |&n| n + self.seeds)
    }

    pub fn seeds(&self) -> u32 {
        self.seeds
    }

    /// Excludes `piece` from selection until unblocked.
    pub fn block(&mut self, piece: u32) {
        self.blocked.insert(piece);
    }

    pub fn unblock(&mut self, piece: u32) {
        self.blocked.remove(&piece);
    }

    fn wanted(&self, piece: u32, have: &Bitfield, has_requests: &dyn Fn(u32) -> bool) -> bool {
        have.get(piece as usize)
            && !self.have.get(piece as usize)
            && !self.blocked.contains(&piece)
            && has_requests(piece)
    }
}

impl PiecePicker for RarestFirstPicker {
    fn next(
        &mut self,
        have: &Bitfield,
        has_requests: &dyn Fn(u32) -> bool,
        _peer: ConnId,
        too_many_partials: bool,
    ) -> Option<u32> {
        let mut started: Vec<u32> = self
            .started
            .iter()
            .copied()
            .filter(|&p| self.wanted(p, have, has_requests))
            .collect();
        started.sort_unstable_by_key(|&p| (self.availability(p), p));
        if let Some(&piece) = started.first() {
            return Some(piece);
        }
        if too_many_partials {
            return None;
        }

        (0..self.availability.len() as u32)
            .filter(|&p| self.wanted(p, have, has_requests))
            .min_by_key(|&p| (self.availability(p), self.bumped.contains(&p), p))
    }

    fn got_have(&mut self, piece: u32) {
        if let Some(n) = self.availability.get_mut(piece as usize) {
            *n += 1;
        }
    }

    fn lost_have(&mut self, piece: u32) {
        if let Some(n) = self.availability.get_mut(piece as usize) {
            *n = n.saturating_sub(1);
        }
    }

    fn got_seed(&mut self) {
        self.seeds += 1;
    }

    fn lost_seed(&mut self) {
        self.seeds = self.seeds.saturating_sub(1);
    }

    fn complete(&mut self, piece: u32) {
        if (piece as usize) < self.have.len() {
            self.have.set(piece as usize);
        }
        self.started.remove(&piece);
        self.bumped.remove(&piece);
    }

    fn requested(&mut self, piece: u32) {
        self.started.insert(piece);
    }

    fn bump(&mut self, piece: u32) {
        self.started.remove(&piece);
        self.bumped.insert(piece);
    }

    fn am_i_complete(&self) -> bool {
        self.have.complete()
    }

    fn is_blocked(&self, piece: u32) -> bool {
        self.blocked.contains(&piece)
    }
}
