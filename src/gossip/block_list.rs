use std::collections::HashMap;

use super::message::PermId;

/// Peers we must not cast to (or accept casts from) until a given time.
///
/// Entries only move forward: blocking again with an earlier time keeps the
/// later one. An entry counts as expired up to `slack` seconds early, so
/// clocks drifting by a network delay don't hold a peer back.
#[derive(Debug, Clone)]
pub struct BlockList {
    until: HashMap<PermId, u64>,
    slack: u64,
}

impl BlockList {
    pub fn new(slack: u64) -> Self {
        Self {
            until: HashMap::new(),
            slack,
        }
    }

    pub fn block(&mut self, peer: PermId, until: u64) {
        let entry = self.until.entry(peer).or_insert(until);
        *entry = (*entry).max(until);
    }

    pub fn is_blocked(&self, peer: &PermId, now: u64) -> bool {
        self.until
            .get(peer)
            .is_some_and(|&until| now.saturating_add(self.slack) < until)
    }

    pub fn blocked_until(&self, peer: &PermId) -> Option<u64> {
        self.until.get(peer).copied()
    }

    /// Drops expired entries.
    pub fn expire(&mut self, now: u64) {
        let slack = self.slack;
        self.until
            .retain(|_, &mut until| now.saturating_add(slack) < until);
    }

    pub fn len(&self) -> usize {
        self.until.len()
    }

    pub fn is_empty(&self) -> bool {
        self.until.is_empty()
    }
}
