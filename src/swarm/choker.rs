use std::time::Instant;

use rand::Rng as _;

use crate::constants::{MAX_UNCHOKED, OPTIMISTIC_UNCHOKE_INTERVAL, UNCHOKE_INTERVAL};
use crate::peer::ConnId;

/// What the choker needs to know about one connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeerStats {
    pub download_rate: f64,
    pub upload_rate: f64,
    pub interested: bool,
    pub we_choking: bool,
}

/// Tit-for-tat unchoking with one optimistic slot.
///
/// The fastest interested peers get the regular slots: fastest to us while
/// leeching, fastest from us while seeding. The optimistic slot rotates to a
/// random other interested peer every 30 seconds.
#[derive(Debug, Default)]
pub struct Choker {
    last_unchoke: Option<Instant>,
    last_optimistic: Option<Instant>,
    optimistic: Option<ConnId>,
}

impl Choker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn optimistic(&self) -> Option<ConnId> {
        self.optimistic
    }

    pub fn remove_peer(&mut self, conn: ConnId) {
        if self.optimistic == Some(conn) {
            self.optimistic = None;
        }
    }

    /// Rechokes if the unchoke interval has passed.
    pub fn tick(&mut self, peers: &[(ConnId, PeerStats)], is_seed: bool, now: Instant) -> Vec<(ConnId, bool)> {
        let due = self
            .last_unchoke
            .is_none_or(|at| now.saturating_duration_since(at) >= UNCHOKE_INTERVAL);
        if !due {
            return Vec::new();
        }
        self.rechoke(peers, is_seed, now)
    }

    /// Returns `(conn, unchoke)` for every connection whose state changes.
    pub fn rechoke(&mut self, peers: &[(ConnId, PeerStats)], is_seed: bool, now: Instant) -> Vec<(ConnId, bool)> {
        self.last_unchoke = Some(now);

        let mut candidates: Vec<&(ConnId, PeerStats)> =
            peers.iter().filter(|(_, stats)| stats.interested).collect();
        let rate = |stats: &PeerStats| {
            if is_seed {
                stats.upload_rate
            } else {
                stats.download_rate
            }
        };
        candidates.sort_by(|(_, a), (_, b)| rate(b).total_cmp(&rate(a)));

        let mut to_unchoke: Vec<ConnId> = candidates
            .iter()
            .take(MAX_UNCHOKED - 1)
            .map(|(conn, _)| *conn)
            .collect();

        if self.optimistic.is_some_and(|opt| {
            !peers
                .iter()
                .any(|(conn, stats)| *conn == opt && stats.interested)
        }) {
            self.optimistic = None;
        }

        let rotate = self.optimistic.is_none()
            || self
                .last_optimistic
                .is_none_or(|at| now.saturating_duration_since(at) >= OPTIMISTIC_UNCHOKE_INTERVAL);
        if rotate {
            let others: Vec<ConnId> = candidates
                .iter()
                .map(|(conn, _)| *conn)
                .filter(|conn| !to_unchoke.contains(conn))
                .collect();
            if !others.is_empty() {
                self.last_optimistic = Some(now);
                self.optimistic = Some(others[rand::rng().random_range(0..others.len())]);
            }
        }

        if let Some(opt) = self.optimistic {
            if !to_unchoke.contains(&opt) && to_unchoke.len() < MAX_UNCHOKED {
                to_unchoke.push(opt);
            }
        }

        peers
            .iter()
            .filter_map(|(conn, stats)| {
                let unchoke = to_unchoke.contains(conn);
                (unchoke == stats.we_choking).then_some((*conn, unchoke))
            })
            .collect()
    }
}
