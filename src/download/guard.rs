use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

use tracing::warn;

use crate::constants::{BAN_GOOD_RATIO, BAN_MIN_BAD_PIECES, MAX_BAD_DATA_IPS, MIN_DOWNLOADS_FOR_KICK};
use crate::peer::{ConnId, PeerId};

/// Good/bad piece tallies for one remote IP.
#[derive(Debug, Clone, Default)]
pub struct PerIpStats {
    pub good_pieces: u32,
    /// Failed hash checks per piece index.
    pub bad_pieces: HashMap<u32, u32>,
    pub open_connections: u32,
    /// The connection most recently opened from this IP, while still open.
    pub last_download: Option<ConnId>,
    pub peer_id: Option<PeerId>,
}

/// What the guard wants done after a failed piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardAction {
    Kick(ConnId),
    Ban(IpAddr),
}

/// Per-IP bad-data accounting with kick and ban thresholds.
///
/// Kicks and bans need at least [`MIN_DOWNLOADS_FOR_KICK`] open downloads.
/// Once more than [`MAX_BAD_DATA_IPS`] addresses have sent bad data the
/// guard assumes false positives and stops kicking for good.
#[derive(Debug)]
pub struct BadDataGuard {
    per_ip: HashMap<IpAddr, PerIpStats>,
    got_bad_data: HashSet<IpAddr>,
    attached: HashMap<ConnId, IpAddr>,
    last_index: HashMap<ConnId, u32>,
    kicked: HashMap<IpAddr, Option<PeerId>>,
    banned: HashMap<IpAddr, Option<PeerId>>,
    kickbans_ok: bool,
    halted: bool,
}

impl BadDataGuard {
    pub fn new(kickbans_ok: bool) -> Self {
        Self {
            per_ip: HashMap::new(),
            got_bad_data: HashSet::new(),
            attached: HashMap::new(),
            last_index: HashMap::new(),
            kicked: HashMap::new(),
            banned: HashMap::new(),
            kickbans_ok,
            halted: false,
        }
    }

    /// Starts tracking a new connection from `ip`.
    pub fn attach(&mut self, conn: ConnId, ip: IpAddr, peer_id: PeerId) {
        let stats = self.per_ip.entry(ip).or_default();
        stats.open_connections += 1;
        stats.last_download = Some(conn);
        stats.peer_id = Some(peer_id);
        self.attached.insert(conn, ip);
    }

    /// Stops tracking a closed connection. Stats for its IP are dropped
    /// once no connection remains and no bad piece is on record.
    pub fn detach(&mut self, conn: ConnId, ip: IpAddr) {
        self.attached.remove(&conn);
        self.last_index.remove(&conn);

        let Some(stats) = self.per_ip.get_mut(&ip) else {
            return;
        };
        stats.open_connections = stats.open_connections.saturating_sub(1);
        if stats.last_download == Some(conn) {
            stats.last_download = None;
        }
        if stats.open_connections == 0 && stats.bad_pieces.is_empty() {
            self.per_ip.remove(&ip);
        }
    }

    /// Credits `ip` with a piece that passed its hash check.
    ///
    /// Counts once per piece however many chunks of it the connection sent.
    pub fn good(&mut self, conn: ConnId, ip: IpAddr, piece: u32) {
        if self.last_index.get(&conn) == Some(&piece) {
            return;
        }
        self.last_index.insert(conn, piece);
        self.per_ip.entry(ip).or_default().good_pieces += 1;
    }

    /// Charges `ip` with a piece that failed its hash check.
    pub fn failed(
        &mut self,
        conn: ConnId,
        ip: IpAddr,
        piece: u32,
        downloads: usize,
    ) -> Vec<GuardAction> {
        self.got_bad_data.insert(ip);
        let stats = self.per_ip.entry(ip).or_default();
        *stats.bad_pieces.entry(piece).or_insert(0) += 1;

        let bad = stats.bad_pieces.len();
        let good = stats.good_pieces as usize;
        let peer_id = stats.peer_id;
        let kick_target = if self.attached.contains_key(&conn) {
            Some(conn)
        } else if stats.open_connections == 1 {
            stats.last_download
        } else {
            None
        };

        let mut actions = Vec::new();
        if bad > 1 {
            if let Some(target) = kick_target {
                if self.kicks_ok(downloads) {
                    self.attached.remove(&target);
                    self.kicked.insert(ip, peer_id);
                    actions.push(GuardAction::Kick(target));
                }
            }
        }
        if bad >= BAN_MIN_BAD_PIECES && bad > good / BAN_GOOD_RATIO && self.kicks_ok(downloads) {
            self.kicked.remove(&ip);
            self.banned.insert(ip, peer_id);
            actions.push(GuardAction::Ban(ip));
        }
        actions
    }

    fn kicks_ok(&mut self, downloads: usize) -> bool {
        if self.got_bad_data.len() > MAX_BAD_DATA_IPS && !self.halted {
            warn!(
                ips = self.got_bad_data.len(),
                "too many addresses sent bad data, halting kicks and bans"
            );
            self.kickbans_ok = false;
            self.halted = true;
        }
        self.kickbans_ok && downloads >= MIN_DOWNLOADS_FOR_KICK
    }

    pub fn is_banned(&self, ip: &IpAddr) -> bool {
        self.banned.contains_key(ip)
    }

    pub fn banned(&self) -> impl Iterator<Item = &IpAddr> {
        self.banned.keys()
    }

    pub fn was_kicked(&self, ip: &IpAddr) -> bool {
        self.kicked.contains_key(ip)
    }

    /// True once kicks and bans have been switched off for this session.
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn bad_data_ips(&self) -> usize {
        self.got_bad_data.len()
    }

    pub fn stats(&self, ip: &IpAddr) -> Option<&PerIpStats> {
        self.per_ip.get(ip)
    }
}
