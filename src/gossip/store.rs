use std::collections::{HashMap, HashSet, VecDeque};
use std::net::IpAddr;

use parking_lot::RwLock;

use super::message::{InfoHash, PermId, Preference};
use super::similarity::is_direct;
use crate::constants::MAX_STORED_TORRENTS;

/// What the overlay remembers about a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub permid: PermId,
    pub ip: IpAddr,
    pub port: u16,
    /// Positive when measured, negative when derived through a buddy.
    pub similarity: i16,
    pub last_seen: u64,
    pub last_buddycast: u64,
    pub oversion: u32,
    pub connected_times: u32,
    pub nfiles: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverlayStats {
    pub npeers: u64,
    pub nfiles: u64,
    pub ndls: u64,
}

/// A peer sighting to merge into its record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerUpdate {
    pub permid: PermId,
    pub ip: IpAddr,
    pub port: u16,
    pub last_seen: u64,
    pub oversion: Option<u32>,
    pub nfiles: Option<u64>,
}

/// A similarity to record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimilarityUpdate {
    /// Computed from the peer's own preferences; always wins.
    Direct(i16),
    /// Derived through a buddy; never replaces a direct value.
    Relative(i16),
}

/// Writes from one received cast, applied together by
/// [`OverlayStore::commit`].
#[derive(Debug, Default, Clone)]
pub struct StoreBatch {
    pub peers: Vec<PeerUpdate>,
    pub similarities: Vec<(PermId, SimilarityUpdate)>,
    pub preferences: Vec<(PermId, Vec<Preference>)>,
    pub torrents: Vec<InfoHash>,
    pub buddycasts: Vec<(PermId, u64)>,
    pub connected: Vec<PermId>,
}

impl StoreBatch {
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
            && self.similarities.is_empty()
            && self.preferences.is_empty()
            && self.torrents.is_empty()
            && self.buddycasts.is_empty()
            && self.connected.is_empty()
    }
}

/// Persistent peer and preference state behind the overlay.
///
/// Implementations must apply a [`StoreBatch`] atomically.
pub trait OverlayStore: Send + Sync {
    /// Our most recent preferences, newest first.
    fn my_preferences(&self, limit: usize) -> Vec<Preference>;

    /// Recently observed torrents, newest first.
    fn recent_torrents(&self, limit: usize) -> Vec<InfoHash>;

    /// Most recently seen peers, skipping those `exclude` rejects.
    fn recent_peers(&self, limit: usize, exclude: &dyn Fn(&PermId) -> bool) -> Vec<PeerRecord>;

    fn peer(&self, permid: &PermId) -> Option<PeerRecord>;

    fn peer_preferences(&self, permid: &PermId) -> Vec<InfoHash>;

    fn peer_count(&self) -> usize;

    fn stats(&self) -> OverlayStats;

    fn commit(&self, batch: StoreBatch);
}

#[derive(Debug, Default)]
struct Inner {
    my_preferences: VecDeque<Preference>,
    torrents: VecDeque<InfoHash>,
    known_torrents: HashSet<InfoHash>,
    peers: HashMap<PermId, PeerRecord>,
    preferences: HashMap<PermId, Vec<InfoHash>>,
    downloads: u64,
}

impl Inner {
    /// Newest first; the oldest falls off past [`MAX_STORED_TORRENTS`].
    fn collect_torrent(&mut self, infohash: InfoHash) {
        if !self.known_torrents.insert(infohash) {
            return;
        }
        self.torrents.push_front(infohash);
        if self.torrents.len() > MAX_STORED_TORRENTS {
            if let Some(oldest) = self.torrents.pop_back() {
                self.known_torrents.remove(&oldest);
            }
        }
    }
}

/// An [`OverlayStore`] kept in memory behind a read-write lock.
#[derive(Debug, Default)]
pub struct MemoryOverlayStore {
    inner: RwLock<Inner>,
}

impl MemoryOverlayStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_my_preference(&self, preference: Preference) {
        let mut inner = self.inner.write();
        inner
            .my_preferences
            .retain(|p| p.infohash != preference.infohash);
        inner.my_preferences.push_front(preference);
        inner.downloads += 1;
    }

    pub fn add_torrent(&self, infohash: InfoHash) {
        self.inner.write().collect_torrent(infohash);
    }

    /// Seeds the store with a known peer.
    pub fn add_peer(&self, record: PeerRecord) {
        self.inner.write().peers.insert(record.permid.clone(), record);
    }
}

impl OverlayStore for MemoryOverlayStore {
    fn my_preferences(&self, limit: usize) -> Vec<Preference> {
        self.inner
            .read()
            .my_preferences
            .iter()
            .take(limit)
            .cloned()
            .collect()
    }

    fn recent_torrents(&self, limit: usize) -> Vec<InfoHash> {
        self.inner.read().torrents.iter().take(limit).copied().collect()
    }

    fn recent_peers(&self, limit: usize, exclude: &dyn Fn(&PermId) -> bool) -> Vec<PeerRecord> {
        let inner = self.inner.read();
        let mut peers: Vec<&PeerRecord> = inner
            .peers
            .values()
            .filter(|p| !exclude(&p.permid))
            .collect();
        peers.sort_by(|a, b| {
            b.last_seen
                .cmp(&a.last_seen)
                .then(a.permid.cmp(&b.permid))
        });
        peers.into_iter().take(limit).cloned().collect()
    }

    fn peer(&self, permid: &PermId) -> Option<PeerRecord> {
        self.inner.read().peers.get(permid).cloned()
    }

    fn peer_preferences(&self, permid: &PermId) -> Vec<InfoHash> {
        self.inner
            .read()
            .preferences
            .get(permid)
            .cloned()
            .unwrap_or_default()
    }

    fn peer_count(&self) -> usize {
        self.inner.read().peers.len()
    }

    fn stats(&self) -> OverlayStats {
        let inner = self.inner.read();
        OverlayStats {
            npeers: inner.peers.len() as u64,
            nfiles: inner.torrents.len() as u64,
            ndls: inner.downloads,
        }
    }

    fn commit(&self, batch: StoreBatch) {
        let mut inner = self.inner.write();

        for update in batch.peers {
            let record = inner
                .peers
                .entry(update.permid.clone())
                .or_insert_with(|| PeerRecord {
                    permid: update.permid.clone(),
                    ip: update.ip,
                    port: update.port,
                    similarity: 0,
                    last_seen: 0,
                    last_buddycast: 0,
                    oversion: 0,
                    connected_times: 0,
                    nfiles: 0,
                });
            record.ip = update.ip;
            record.port = update.port;
            record.last_seen = record.last_seen.max(update.last_seen);
            if let Some(oversion) = update.oversion {
                record.oversion = oversion;
            }
            if let Some(nfiles) = update.nfiles {
                record.nfiles = nfiles;
            }
        }

        for (permid, update) in batch.similarities {
            let Some(record) = inner.peers.get_mut(&permid) else {
                continue;
            };
            match update {
                SimilarityUpdate::Direct(sim) => record.similarity = sim,
                SimilarityUpdate::Relative(sim) => {
                    if !is_direct(record.similarity) {
                        record.similarity = sim;
                    }
                }
            }
        }

        for (permid, prefs) in batch.preferences {
            inner
                .preferences
                .insert(permid, prefs.into_iter().map(|p| p.infohash).collect());
        }

        for infohash in batch.torrents {
            inner.collect_torrent(infohash);
        }

        for (permid, at) in batch.buddycasts {
            if let Some(record) = inner.peers.get_mut(&permid) {
                record.last_buddycast = record.last_buddycast.max(at);
            }
        }

        for permid in batch.connected {
            if let Some(record) = inner.peers.get_mut(&permid) {
                record.connected_times += 1;
            }
        }
    }
}
