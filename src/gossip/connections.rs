use std::collections::HashMap;
use std::net::IpAddr;

use rand::seq::IteratorRandom;

use super::message::PermId;
use crate::constants::{
    MIN_CLICKLOG_VERSION_BUDDIES, MIN_CURRENT_VERSION_BUDDIES, OVERLAY_VERSION_CLICKLOG,
    OVERLAY_VERSION_CURRENT,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Candidate {
    last_seen: u64,
    similarity: u16,
}

/// Peers we know of and may cast to next.
///
/// When full, the least recently seen candidate makes room.
#[derive(Debug, Clone)]
pub struct Candidates {
    entries: HashMap<PermId, Candidate>,
    max: usize,
}

impl Candidates {
    pub fn new(max: usize) -> Self {
        Self {
            entries: HashMap::new(),
            max,
        }
    }

    /// Adds or refreshes a candidate. Derived similarities rank by magnitude.
    pub fn add(&mut self, peer: PermId, last_seen: u64, similarity: i16) {
        let candidate = Candidate {
            last_seen,
            similarity: similarity.unsigned_abs(),
        };
        if let Some(existing) = self.entries.get_mut(&peer) {
            existing.last_seen = existing.last_seen.max(last_seen);
            existing.similarity = candidate.similarity;
            return;
        }
        if self.entries.len() >= self.max {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, c)| c.last_seen)
                .map(|(p, c)| (p.clone(), c.last_seen));
            match oldest {
                Some((oldest, seen)) if seen < last_seen => {
                    self.entries.remove(&oldest);
                }
                _ => return,
            }
        }
        self.entries.insert(peer, candidate);
    }

    pub fn remove(&mut self, peer: &PermId) -> bool {
        self.entries.remove(peer).is_some()
    }

    pub fn contains(&self, peer: &PermId) -> bool {
        self.entries.contains_key(peer)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The most similar candidate. With no similarity data at all, the most
    /// recently seen one.
    pub fn best(&self) -> Option<PermId> {
        let most_similar = self
            .entries
            .iter()
            .filter(|(_, c)| c.similarity > 0)
            .max_by(|(pa, a), (pb, b)| {
                (a.similarity, a.last_seen)
                    .cmp(&(b.similarity, b.last_seen))
                    .then_with(|| pb.cmp(pa))
            });
        if let Some((peer, _)) = most_similar {
            return Some(peer.clone());
        }
        self.entries
            .iter()
            .max_by(|(pa, a), (pb, b)| a.last_seen.cmp(&b.last_seen).then_with(|| pb.cmp(pa)))
            .map(|(peer, _)| peer.clone())
    }

    pub fn random(&self) -> Option<PermId> {
        self.entries.keys().choose(&mut rand::rng()).cloned()
    }
}

/// A peer with a live overlay connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectedPeer {
    pub permid: PermId,
    pub ip: IpAddr,
    pub port: u16,
    pub version: u32,
    pub similarity: i16,
    pub connect_time: u64,
}

/// Which list a connected peer sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerList {
    TasteBuddy,
    Random,
    Unconnectable,
}

/// Connected peers split into taste buddies, random peers and peers that
/// cannot be dialled back.
#[derive(Debug, Clone)]
pub struct ConnectionLists {
    connectable: HashMap<PermId, ConnectedPeer>,
    taste_buddies: Vec<PermId>,
    random_peers: Vec<PermId>,
    unconnectable: HashMap<PermId, ConnectedPeer>,
    max_taste_buddies: usize,
    max_random_peers: usize,
    max_unconnectable: usize,
}

impl ConnectionLists {
    pub fn new(max_taste_buddies: usize, max_random_peers: usize, max_unconnectable: usize) -> Self {
        Self {
            connectable: HashMap::new(),
            taste_buddies: Vec::new(),
            random_peers: Vec::new(),
            unconnectable: HashMap::new(),
            max_taste_buddies,
            max_random_peers,
            max_unconnectable,
        }
    }

    /// Adds or updates a peer and re-partitions. Returns the peers evicted
    /// to keep every list within its cap.
    pub fn add(&mut self, peer: ConnectedPeer, connectable: bool) -> Vec<PermId> {
        if connectable {
            self.unconnectable.remove(&peer.permid);
            self.connectable.insert(peer.permid.clone(), peer);
            return self.partition();
        }

        if self.connectable.contains_key(&peer.permid) {
            return Vec::new();
        }
        self.unconnectable.insert(peer.permid.clone(), peer);
        let mut evicted = Vec::new();
        while self.unconnectable.len() > self.max_unconnectable {
            let Some(oldest) = oldest(self.unconnectable.values()) else {
                break;
            };
            self.unconnectable.remove(&oldest);
            evicted.push(oldest);
        }
        evicted
    }

    pub fn set_similarity(&mut self, peer: &PermId, similarity: i16) -> Vec<PermId> {
        if let Some(p) = self.unconnectable.get_mut(peer) {
            p.similarity = similarity;
        }
        match self.connectable.get_mut(peer) {
            Some(p) => {
                p.similarity = similarity;
                self.partition()
            }
            None => Vec::new(),
        }
    }

    pub fn remove(&mut self, peer: &PermId) {
        self.unconnectable.remove(peer);
        if self.connectable.remove(peer).is_some() {
            self.taste_buddies.retain(|p| p != peer);
            self.random_peers.retain(|p| p != peer);
        }
    }

    pub fn list_of(&self, peer: &PermId) -> Option<PeerList> {
        if self.taste_buddies.contains(peer) {
            Some(PeerList::TasteBuddy)
        } else if self.random_peers.contains(peer) {
            Some(PeerList::Random)
        } else if self.unconnectable.contains_key(peer) {
            Some(PeerList::Unconnectable)
        } else {
            None
        }
    }

    pub fn get(&self, peer: &PermId) -> Option<&ConnectedPeer> {
        self.connectable
            .get(peer)
            .or_else(|| self.unconnectable.get(peer))
    }

    pub fn taste_buddies(&self) -> impl Iterator<Item = &ConnectedPeer> {
        self.taste_buddies
            .iter()
            .filter_map(|p| self.connectable.get(p))
    }

    pub fn random_peers(&self) -> impl Iterator<Item = &ConnectedPeer> {
        self.random_peers
            .iter()
            .filter_map(|p| self.connectable.get(p))
    }

    pub fn unconnectable(&self) -> impl Iterator<Item = &ConnectedPeer> {
        self.unconnectable.values()
    }

    /// Connected peers that can be dialled back.
    pub fn connectable_count(&self) -> usize {
        self.connectable.len()
    }

    pub fn len(&self) -> usize {
        self.connectable.len() + self.unconnectable.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Splits connectable peers into taste buddies and random peers.
    ///
    /// Taste buddies need a positive similarity. A few slots go to peers at
    /// the current overlay version first, then a few to click-log capable
    /// versions, then the rest by similarity. Everyone else is a random
    /// peer; random peers over the cap are dropped oldest first.
    fn partition(&mut self) -> Vec<PermId> {
        let mut similar: Vec<&ConnectedPeer> = self
            .connectable
            .values()
            .filter(|p| p.similarity > 0)
            .collect();
        similar.sort_by(|a, b| {
            b.similarity
                .cmp(&a.similarity)
                .then(b.connect_time.cmp(&a.connect_time))
                .then(a.permid.cmp(&b.permid))
        });

        let mut buddies: Vec<PermId> = Vec::new();
        let quotas = [
            (OVERLAY_VERSION_CURRENT, MIN_CURRENT_VERSION_BUDDIES),
            (OVERLAY_VERSION_CLICKLOG, MIN_CLICKLOG_VERSION_BUDDIES),
        ];
        for (min_version, quota) in quotas {
            let picks: Vec<PermId> = similar
                .iter()
                .filter(|p| p.version >= min_version && !buddies.contains(&p.permid))
                .take(quota)
                .map(|p| p.permid.clone())
                .collect();
            for pick in picks {
                if buddies.len() < self.max_taste_buddies {
                    buddies.push(pick);
                }
            }
        }
        for p in &similar {
            if buddies.len() >= self.max_taste_buddies {
                break;
            }
            if !buddies.contains(&p.permid) {
                buddies.push(p.permid.clone());
            }
        }

        let mut random: Vec<&ConnectedPeer> = self
            .connectable
            .values()
            .filter(|p| !buddies.contains(&p.permid))
            .collect();
        random.sort_by(|a, b| {
            b.connect_time
                .cmp(&a.connect_time)
                .then(a.permid.cmp(&b.permid))
        });
        let evicted: Vec<PermId> = random
            .iter()
            .skip(self.max_random_peers)
            .map(|p| p.permid.clone())
            .collect();
        let random: Vec<PermId> = random
            .iter()
            .take(self.max_random_peers)
            .map(|p| p.permid.clone())
            .collect();

        for peer in &evicted {
            self.connectable.remove(peer);
        }
        self.taste_buddies = buddies;
        self.random_peers = random;
        evicted
    }
}

fn oldest<'a>(peers: impl Iterator<Item = &'a ConnectedPeer>) -> Option<PermId> {
    peers
        .min_by(|a, b| a.connect_time.cmp(&b.connect_time).then(b.permid.cmp(&a.permid)))
        .map(|p| p.permid.clone())
}
