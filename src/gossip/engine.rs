use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rand::seq::IteratorRandom;
use tracing::{debug, info, trace, warn};

use super::block_list::BlockList;
use super::connections::{Candidates, ConnectedPeer, ConnectionLists};
use super::error::GossipError;
use super::message::{CastMessage, CastStats, InfoHash, OverlayFrame, PeerEntry, PermId};
use super::similarity::{relative_similarity, similarity};
use super::store::{OverlayStore, PeerUpdate, SimilarityUpdate, StoreBatch};
use super::transport::{OverlayTransport, TransportEvent};
use crate::config::GossipConfig;
use crate::constants::{BOOTSTRAP_PEERS, MAX_REMOTE_SEARCH_PEERS, OVERLAY_VERSION_REMOTE_SEARCH};

const FAST_ROUND: Duration = Duration::from_millis(200);
const SHORT_ROUND: Duration = Duration::from_secs(2);
const MEDIUM_ROUND: Duration = Duration::from_secs(5);
const STEADY_ROUND: Duration = Duration::from_secs(15);
const SLOW_ROUND: Duration = Duration::from_secs(60);

const WARMUP_SECS: u64 = 2 * 60;
const SETTLING_SECS: u64 = 30 * 60;
const LONG_RUNNING_SECS: u64 = 24 * 60 * 60;

/// Below this many connected connectable peers the engine casts faster.
const FEW_CONNECTED: usize = 10;
/// Below this many known peers a warming-up engine keeps a short period.
const FEW_KNOWN: usize = 20;

#[derive(Debug, Clone, Copy)]
struct Session {
    version: u32,
    address: SocketAddr,
    initiated: bool,
    connect_time: u64,
}

/// Epidemic preference exchange.
///
/// Each round casts to at most one peer: alternately the most similar
/// candidate and a random one. Receiving a cast updates the peer store,
/// feeds new candidates and, unless we started the exchange, triggers a
/// reply. Both directions are then blocked for the block interval so the
/// same pair doesn't exchange again for hours.
///
/// Time is whole unix seconds passed in by the caller.
pub struct GossipEngine {
    config: GossipConfig,
    my_id: PermId,
    store: Arc<dyn OverlayStore>,
    transport: Box<dyn OverlayTransport>,
    started: u64,
    rounds: u64,
    idle_loops: u32,
    candidates: Candidates,
    connections: ConnectionLists,
    send_block: BlockList,
    recv_block: BlockList,
    /// Connect deadlines of casts we are waiting to send.
    pending: HashMap<PermId, u64>,
    sessions: HashMap<PermId, Session>,
    /// Peers the host verified can be dialled back.
    verified: HashSet<PermId>,
    last_keepalive: u64,
    empty_since: Option<u64>,
}

impl GossipEngine {
    pub fn new(
        config: GossipConfig,
        my_id: PermId,
        store: Arc<dyn OverlayStore>,
        transport: Box<dyn OverlayTransport>,
        now: u64,
    ) -> Self {
        info!(id = %my_id, version = config.overlay_version, "gossip engine started");
        Self {
            candidates: Candidates::new(config.max_candidates),
            connections: ConnectionLists::new(
                config.max_taste_buddies,
                config.max_random_peers,
                config.max_unconnectable,
            ),
            send_block: BlockList::new(config.network_delay_secs),
            recv_block: BlockList::new(config.network_delay_secs),
            config,
            my_id,
            store,
            transport,
            started: now,
            rounds: 0,
            idle_loops: 0,
            pending: HashMap::new(),
            sessions: HashMap::new(),
            verified: HashSet::new(),
            last_keepalive: now,
            empty_since: None,
        }
    }

    pub fn my_id(&self) -> &PermId {
        &self.my_id
    }

    pub fn candidates(&self) -> &Candidates {
        &self.candidates
    }

    pub fn connections(&self) -> &ConnectionLists {
        &self.connections
    }

    pub fn send_block(&self) -> &BlockList {
        &self.send_block
    }

    pub fn recv_block(&self) -> &BlockList {
        &self.recv_block
    }

    pub fn idle_loops(&self) -> u32 {
        self.idle_loops
    }

    /// Rounds that selected a target.
    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    pub fn is_pending(&self, peer: &PermId) -> bool {
        self.pending.contains_key(peer)
    }

    pub fn is_connected(&self, peer: &PermId) -> bool {
        self.sessions.contains_key(peer)
    }

    /// Time until the next round, by uptime and how well connected we are.
    pub fn next_interval(&self, now: u64) -> Duration {
        let uptime = now.saturating_sub(self.started);
        let connected = self.connections.connectable_count();

        if uptime < WARMUP_SECS {
            if connected < FEW_CONNECTED {
                FAST_ROUND
            } else if self.store.peer_count() < FEW_KNOWN {
                SHORT_ROUND
            } else {
                MEDIUM_ROUND
            }
        } else if uptime < SETTLING_SECS {
            if connected < FEW_CONNECTED {
                SHORT_ROUND
            } else {
                MEDIUM_ROUND
            }
        } else if uptime > LONG_RUNNING_SECS {
            SLOW_ROUND
        } else {
            STEADY_ROUND
        }
    }

    /// Runs one round. Returns the peer selected for a cast, if any.
    pub fn round(&mut self, now: u64) -> Option<PermId> {
        self.send_block.expire(now);
        self.recv_block.expire(now);
        self.expire_pending(now);

        if self.idle_loops > 0 {
            self.idle_loops -= 1;
            trace!(remaining = self.idle_loops, "idle round");
            return None;
        }

        self.keep_alive(now);

        if self.candidates.is_empty() {
            self.bootstrap(now);
        }
        if self.candidates.is_empty() {
            let since = *self.empty_since.get_or_insert(now);
            if now.saturating_sub(since) >= self.config.bootstrap_interval_secs {
                info!("no overlay peers to cast to");
                self.empty_since = Some(now);
            }
            return None;
        }
        self.empty_since = None;

        let by_similarity = self.rounds % 2 == 0;
        self.rounds += 1;
        let target = if by_similarity {
            self.candidates.best()
        } else {
            self.candidates.random()
        }?;

        self.candidates.remove(&target);
        self.send_block
            .block(target.clone(), now + self.config.block_interval_secs);
        debug!(peer = %target, by_similarity, "cast target selected");

        if self.sessions.contains_key(&target) {
            self.send_cast(&target, now);
        } else {
            self.pending
                .insert(target.clone(), now + self.config.connect_timeout_secs);
            self.transport.connect(&target);
        }
        Some(target)
    }

    fn expire_pending(&mut self, now: u64) {
        let expired: Vec<PermId> = self
            .pending
            .iter()
            .filter(|(_, &deadline)| now >= deadline)
            .map(|(peer, _)| peer.clone())
            .collect();
        for peer in expired {
            debug!(%peer, "overlay connect timed out");
            self.pending.remove(&peer);
            self.candidates.remove(&peer);
            self.transport.close(&peer);
        }
    }

    fn keep_alive(&mut self, now: u64) {
        if now.saturating_sub(self.last_keepalive) < self.config.check_period_secs {
            return;
        }
        self.last_keepalive = now;
        for peer in self.sessions.keys() {
            self.transport.send(peer, OverlayFrame::keep_alive());
        }
    }

    fn bootstrap(&mut self, now: u64) {
        let me = &self.my_id;
        let send_block = &self.send_block;
        let sessions = &self.sessions;
        let exclude =
            |p: &PermId| p == me || send_block.is_blocked(p, now) || sessions.contains_key(p);
        let peers = self.store.recent_peers(BOOTSTRAP_PEERS, &exclude);

        for p in &peers {
            self.candidates.add(p.permid.clone(), p.last_seen, p.similarity);
        }
        if !peers.is_empty() {
            info!(candidates = peers.len(), "bootstrapped overlay candidates");
        }
    }

    /// Records that `peer` was verified to accept incoming connections.
    pub fn mark_connectable(&mut self, peer: &PermId, now: u64) {
        self.verified.insert(peer.clone());
        if let Some(existing) = self.connections.get(peer).cloned() {
            let evicted = self.connections.add(existing, true);
            self.close_evicted(evicted, now);
        }
    }

    /// Feeds a transport completion or inbound frame.
    ///
    /// Errors describe a cast that was dropped; the connection stays open.
    pub fn handle_event(&mut self, event: TransportEvent, now: u64) -> Result<(), GossipError> {
        match event {
            TransportEvent::Connected {
                peer,
                version,
                address,
                initiated,
            } => {
                self.sessions.insert(
                    peer.clone(),
                    Session {
                        version,
                        address,
                        initiated,
                        connect_time: now,
                    },
                );
                let similarity = self.store.peer(&peer).map_or(0, |r| r.similarity);
                let connected = ConnectedPeer {
                    permid: peer.clone(),
                    ip: address.ip(),
                    port: address.port(),
                    version,
                    similarity,
                    connect_time: now,
                };
                let connectable = initiated || self.verified.contains(&peer);
                let evicted = self.connections.add(connected, connectable);
                self.close_evicted(evicted, now);
                self.store.commit(StoreBatch {
                    connected: vec![peer.clone()],
                    ..Default::default()
                });

                if self.pending.remove(&peer).is_some() {
                    self.send_cast(&peer, now);
                }
            }
            TransportEvent::ConnectFailed { peer, reason } => {
                debug!(%peer, %reason, "overlay connect failed");
                self.pending.remove(&peer);
                self.candidates.remove(&peer);
            }
            TransportEvent::Sent { peer } => {
                trace!(%peer, "cast delivered");
                self.store.commit(StoreBatch {
                    buddycasts: vec![(peer, now)],
                    ..Default::default()
                });
            }
            TransportEvent::SendFailed { peer, reason } => {
                debug!(%peer, %reason, "overlay send failed");
                self.drop_peer(&peer);
                self.transport.close(&peer);
            }
            TransportEvent::Received {
                peer,
                version,
                payload,
            } => match OverlayFrame::parse(payload)? {
                OverlayFrame::Cast(body) => {
                    if let Err(e) = self.handle_cast(&peer, version, &body, now) {
                        debug!(%peer, error = %e, "dropping cast");
                        return Err(e);
                    }
                }
                OverlayFrame::KeepAlive => trace!(%peer, "overlay keep-alive"),
                OverlayFrame::Other(id) => trace!(%peer, id, "ignoring overlay frame"),
            },
            TransportEvent::Disconnected { peer } => {
                trace!(%peer, "overlay disconnected");
                self.drop_peer(&peer);
            }
        }
        Ok(())
    }

    fn handle_cast(&mut self, peer: &PermId, version: u32, body: &[u8], now: u64) -> Result<(), GossipError> {
        if self.recv_block.is_blocked(peer, now) {
            return Err(GossipError::Blocked(peer.clone()));
        }
        let session = self
            .sessions
            .get(peer)
            .copied()
            .ok_or_else(|| GossipError::UnknownPeer(peer.clone()))?;
        let cast = CastMessage::decode(body, version, self.config.max_message_size)?;

        let mut batch = StoreBatch::default();
        batch.peers.push(PeerUpdate {
            permid: peer.clone(),
            ip: cast.ip,
            port: cast.port,
            last_seen: now,
            oversion: Some(version),
            nfiles: cast.stats.map(|s| s.nfiles),
        });
        let mentioned: Vec<&PeerEntry> = cast
            .taste_buddies
            .iter()
            .chain(&cast.random_peers)
            .filter(|e| e.permid != self.my_id && e.permid != *peer)
            .collect();
        for e in &mentioned {
            batch.peers.push(PeerUpdate {
                permid: e.permid.clone(),
                ip: e.ip,
                port: e.port,
                last_seen: now.saturating_sub(e.age),
                oversion: e.oversion,
                nfiles: e.nfiles,
            });
        }

        let ours: HashSet<InfoHash> = self
            .store
            .my_preferences(usize::MAX)
            .into_iter()
            .map(|p| p.infohash)
            .collect();
        let theirs: Vec<InfoHash> = cast.preferences.iter().map(|p| p.infohash).collect();
        let sim = similarity(&ours, &theirs);
        batch
            .similarities
            .push((peer.clone(), SimilarityUpdate::Direct(sim)));

        let max_buddy_sim = cast
            .taste_buddies
            .iter()
            .map(|b| b.similarity)
            .max()
            .unwrap_or(0);
        for buddy in &cast.taste_buddies {
            if buddy.permid == self.my_id || buddy.permid == *peer {
                continue;
            }
            let derived = relative_similarity(sim, buddy.similarity, max_buddy_sim);
            if derived != 0 {
                batch
                    .similarities
                    .push((buddy.permid.clone(), SimilarityUpdate::Relative(derived)));
            }
        }
        batch
            .preferences
            .push((peer.clone(), cast.preferences.clone()));
        batch.torrents.extend(cast.collected_torrents.iter().copied());
        self.store.commit(batch);

        for e in mentioned {
            if self.sessions.contains_key(&e.permid) || self.send_block.is_blocked(&e.permid, now) {
                continue;
            }
            let stored = self.store.peer(&e.permid).map_or(0, |r| r.similarity);
            self.candidates
                .add(e.permid.clone(), now.saturating_sub(e.age), stored);
        }

        let connected = ConnectedPeer {
            permid: peer.clone(),
            ip: session.address.ip(),
            port: cast.port,
            version,
            similarity: sim,
            connect_time: session.connect_time,
        };
        let connectable = session.initiated || self.verified.contains(peer);
        let evicted = self.connections.add(connected, connectable);
        self.close_evicted(evicted, now);

        let replying = !self.send_block.is_blocked(peer, now);
        if replying {
            self.send_cast(peer, now);
            self.send_block
                .block(peer.clone(), now + self.config.block_interval_secs);
        }
        self.recv_block
            .block(peer.clone(), now + self.config.block_interval_secs);
        self.idle_loops += 1;

        debug!(%peer, similarity = sim, prefs = theirs.len(), replying, "cast received");
        Ok(())
    }

    /// Sends our cast to a connected peer. Returns false if none went out.
    fn send_cast(&mut self, target: &PermId, now: u64) -> bool {
        let Some(session) = self.sessions.get(target).copied() else {
            return false;
        };
        let version = session.version.min(self.config.overlay_version);
        let mut cast = self.build_cast(target, session, now);

        loop {
            match cast.to_frame(version, self.config.max_message_size) {
                Ok(frame) => {
                    trace!(peer = %target, bytes = frame.len(), "sending cast");
                    self.transport.send(target, frame);
                    return true;
                }
                Err(GossipError::TooLarge { .. }) => {
                    if cast.collected_torrents.pop().is_none()
                        && cast.random_peers.pop().is_none()
                        && cast.taste_buddies.pop().is_none()
                        && cast.preferences.pop().is_none()
                    {
                        return false;
                    }
                }
                Err(e) => {
                    warn!(peer = %target, error = %e, "could not encode cast");
                    return false;
                }
            }
        }
    }

    fn build_cast(&self, target: &PermId, session: Session, now: u64) -> CastMessage {
        let target_ip = session.address.ip();
        let keep = |p: &&ConnectedPeer| p.permid != *target && p.ip != target_ip;

        let taste_buddies: Vec<PeerEntry> = self
            .connections
            .taste_buddies()
            .filter(keep)
            .take(self.config.max_taste_buddies)
            .map(|p| self.entry(p, now))
            .collect();
        let mut random_peers: Vec<PeerEntry> = self
            .connections
            .random_peers()
            .filter(keep)
            .take(self.config.max_random_peers)
            .map(|p| self.entry(p, now))
            .collect();

        if session.version >= OVERLAY_VERSION_REMOTE_SEARCH {
            let listed: HashSet<&PermId> = taste_buddies
                .iter()
                .chain(&random_peers)
                .map(|e| &e.permid)
                .collect();
            let searchers: Vec<PeerEntry> = self
                .connections
                .taste_buddies()
                .chain(self.connections.random_peers())
                .chain(self.connections.unconnectable())
                .filter(keep)
                .filter(|p| p.version >= OVERLAY_VERSION_REMOTE_SEARCH && !listed.contains(&p.permid))
                .choose_multiple(&mut rand::rng(), MAX_REMOTE_SEARCH_PEERS)
                .into_iter()
                .map(|p| self.entry(p, now))
                .collect();
            random_peers.extend(searchers);
        }

        let stats = self.store.stats();
        CastMessage {
            ip: self.config.ip,
            port: self.config.port,
            name: self.config.name.clone(),
            preferences: self.store.my_preferences(self.config.num_my_prefs),
            taste_buddies,
            random_peers,
            collected_torrents: self.store.recent_torrents(self.config.num_collected_torrents),
            connectable: self.config.connectable,
            stats: Some(CastStats {
                npeers: stats.npeers,
                nfiles: stats.nfiles,
                ndls: stats.ndls,
            }),
        }
    }

    fn entry(&self, peer: &ConnectedPeer, now: u64) -> PeerEntry {
        let record = self.store.peer(&peer.permid);
        let (ip, port, last_seen, nfiles) = match &record {
            Some(r) => (r.ip, r.port, r.last_seen, Some(r.nfiles)),
            None => (peer.ip, peer.port, now, None),
        };
        PeerEntry {
            permid: peer.permid.clone(),
            ip,
            port,
            age: now.saturating_sub(last_seen),
            similarity: i64::from(peer.similarity.max(0)),
            oversion: Some(peer.version),
            nfiles,
        }
    }

    fn close_evicted(&mut self, evicted: Vec<PermId>, now: u64) {
        for peer in evicted {
            debug!(%peer, now, "evicting overlay peer");
            self.sessions.remove(&peer);
            self.pending.remove(&peer);
            self.transport.close(&peer);
        }
    }

    fn drop_peer(&mut self, peer: &PermId) {
        self.sessions.remove(peer);
        self.pending.remove(peer);
        self.connections.remove(peer);
    }
}

impl std::fmt::Debug for GossipEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GossipEngine")
            .field("my_id", &self.my_id)
            .field("rounds", &self.rounds)
            .field("candidates", &self.candidates.len())
            .field("connected", &self.sessions.len())
            .finish()
    }
}
