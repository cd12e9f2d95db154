//! Async driver for the sans-IO engines.
//!
//! [`Engine`] owns a [`Swarm`] and, optionally, a [`GossipEngine`]. Socket
//! tasks report what happened on their connections through an
//! [`EngineHandle`]; the engine applies each event, runs the swarm's
//! housekeeping tick every second and the overlay's rounds at whatever pace
//! [`GossipEngine::next_interval`] asks for, and forwards every resulting
//! wire action on an outbound channel.
//!
//! # Examples
//!
//! ```no_run
//! # use swarmcast::runtime::Engine;
//! # use swarmcast::swarm::Swarm;
//! # async fn example(swarm: Swarm) {
//! let (engine, handle, mut outbound) = Engine::new(swarm, None, 1_700_000_000);
//! let task = tokio::spawn(engine.run());
//!
//! while let Some((conn, action)) = outbound.recv().await {
//!     println!("{}: {:?}", conn, action);
//! }
//! # let _ = (handle, task);
//! # }
//! ```

use std::collections::VecDeque;
use std::net::IpAddr;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::constants::DOWNLOAD_TICK_INTERVAL;
use crate::gossip::{GossipEngine, TransportEvent};
use crate::peer::{ConnId, Message, Outbound, PeerId};
use crate::swarm::Swarm;

const EVENT_CHANNEL_CAPACITY: usize = 256;
const OUTBOUND_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("engine stopped")]
    Stopped,
}

/// Something that happened outside the engine.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A connection finished its handshake.
    PeerConnected {
        conn: ConnId,
        ip: IpAddr,
        peer_id: PeerId,
    },
    PeerMessage {
        conn: ConnId,
        message: Message,
    },
    PeerClosed {
        conn: ConnId,
    },
    Overlay(TransportEvent),
    SetUploadRate(u64),
    Shutdown,
}

/// Cloneable sender side of an [`Engine`].
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineEvent>,
}

impl EngineHandle {
    pub async fn send(&self, event: EngineEvent) -> Result<(), RuntimeError> {
        self.tx.send(event).await.map_err(|_| RuntimeError::Stopped)
    }

    pub async fn peer_connected(&self, conn: ConnId, ip: IpAddr, peer_id: PeerId) -> Result<(), RuntimeError> {
        self.send(EngineEvent::PeerConnected { conn, ip, peer_id }).await
    }

    pub async fn peer_message(&self, conn: ConnId, message: Message) -> Result<(), RuntimeError> {
        self.send(EngineEvent::PeerMessage { conn, message }).await
    }

    pub async fn peer_closed(&self, conn: ConnId) -> Result<(), RuntimeError> {
        self.send(EngineEvent::PeerClosed { conn }).await
    }

    pub async fn overlay(&self, event: TransportEvent) -> Result<(), RuntimeError> {
        self.send(EngineEvent::Overlay(event)).await
    }

    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.send(EngineEvent::Shutdown).await
    }
}

pub struct Engine {
    swarm: Swarm,
    gossip: Option<GossipEngine>,
    events: mpsc::Receiver<EngineEvent>,
    outbound: mpsc::Sender<(ConnId, Outbound)>,
    /// Actions raised by the engine itself, sent ahead of the swarm's.
    pending: VecDeque<(ConnId, Outbound)>,
    started: Instant,
    unix_started: u64,
}

impl Engine {
    /// Wraps the engines. `unix_now` anchors the overlay's wall clock; the
    /// engine advances it with tokio's clock from then on.
    pub fn new(
        swarm: Swarm,
        gossip: Option<GossipEngine>,
        unix_now: u64,
    ) -> (Self, EngineHandle, mpsc::Receiver<(ConnId, Outbound)>) {
        Self::with_outbound_capacity(swarm, gossip, unix_now, OUTBOUND_CHANNEL_CAPACITY)
    }

    /// Like [`Engine::new`] with a bounded outbound channel of `capacity`.
    /// A full channel holds the engine back rather than dropping actions.
    pub fn with_outbound_capacity(
        swarm: Swarm,
        gossip: Option<GossipEngine>,
        unix_now: u64,
        capacity: usize,
    ) -> (Self, EngineHandle, mpsc::Receiver<(ConnId, Outbound)>) {
        let (tx, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (outbound, outbound_rx) = mpsc::channel(capacity.max(1));
        let engine = Self {
            swarm,
            gossip,
            events,
            outbound,
            pending: VecDeque::new(),
            started: Instant::now(),
            unix_started: unix_now,
        };
        (engine, EngineHandle { tx }, outbound_rx)
    }

    fn unix_now(&self) -> u64 {
        self.unix_started + self.started.elapsed().as_secs()
    }

    /// Runs until shut down, every handle is dropped, or the outbound
    /// receiver goes away. Hands the swarm back for inspection.
    pub async fn run(mut self) -> Swarm {
        let mut tick = interval(DOWNLOAD_TICK_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let first_round = match &self.gossip {
            Some(gossip) => gossip.next_interval(self.unix_now()),
            None => DOWNLOAD_TICK_INTERVAL,
        };
        let gossip_round = sleep(first_round);
        tokio::pin!(gossip_round);

        info!(peers = self.swarm.len(), gossip = self.gossip.is_some(), "engine running");

        loop {
            tokio::select! {
                event = self.events.recv() => {
                    match event {
                        None | Some(EngineEvent::Shutdown) => break,
                        Some(event) => self.handle_event(event),
                    }
                }
                _ = tick.tick() => {
                    self.swarm.tick(Instant::now().into_std());
                }
                _ = &mut gossip_round, if self.gossip.is_some() => {
                    let now = self.unix_now();
                    if let Some(gossip) = &mut self.gossip {
                        gossip.round(now);
                        let next = gossip.next_interval(now);
                        gossip_round.as_mut().reset(Instant::now() + next);
                    }
                }
            }

            if !self.flush().await {
                warn!("outbound receiver dropped, stopping engine");
                break;
            }
        }

        info!("engine stopped");
        self.swarm
    }

    fn handle_event(&mut self, event: EngineEvent) {
        let now = Instant::now().into_std();
        match event {
            EngineEvent::PeerConnected { conn, ip, peer_id } => {
                if let Err(e) = self.swarm.add_peer(conn, ip, peer_id, now) {
                    debug!(%conn, error = %e, "refusing peer");
                    // the swarm never saw this connection, so close it here
                    self.pending.push_back((conn, Outbound::Close));
                }
            }
            EngineEvent::PeerMessage { conn, message } => {
                if let Err(e) = self.swarm.handle_message(conn, message, now) {
                    debug!(%conn, error = %e, "peer message rejected");
                }
            }
            EngineEvent::PeerClosed { conn } => self.swarm.remove_peer(conn, now),
            EngineEvent::Overlay(event) => {
                let unix = self.unix_now();
                if let Some(gossip) = &mut self.gossip {
                    if let Err(e) = gossip.handle_event(event, unix) {
                        debug!(error = %e, "overlay event dropped");
                    }
                }
            }
            EngineEvent::SetUploadRate(rate) => self.swarm.set_upload_rate(rate),
            EngineEvent::Shutdown => {}
        }
    }

    async fn flush(&mut self) -> bool {
        let pending = std::mem::take(&mut self.pending);
        for action in pending.into_iter().chain(self.swarm.drain_outbound()) {
            if self.outbound.send(action).await.is_err() {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;
    use parking_lot::Mutex;

    use super::*;
    use crate::config::{DownloadConfig, GossipConfig, UploadConfig};
    use crate::gossip::{MemoryOverlayStore, OverlayTransport, PeerRecord, PermId, Preference};
    use crate::peer::{Bitfield, Chunk};
    use crate::storage::{MemoryPieceStore, PieceStore, RarestFirstPicker};

    fn seeder() -> Swarm {
        let data: Vec<u8> = (0..64u32).map(|i| i as u8).collect();
        let store = MemoryPieceStore::seeded(&data, 32, 16).unwrap();
        let picker = RarestFirstPicker::with_have(Bitfield::full(store.piece_count()));
        let download = DownloadConfig {
            chunk_size: 16,
            ..Default::default()
        };
        Swarm::new(
            download,
            UploadConfig::default(),
            Box::new(store),
            Box::new(picker),
            std::time::Instant::now(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_serves_a_peer() {
        let (engine, handle, mut outbound) = Engine::new(seeder(), None, 1_000_000);
        let task = tokio::spawn(engine.run());

        let conn = ConnId(7);
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 4, 1));
        handle.peer_connected(conn, ip, PeerId([7; 20])).await.unwrap();
        let (to, greeting) = outbound.recv().await.unwrap();
        assert_eq!(to, conn);
        assert!(matches!(greeting, Outbound::Send(Message::Bitfield(_))));

        handle.peer_message(conn, Message::Interested).await.unwrap();
        assert_eq!(
            outbound.recv().await.unwrap(),
            (conn, Outbound::Send(Message::Unchoke))
        );

        handle
            .peer_message(conn, Message::Request(Chunk::new(1, 0, 16)))
            .await
            .unwrap();
        let (_, served) = outbound.recv().await.unwrap();
        assert!(matches!(
            served,
            Outbound::Send(Message::HashPiece { piece: 1, offset: 0, .. })
        ));

        handle.shutdown().await.unwrap();
        let swarm = task.await.unwrap();
        assert_eq!(swarm.len(), 1);
        assert_eq!(swarm.uploader(conn).unwrap().uploaded(), 16);
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_closes_refused_peers() {
        let (engine, handle, mut outbound) = Engine::new(seeder(), None, 1_000_000);
        let task = tokio::spawn(engine.run());

        handle
            .peer_connected(ConnId(1), IpAddr::V4(Ipv4Addr::LOCALHOST), PeerId([1; 20]))
            .await
            .unwrap();
        outbound.recv().await.unwrap();
        // requesting without interest is a protocol violation
        handle
            .peer_message(ConnId(1), Message::Request(Chunk::new(0, 0, 16)))
            .await
            .unwrap();
        assert_eq!(
            outbound.recv().await.unwrap(),
            (ConnId(1), Outbound::Close)
        );

        handle.peer_closed(ConnId(1)).await.unwrap();
        drop(handle);
        let swarm = task.await.unwrap();
        assert!(swarm.is_empty());
    }

    /// A leecher that has already banned 10.0.4.1 for bad data.
    fn leecher_with_ban() -> Swarm {
        let now = std::time::Instant::now();
        let data: Vec<u8> = (0..64u32).map(|i| (i * 7) as u8).collect();
        let mut seed = MemoryPieceStore::seeded(&data, 16, 16).unwrap();
        let store = MemoryPieceStore::merkle(seed.merkle_root().unwrap(), 16).unwrap();
        let picker = RarestFirstPicker::new(store.piece_count());
        let download = DownloadConfig {
            chunk_size: 16,
            ..Default::default()
        };
        let mut swarm = Swarm::new(download, UploadConfig::default(), Box::new(store), Box::new(picker), now);

        let bad_ip = IpAddr::V4(Ipv4Addr::new(10, 0, 4, 1));
        for n in 1..=3u8 {
            let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 4, n));
            swarm.add_peer(ConnId(u64::from(n)), ip, PeerId([n; 20]), now).unwrap();
        }
        let x = ConnId(1);
        swarm
            .handle_message(x, Message::Bitfield(Bitfield::full(4).to_bytes()), now)
            .unwrap();
        swarm.handle_message(x, Message::Unchoke, now).unwrap();
        for round in 0..3u64 {
            let at = now + Duration::from_millis(100 * (round + 1));
            let chunk = swarm.download().downloader(x).unwrap().active_requests()[0];
            let mut bytes = seed.read(&chunk).unwrap().to_vec();
            bytes[0] ^= 0xFF;
            let message = Message::HashPiece {
                piece: chunk.piece,
                offset: chunk.offset,
                uncles: seed.uncles_for(chunk.piece).unwrap(),
                data: Bytes::from(bytes),
            };
            swarm.handle_message(x, message, at).unwrap();
        }
        assert!(swarm.download().is_banned(&bad_ip));

        for n in 1..=3u64 {
            swarm.remove_peer(ConnId(n), now);
        }
        swarm.drain_outbound();
        swarm
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_closes_banned_peers_when_outbound_is_full() {
        let (engine, handle, mut outbound) =
            Engine::with_outbound_capacity(leecher_with_ban(), None, 1_000_000, 1);
        let task = tokio::spawn(engine.run());

        let banned = IpAddr::V4(Ipv4Addr::new(10, 0, 4, 1));
        // the second refusal lands while the first close still fills the channel
        handle.peer_connected(ConnId(9), banned, PeerId([9; 20])).await.unwrap();
        handle.peer_connected(ConnId(10), banned, PeerId([10; 20])).await.unwrap();

        let mut closed = Vec::new();
        while closed.len() < 2 {
            let (conn, action) = tokio::time::timeout(Duration::from_secs(5), outbound.recv())
                .await
                .expect("close not delivered")
                .unwrap();
            if action == Outbound::Close {
                closed.push(conn);
            }
        }
        assert_eq!(closed, vec![ConnId(9), ConnId(10)]);

        handle.shutdown().await.unwrap();
        let swarm = task.await.unwrap();
        assert!(swarm.is_empty());
    }

    #[test]
    fn test_engine_is_send() {
        fn spawnable<T: Send + 'static>() {}
        spawnable::<Swarm>();
        spawnable::<Engine>();
    }

    #[derive(Clone, Default)]
    struct Dialled(Arc<Mutex<Vec<PermId>>>);

    impl OverlayTransport for Dialled {
        fn connect(&mut self, peer: &PermId) {
            self.0.lock().push(peer.clone());
        }

        fn send(&mut self, _peer: &PermId, _payload: Bytes) {}

        fn close(&mut self, _peer: &PermId) {}
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_runs_gossip_rounds() {
        let now = 1_000_000;
        let store = MemoryOverlayStore::new();
        store.add_my_preference(Preference::new([1; 20]));
        store.add_peer(PeerRecord {
            permid: PermId::new(&[9; 32]),
            ip: IpAddr::V4(Ipv4Addr::new(10, 0, 5, 9)),
            port: 7009,
            similarity: 0,
            last_seen: now - 10,
            last_buddycast: 0,
            oversion: 13,
            connected_times: 0,
            nfiles: 0,
        });
        let dialled = Dialled::default();
        let gossip = GossipEngine::new(
            GossipConfig::default(),
            PermId::new(&[1; 32]),
            Arc::new(store),
            Box::new(dialled.clone()),
            now,
        );

        let (engine, handle, _outbound) = Engine::new(seeder(), Some(gossip), now);
        let task = tokio::spawn(engine.run());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(*dialled.0.lock(), vec![PermId::new(&[9; 32])]);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }
}
