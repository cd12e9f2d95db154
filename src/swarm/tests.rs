use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, Instant};

use bytes::Bytes;

use super::*;
use crate::config::{DownloadConfig, UploadConfig};
use crate::peer::{Bitfield, Chunk, ConnId, Message, Outbound, PeerError, PeerId};
use crate::storage::{MemoryPieceStore, PieceStore, RarestFirstPicker};

fn ip(n: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(10, 0, 1, n))
}

fn content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 11 % 256) as u8).collect()
}

fn seeder(data: &[u8], piece_length: u64, chunk_size: u32, upload: UploadConfig, now: Instant) -> Swarm {
    let store = MemoryPieceStore::seeded(data, piece_length, chunk_size).unwrap();
    let picker = RarestFirstPicker::with_have(Bitfield::full(store.piece_count()));
    let download = DownloadConfig {
        chunk_size,
        ..Default::default()
    };
    Swarm::new(download, upload, Box::new(store), Box::new(picker), now)
}

fn leecher(seed: &MemoryPieceStore, chunk_size: u32, now: Instant) -> Swarm {
    let store = MemoryPieceStore::merkle(seed.merkle_root().unwrap(), chunk_size).unwrap();
    let picker = RarestFirstPicker::new(store.piece_count());
    let download = DownloadConfig {
        chunk_size,
        ..Default::default()
    };
    Swarm::new(download, UploadConfig::default(), Box::new(store), Box::new(picker), now)
}

fn sent(out: &[(ConnId, Outbound)], conn: ConnId) -> Vec<Message> {
    out.iter()
        .filter_map(|(c, o)| match o {
            Outbound::Send(m) if *c == conn => Some(m.clone()),
            _ => None,
        })
        .collect()
}

fn closed(out: &[(ConnId, Outbound)], conn: ConnId) -> bool {
    out.iter().any(|(c, o)| *c == conn && *o == Outbound::Close)
}

/// Two swarms joined by one connection, both sides calling it `LINK`.
struct Pair {
    a: Swarm,
    b: Swarm,
    open: bool,
    from_a: Vec<Message>,
    from_b: Vec<Message>,
}

const LINK: ConnId = ConnId(1);

impl Pair {
    fn connect(mut a: Swarm, mut b: Swarm, now: Instant) -> Self {
        a.add_peer(LINK, ip(2), PeerId([2; 20]), now).unwrap();
        b.add_peer(LINK, ip(1), PeerId([1; 20]), now).unwrap();
        Self {
            a,
            b,
            open: true,
            from_a: Vec::new(),
            from_b: Vec::new(),
        }
    }

    /// Moves messages both ways through the wire codec until both sides
    /// go quiet or the connection closes.
    fn run(&mut self, now: Instant) {
        for _ in 0..64 {
            let out_a = self.a.drain_outbound();
            let out_b = self.b.drain_outbound();
            if out_a.is_empty() && out_b.is_empty() {
                return;
            }
            for (_, action) in out_a {
                self.deliver(true, action, now);
            }
            for (_, action) in out_b {
                self.deliver(false, action, now);
            }
        }
    }

    fn deliver(&mut self, from_a: bool, action: Outbound, now: Instant) {
        if !self.open {
            return;
        }
        match action {
            Outbound::Send(message) => {
                let message = Message::decode(message.encode()).unwrap();
                let (log, to) = if from_a {
                    (&mut self.from_a, &mut self.b)
                } else {
                    (&mut self.from_b, &mut self.a)
                };
                log.push(message.clone());
                let _ = to.handle_message(LINK, message, now);
            }
            Outbound::Close => {
                self.open = false;
                self.a.remove_peer(LINK, now);
                self.b.remove_peer(LINK, now);
            }
        }
    }
}

#[test]
fn test_single_piece_handoff() {
    let now = Instant::now();
    let data = content(32);
    let seed_store = MemoryPieceStore::seeded(&data, 32, 32).unwrap();
    let seed = seeder(&data, 32, 32, UploadConfig::default(), now);
    let leech = leecher(&seed_store, 32, now);

    let mut pair = Pair::connect(seed, leech, now);
    pair.run(now);

    assert!(pair.from_b.contains(&Message::Interested));
    assert!(pair.from_a.contains(&Message::Unchoke));
    assert!(pair.from_b.contains(&Message::Request(Chunk::new(0, 0, 32))));
    assert!(pair
        .from_a
        .iter()
        .any(|m| matches!(m, Message::HashPiece { piece: 0, offset: 0, data: d, .. } if d[..] == data[..])));

    assert!(pair.b.download().store().have().complete());
    assert!(pair.b.is_complete());
    assert_eq!(pair.b.download().discarded(), 0);

    // both sides are seeds now, so the connection is dropped
    assert!(!pair.open);
    assert!(pair.a.is_empty());
    assert!(pair.b.is_empty());
}

#[test]
fn test_multi_piece_transfer() {
    let now = Instant::now();
    let data = content(200);
    let seed_store = MemoryPieceStore::seeded(&data, 64, 16).unwrap();
    let seed = seeder(&data, 64, 16, UploadConfig::default(), now);
    let leech = leecher(&seed_store, 16, now);

    let mut pair = Pair::connect(seed, leech, now);
    pair.run(now);

    assert!(pair.b.is_complete());
    assert_eq!(pair.b.download().store().amount_left(), 0);
    assert_eq!(pair.b.download().discarded(), 0);
    assert!(!pair.open);
}

#[test]
fn test_banned_address_is_rejected() {
    let now = Instant::now();
    let data = content(64);
    let mut seed_store = MemoryPieceStore::seeded(&data, 16, 16).unwrap();
    let mut swarm = leecher(&seed_store, 16, now);

    let x = ConnId(1);
    swarm.add_peer(x, ip(1), PeerId([1; 20]), now).unwrap();
    swarm.add_peer(ConnId(2), ip(2), PeerId([2; 20]), now).unwrap();
    swarm.add_peer(ConnId(3), ip(3), PeerId([3; 20]), now).unwrap();
    swarm
        .handle_message(x, Message::Bitfield(Bitfield::full(4).to_bytes()), now)
        .unwrap();
    swarm.handle_message(x, Message::Unchoke, now).unwrap();
    swarm.drain_outbound();

    for round in 0..3u64 {
        let at = now + Duration::from_millis(100 * (round + 1));
        let chunk = swarm.download().downloader(x).unwrap().active_requests()[0];
        let mut bad = seed_store.read(&chunk).unwrap().to_vec();
        bad[0] ^= 0xFF;
        let message = Message::HashPiece {
            piece: chunk.piece,
            offset: chunk.offset,
            uncles: seed_store.uncles_for(chunk.piece).unwrap(),
            data: Bytes::from(bad),
        };
        swarm.handle_message(x, message, at).unwrap();
    }

    assert!(swarm.download().is_banned(&ip(1)));
    assert!(closed(&swarm.drain_outbound(), x));

    swarm.remove_peer(x, now);
    assert!(matches!(
        swarm.add_peer(ConnId(9), ip(1), PeerId([9; 20]), now),
        Err(SwarmError::Banned(addr)) if addr == ip(1)
    ));
    assert!(swarm
        .add_peer(ConnId(10), ip(4), PeerId([4; 20]), now)
        .is_ok());
}

#[test]
fn test_dispatch_errors() {
    let now = Instant::now();
    let data = content(64);
    let mut swarm = seeder(&data, 32, 16, UploadConfig::default(), now);
    let conn = ConnId(5);
    swarm.add_peer(conn, ip(5), PeerId([5; 20]), now).unwrap();
    swarm.drain_outbound();

    assert!(matches!(
        swarm.handle_message(ConnId(99), Message::KeepAlive, now),
        Err(SwarmError::UnknownConnection(ConnId(99)))
    ));

    let unknown = Message::Unknown {
        id: 20,
        payload: Bytes::from_static(b"\x00d1:ai1ee"),
    };
    assert!(swarm.handle_message(conn, unknown, now).is_ok());
    assert!(swarm.drain_outbound().is_empty());

    // requesting without declaring interest
    assert!(matches!(
        swarm.handle_message(conn, Message::Request(Chunk::new(0, 0, 16)), now),
        Err(SwarmError::Peer(PeerError::Protocol(_)))
    ));
    assert!(closed(&swarm.drain_outbound(), conn));

    assert!(matches!(
        swarm.handle_message(conn, Message::Have { piece: 7 }, now),
        Err(SwarmError::Peer(_))
    ));
}

#[test]
fn test_completed_piece_announced_to_peers_lacking_it() {
    let now = Instant::now();
    let data = content(64);
    let mut seed_store = MemoryPieceStore::seeded(&data, 32, 16).unwrap();
    let mut swarm = leecher(&seed_store, 16, now);

    let a = ConnId(1);
    let b = ConnId(2);
    swarm.add_peer(a, ip(1), PeerId([1; 20]), now).unwrap();
    swarm.add_peer(b, ip(2), PeerId([2; 20]), now).unwrap();
    swarm
        .handle_message(a, Message::Bitfield(Bitfield::full(2).to_bytes()), now)
        .unwrap();
    swarm.handle_message(a, Message::Unchoke, now).unwrap();
    swarm.drain_outbound();

    let requested: Vec<Chunk> = swarm
        .download()
        .downloader(a)
        .unwrap()
        .active_requests()
        .iter()
        .filter(|c| c.piece == 0)
        .copied()
        .collect();
    assert_eq!(requested.len(), 2);
    for chunk in requested {
        let message = Message::HashPiece {
            piece: 0,
            offset: chunk.offset,
            uncles: seed_store.uncles_for(0).unwrap(),
            data: seed_store.read(&chunk).unwrap(),
        };
        swarm.handle_message(a, message, now).unwrap();
    }

    let out = swarm.drain_outbound();
    assert!(sent(&out, b).contains(&Message::Have { piece: 0 }));
    assert!(!sent(&out, a).contains(&Message::Have { piece: 0 }));
}

#[test]
fn test_uploads_respect_cap_and_share_it() {
    let start = Instant::now();
    let data = content(64);
    let upload = UploadConfig {
        upload_rate: 16,
        ..Default::default()
    };
    let mut swarm = seeder(&data, 32, 16, upload, start);
    let (p1, p2) = (ConnId(1), ConnId(2));
    for conn in [p1, p2] {
        swarm.add_peer(conn, ip(conn.0 as u8), PeerId([conn.0 as u8; 20]), start).unwrap();
        swarm.handle_message(conn, Message::Interested, start).unwrap();
    }
    let out = swarm.drain_outbound();
    assert!(sent(&out, p1).contains(&Message::Unchoke));
    assert!(sent(&out, p2).contains(&Message::Unchoke));

    // a two second burst covers two chunks
    swarm.handle_message(p1, Message::Request(Chunk::new(0, 0, 16)), start).unwrap();
    swarm.handle_message(p1, Message::Request(Chunk::new(0, 16, 16)), start).unwrap();
    swarm.handle_message(p1, Message::Request(Chunk::new(1, 0, 16)), start).unwrap();
    swarm.handle_message(p2, Message::Request(Chunk::new(1, 16, 16)), start).unwrap();
    let pieces = |out: &[(ConnId, Outbound)]| {
        out.iter()
            .filter(|(_, o)| matches!(o, Outbound::Send(Message::Piece { .. } | Message::HashPiece { .. })))
            .count()
    };
    assert_eq!(pieces(&swarm.drain_outbound()), 2);
    assert_eq!(swarm.uploader(p1).unwrap().queued(), 1);
    assert_eq!(swarm.uploader(p2).unwrap().queued(), 1);

    swarm.tick(start + Duration::from_secs(1));
    assert_eq!(pieces(&swarm.drain_outbound()), 1);

    swarm.tick(start + Duration::from_secs(2));
    assert_eq!(pieces(&swarm.drain_outbound()), 1);
    assert_eq!(swarm.uploader(p1).unwrap().queued(), 0);
    assert_eq!(swarm.uploader(p2).unwrap().queued(), 0);
}

#[test]
fn test_super_seeding_reveals_one_piece_at_a_time() {
    let now = Instant::now();
    let data = content(96);
    let upload = UploadConfig {
        super_seed: true,
        ..Default::default()
    };
    let mut swarm = seeder(&data, 32, 16, upload, now);
    let conn = ConnId(1);
    swarm.add_peer(conn, ip(1), PeerId([1; 20]), now).unwrap();
    assert!(swarm.drain_outbound().is_empty());

    swarm
        .handle_message(conn, Message::Bitfield(Bitfield::new(3).to_bytes()), now)
        .unwrap();
    assert_eq!(sent(&swarm.drain_outbound(), conn), vec![Message::Have { piece: 0 }]);

    swarm.handle_message(conn, Message::Interested, now).unwrap();
    swarm
        .handle_message(conn, Message::Request(Chunk::new(0, 0, 16)), now)
        .unwrap();
    let out = swarm.drain_outbound();
    assert!(sent(&out, conn)
        .iter()
        .any(|m| matches!(m, Message::HashPiece { piece: 0, .. })));

    swarm.handle_message(conn, Message::Have { piece: 0 }, now).unwrap();
    assert!(sent(&swarm.drain_outbound(), conn).contains(&Message::Have { piece: 1 }));
    assert_eq!(swarm.super_seeder().unwrap().assigned(conn), Some(1));

    assert!(swarm
        .handle_message(conn, Message::Request(Chunk::new(2, 0, 16)), now)
        .is_err());
    assert!(closed(&swarm.drain_outbound(), conn));
}

mod choker {
    use super::*;

    fn stats(download_rate: f64, upload_rate: f64, interested: bool) -> PeerStats {
        PeerStats {
            download_rate,
            upload_rate,
            interested,
            we_choking: true,
        }
    }

    #[test]
    fn test_fastest_get_regular_slots() {
        let now = Instant::now();
        let peers: Vec<(ConnId, PeerStats)> = vec![
            (ConnId(1), stats(100.0, 0.0, true)),
            (ConnId(2), stats(500.0, 0.0, true)),
            (ConnId(3), stats(300.0, 0.0, true)),
            (ConnId(4), stats(200.0, 0.0, true)),
            (ConnId(5), stats(900.0, 0.0, false)),
        ];
        let mut choker = Choker::new();
        let decisions = choker.rechoke(&peers, false, now);

        let unchoked: Vec<ConnId> = decisions
            .iter()
            .filter(|(_, unchoke)| *unchoke)
            .map(|(c, _)| *c)
            .collect();
        assert_eq!(unchoked.len(), 4);
        for conn in [ConnId(2), ConnId(3), ConnId(4)] {
            assert!(unchoked.contains(&conn));
        }
        // the only interested peer left takes the optimistic slot
        assert_eq!(choker.optimistic(), Some(ConnId(1)));
        assert!(!unchoked.contains(&ConnId(5)));
    }

    #[test]
    fn test_seeding_ranks_by_upload_rate() {
        let now = Instant::now();
        let peers: Vec<(ConnId, PeerStats)> = (1..=5)
            .map(|n| (ConnId(n), stats(0.0, n as f64 * 10.0, true)))
            .collect();
        let mut choker = Choker::new();
        let decisions = choker.rechoke(&peers, true, now);

        let unchoked: Vec<ConnId> = decisions
            .iter()
            .filter(|(_, unchoke)| *unchoke)
            .map(|(c, _)| *c)
            .collect();
        for conn in [ConnId(5), ConnId(4), ConnId(3)] {
            assert!(unchoked.contains(&conn));
        }
        assert_eq!(unchoked.len(), 4);
    }

    #[test]
    fn test_tick_waits_for_interval_and_reports_changes_only() {
        let now = Instant::now();
        let mut peers = vec![(ConnId(1), stats(10.0, 0.0, true))];
        let mut choker = Choker::new();

        assert_eq!(choker.tick(&peers, false, now), vec![(ConnId(1), true)]);
        peers[0].1.we_choking = false;
        assert!(choker.tick(&peers, false, now + Duration::from_secs(5)).is_empty());

        peers[0].1.interested = false;
        assert_eq!(
            choker.tick(&peers, false, now + Duration::from_secs(10)),
            vec![(ConnId(1), false)]
        );
        assert_eq!(choker.optimistic(), None);
    }
}
