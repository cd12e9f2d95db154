use std::time::Instant;

use super::*;
use crate::config::UploadConfig;
use crate::merkle::{hash_piece, MerkleTree};
use crate::peer::{Bitfield, Chunk, ConnId, Message, PeerError};
use crate::storage::{Integrity, MemoryPieceStore, StorageError};

fn content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

fn seed_store(len: usize, piece_length: u64) -> MemoryPieceStore {
    MemoryPieceStore::seeded(&content(len), piece_length, 16).unwrap()
}

fn uploader(store: &MemoryPieceStore, config: &UploadConfig) -> PeerUploader {
    PeerUploader::new(ConnId(1), config, store, Instant::now())
}

fn ready(store: &MemoryPieceStore, config: &UploadConfig) -> PeerUploader {
    let mut up = uploader(store, config);
    up.on_interested();
    assert_eq!(up.unchoke(), Some(Message::Unchoke));
    up
}

#[test]
fn test_greeting() {
    let seed = seed_store(64, 32);
    let up = uploader(&seed, &UploadConfig::default());
    match up.greeting(&seed) {
        Some(Message::Bitfield(bits)) => {
            let have = Bitfield::from_bytes(&bits, 2).unwrap();
            assert!(have.complete());
        }
        other => panic!("expected bitfield, got {:?}", other),
    }

    let empty = MemoryPieceStore::merkle(seed.merkle_root().unwrap(), 16).unwrap();
    let up = uploader(&empty, &UploadConfig::default());
    assert_eq!(up.greeting(&empty), None);

    let config = UploadConfig {
        super_seed: true,
        ..Default::default()
    };
    let up = uploader(&seed, &config);
    assert!(up.is_super_seeding());
    assert_eq!(up.greeting(&seed), None);

    // a partial seed never super-seeds
    let up = uploader(&empty, &config);
    assert!(!up.is_super_seeding());
}

#[test]
fn test_request_rules() {
    let seed = seed_store(64, 32);
    let config = UploadConfig {
        max_slice_length: 16,
        ..Default::default()
    };

    let mut up = uploader(&seed, &config);
    assert!(matches!(
        up.on_request(Chunk::new(0, 0, 16)),
        Err(PeerError::Protocol(_))
    ));

    let mut up = ready(&seed, &config);
    assert!(up.on_request(Chunk::new(0, 0, 17)).is_err());
    assert!(up.on_request(Chunk::new(0, 0, 16)).is_ok());
    assert_eq!(up.queued(), 1);
    assert!(up.has_queries());
}

#[test]
fn test_requests_while_choked_are_dropped() {
    let seed = seed_store(64, 32);
    let mut up = uploader(&seed, &UploadConfig::default());
    up.on_interested();

    assert!(up.on_request(Chunk::new(0, 0, 16)).is_ok());
    assert_eq!(up.queued(), 0);
}

#[test]
fn test_serves_hashpiece_then_piece() {
    let mut seed = seed_store(64, 32);
    let mut up = ready(&seed, &UploadConfig::default());
    up.on_request(Chunk::new(1, 0, 16)).unwrap();
    up.on_request(Chunk::new(1, 16, 16)).unwrap();

    let now = Instant::now();
    let expected = content(64);
    let tree = MerkleTree::from_data(&expected, 32).unwrap();

    match up.next_chunk(&mut seed, now).unwrap() {
        Some(Message::HashPiece {
            piece: 1,
            offset: 0,
            uncles,
            data,
        }) => {
            assert_eq!(uncles, tree.uncles_for(1).unwrap());
            assert_eq!(&data[..], &expected[32..48]);
        }
        other => panic!("expected hashpiece, got {:?}", other),
    }
    match up.next_chunk(&mut seed, now).unwrap() {
        Some(Message::Piece {
            piece: 1,
            offset: 16,
            data,
        }) => assert_eq!(&data[..], &expected[48..64]),
        other => panic!("expected piece, got {:?}", other),
    }

    assert_eq!(up.next_chunk(&mut seed, now).unwrap(), None);
    assert_eq!(up.uploaded(), 32);
}

#[test]
fn test_unbuffered_reads() {
    let mut seed = seed_store(64, 32);
    let config = UploadConfig {
        buffer_reads: false,
        ..Default::default()
    };
    let mut up = ready(&seed, &config);
    up.on_request(Chunk::new(0, 16, 16)).unwrap();

    match up.next_chunk(&mut seed, Instant::now()).unwrap() {
        Some(Message::Piece { data, .. }) => assert_eq!(&data[..], &content(64)[16..32]),
        other => panic!("expected piece, got {:?}", other),
    }
}

#[test]
fn test_missing_piece_fails_read() {
    let seed = seed_store(64, 32);
    let mut flat = MemoryPieceStore::new(
        Integrity::PieceHashes(vec![
            hash_piece(&content(64)[..32]),
            hash_piece(&content(64)[32..]),
        ]),
        32,
        64,
        16,
    )
    .unwrap();
    let mut up = ready(&seed, &UploadConfig::default());
    up.on_request(Chunk::new(0, 0, 16)).unwrap();

    // nothing stored yet
    assert!(matches!(
        up.next_chunk(&mut flat, Instant::now()),
        Err(StorageError::NotAvailable(0))
    ));
}

#[test]
fn test_out_of_range_request_fails_read() {
    let mut seed = seed_store(64, 32);
    let mut up = ready(&seed, &UploadConfig::default());
    up.on_request(Chunk::new(1, 24, 16)).unwrap();

    assert!(matches!(
        up.next_chunk(&mut seed, Instant::now()),
        Err(StorageError::InvalidChunk { piece: 1, .. })
    ));
}

#[test]
fn test_cancel_and_choke() {
    let mut seed = seed_store(64, 32);
    let mut up = ready(&seed, &UploadConfig::default());
    up.on_request(Chunk::new(0, 0, 16)).unwrap();
    up.on_request(Chunk::new(0, 16, 16)).unwrap();

    up.on_cancel(&Chunk::new(0, 0, 16));
    assert_eq!(up.queued(), 1);

    assert_eq!(up.choke(), Some(Message::Choke));
    assert_eq!(up.choke(), None);
    assert_eq!(up.queued(), 0);
    assert_eq!(up.next_chunk(&mut seed, Instant::now()).unwrap(), None);

    assert_eq!(up.unchoke(), Some(Message::Unchoke));
    assert_eq!(up.unchoke(), None);
}

#[test]
fn test_not_interested_drops_queue() {
    let seed = seed_store(64, 32);
    let mut up = ready(&seed, &UploadConfig::default());
    up.on_request(Chunk::new(0, 0, 16)).unwrap();

    up.on_not_interested();
    assert!(!up.is_interested());
    assert!(up.was_ever_interested());
    assert_eq!(up.queued(), 0);
}

#[test]
fn test_super_seed_only_serves_revealed() {
    let seed = seed_store(64, 32);
    let config = UploadConfig {
        super_seed: true,
        ..Default::default()
    };
    let mut up = ready(&seed, &config);

    assert!(up.on_request(Chunk::new(1, 0, 16)).is_err());
    assert_eq!(up.reveal(1), Message::Have { piece: 1 });
    assert!(up.on_request(Chunk::new(1, 0, 16)).is_ok());
    assert!(up.revealed().contains(&1));
}

#[test]
fn test_super_seeder_spreads_reveals() {
    let mut seeder = SuperSeeder::new(3);
    let none = Bitfield::new(3);

    assert_eq!(seeder.next_reveal(ConnId(1), &none), Some(0));
    assert_eq!(seeder.next_reveal(ConnId(2), &none), Some(1));
    assert_eq!(seeder.next_reveal(ConnId(3), &none), Some(2));
    assert_eq!(seeder.next_reveal(ConnId(4), &none), Some(0));
    assert_eq!(seeder.reveal_count(0), 2);

    let mut has_one = Bitfield::new(3);
    has_one.set(1);
    assert_eq!(seeder.next_reveal(ConnId(5), &has_one), Some(2));
    assert_eq!(seeder.assigned(ConnId(5)), Some(2));
}

#[test]
fn test_super_seeder_advances_on_have() {
    let mut seeder = SuperSeeder::new(2);
    let mut have = Bitfield::new(2);
    assert_eq!(seeder.next_reveal(ConnId(1), &have), Some(0));

    // another peer passing piece 0 along
    assert!(!seeder.on_have(ConnId(2), 0));
    assert_eq!(seeder.spread(0), 1);

    assert!(seeder.on_have(ConnId(1), 0));
    assert!(!seeder.has_assignment(ConnId(1)));
    have.set(0);
    assert_eq!(seeder.next_reveal(ConnId(1), &have), Some(1));

    have.set(1);
    seeder.disconnected(ConnId(1));
    assert_eq!(seeder.next_reveal(ConnId(1), &have), None);
}
