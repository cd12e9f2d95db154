use std::net::{IpAddr, Ipv4Addr};

use super::*;
use crate::merkle::hash_piece;

fn sample_data() -> Vec<u8> {
    (0..100u32).map(|i| (i * 7 % 251) as u8).collect()
}

fn source(n: u64) -> ChunkSource {
    ChunkSource::new(ConnId(n), IpAddr::V4(Ipv4Addr::new(10, 0, 0, n as u8)))
}

/// Seeder and an empty Merkle leecher over 100 bytes: pieces of 32, chunks of 16.
fn pair() -> (MemoryPieceStore, MemoryPieceStore) {
    let seed = MemoryPieceStore::seeded(&sample_data(), 32, 16).unwrap();
    let leech = MemoryPieceStore::merkle(seed.merkle_root().unwrap(), 16).unwrap();
    (seed, leech)
}

#[test]
fn test_reservations_walk_chunks_in_order() {
    let (_, mut leech) = pair();

    assert_eq!(leech.new_request(0), Some(Chunk::new(0, 0, 16)));
    assert_eq!(leech.new_request(0), Some(Chunk::new(0, 16, 16)));
    assert_eq!(leech.new_request(0), None);
    assert_eq!(leech.outstanding(), 2);
    assert!(!leech.do_i_have_requests(0));
    assert!(leech.do_i_have_requests(1));
    // reserved but nothing held yet
    assert!(leech.dirty().is_empty());

    leech.request_lost(&Chunk::new(0, 16, 16));
    assert_eq!(leech.outstanding(), 1);
    assert!(leech.do_i_have_requests(0));
    assert_eq!(leech.new_request(0), Some(Chunk::new(0, 16, 16)));
}

#[test]
fn test_short_last_piece() {
    let (_, mut leech) = pair();

    assert_eq!(leech.piece_count(), 4);
    assert_eq!(leech.piece_size(3), 4);
    assert_eq!(leech.new_request(3), Some(Chunk::new(3, 0, 4)));
    assert_eq!(leech.new_request(3), None);
    assert_eq!(leech.new_request(4), None);
}

#[test]
fn test_endgame_once_everything_is_reserved() {
    let (_, mut leech) = pair();

    let mut all = Vec::new();
    for piece in 0..4 {
        while let Some(chunk) = leech.new_request(piece) {
            all.push(chunk);
        }
        assert_eq!(leech.is_endgame(), piece == 3);
    }
    assert_eq!(all.len(), 7);
    assert!(leech.is_endgame());

    leech.reset_endgame(&all);
    assert_eq!(leech.outstanding(), 0);
    assert!(!leech.is_endgame());
}

#[test]
fn test_piece_completes_with_merkle_uncles() {
    let (mut seed, mut leech) = pair();
    let data = sample_data();

    let first = leech.new_request(1).unwrap();
    let second = leech.new_request(1).unwrap();
    let uncles = seed.uncles_for(1);

    let payload = seed.read(&first).unwrap();
    let outcome = leech
        .piece_came_in(&first, uncles.as_ref(), &payload, source(1))
        .unwrap();
    assert_eq!(outcome, ChunkOutcome::Partial);
    assert_eq!(leech.dirty(), vec![1]);

    let payload = seed.read(&second).unwrap();
    let outcome = leech
        .piece_came_in(&second, None, &payload, source(2))
        .unwrap();
    assert_eq!(
        outcome,
        ChunkOutcome::Complete {
            sources: vec![source(1), source(2)]
        }
    );

    assert!(leech.do_i_have(1));
    assert_eq!(leech.outstanding(), 0);
    assert_eq!(leech.amount_left(), 68);
    assert_eq!(leech.read_piece(1).unwrap().as_ref(), &data[32..64]);
    assert_eq!(leech.uncles_for(1), uncles);
    assert!(leech.dirty().is_empty());
}

#[test]
fn test_corrupt_piece_flunks_and_is_released() {
    let (mut seed, mut leech) = pair();

    let first = leech.new_request(1).unwrap();
    let second = leech.new_request(1).unwrap();
    let uncles = seed.uncles_for(1);

    let good = seed.read(&first).unwrap();
    leech
        .piece_came_in(&first, uncles.as_ref(), &good, source(1))
        .unwrap();

    let mut bad = seed.read(&second).unwrap().to_vec();
    bad[3] ^= 0x40;
    let outcome = leech.piece_came_in(&second, None, &bad, source(2)).unwrap();

    assert_eq!(
        outcome,
        ChunkOutcome::Flunked {
            sources: vec![source(1), source(2)]
        }
    );
    assert!(!outcome.is_ok());
    assert!(!leech.do_i_have(1));
    assert!(leech.uncles_for(1).is_none());
    assert_eq!(leech.new_request(1), Some(Chunk::new(1, 0, 16)));
}

#[test]
fn test_merkle_piece_without_uncles_flunks() {
    let (mut seed, mut leech) = pair();

    let chunk = leech.new_request(3).unwrap();
    let payload = seed.read(&chunk).unwrap();
    let outcome = leech.piece_came_in(&chunk, None, &payload, source(1)).unwrap();

    assert!(matches!(outcome, ChunkOutcome::Flunked { .. }));
}

#[test]
fn test_duplicate_chunks_are_not_rewritten() {
    let (mut seed, mut leech) = pair();
    let uncles = seed.uncles_for(0);

    let chunk = leech.new_request(0).unwrap();
    let payload = seed.read(&chunk).unwrap();
    leech
        .piece_came_in(&chunk, uncles.as_ref(), &payload, source(1))
        .unwrap();
    let again = leech
        .piece_came_in(&chunk, None, &payload, source(2))
        .unwrap();
    assert_eq!(again, ChunkOutcome::Duplicate);

    let rest = leech.new_request(0).unwrap();
    let payload = seed.read(&rest).unwrap();
    let outcome = leech.piece_came_in(&rest, None, &payload, source(1)).unwrap();
    assert_eq!(
        outcome,
        ChunkOutcome::Complete {
            sources: vec![source(1)]
        }
    );

    let late = leech.piece_came_in(&rest, None, &payload, source(3)).unwrap();
    assert_eq!(late, ChunkOutcome::Duplicate);
}

#[test]
fn test_invalid_chunks_are_rejected() {
    let (mut seed, mut leech) = pair();

    let result = leech.piece_came_in(&Chunk::new(0, 0, 16), None, &[0u8; 8], source(1));
    assert!(matches!(result, Err(StorageError::InvalidChunk { .. })));

    let result = leech.piece_came_in(&Chunk::new(0, 8, 16), None, &[0u8; 16], source(1));
    assert!(matches!(result, Err(StorageError::InvalidChunk { .. })));

    let result = leech.piece_came_in(&Chunk::new(9, 0, 16), None, &[0u8; 16], source(1));
    assert!(matches!(result, Err(StorageError::InvalidPieceIndex(9))));

    assert!(matches!(
        leech.read(&Chunk::new(0, 0, 16)),
        Err(StorageError::NotAvailable(0))
    ));
    assert!(matches!(
        seed.read(&Chunk::new(3, 0, 16)),
        Err(StorageError::InvalidChunk { .. })
    ));
}

#[test]
fn test_flat_piece_hashes() {
    let data = sample_data();
    let hashes: Vec<_> = data.chunks(32).map(hash_piece).collect();
    let mut store =
        MemoryPieceStore::new(Integrity::PieceHashes(hashes), 32, 100, 32).unwrap();

    let chunk = store.new_request(0).unwrap();
    assert_eq!(chunk, Chunk::new(0, 0, 32));
    let outcome = store
        .piece_came_in(&chunk, None, &data[..32], source(1))
        .unwrap();
    assert!(matches!(outcome, ChunkOutcome::Complete { .. }));
    assert!(store.uncles_for(0).is_none());

    let chunk = store.new_request(1).unwrap();
    let outcome = store
        .piece_came_in(&chunk, None, &data[..32], source(1))
        .unwrap();
    assert!(matches!(outcome, ChunkOutcome::Flunked { .. }));
}

#[test]
fn test_geometry_mismatch_is_fatal() {
    let result = MemoryPieceStore::new(Integrity::PieceHashes(vec![[0u8; 20]]), 32, 64, 16);
    assert!(matches!(result, Err(StorageError::Geometry { .. })));

    let result = MemoryPieceStore::seeded(&[], 32, 16);
    assert!(result.is_err());
}

#[test]
fn test_seeded_store_serves_everything() {
    let (mut seed, _) = pair();

    assert!(seed.have().complete());
    assert_eq!(seed.amount_left(), 0);
    assert!(!seed.is_endgame());
    assert_eq!(seed.new_request(0), None);
    assert_eq!(seed.read_piece(3).unwrap().len(), 4);
    assert_eq!(seed.uncles_for(3).unwrap().len(), 3);
}

fn has_all(_: u32) -> bool {
    true
}

#[test]
fn test_picker_prefers_rarest() {
    let mut picker = RarestFirstPicker::new(4);
    for piece in [0, 0, 1, 2, 2, 2] {
        picker.got_have(piece);
    }
    let mut theirs = Bitfield::new(4);
    for piece in 0..3 {
        theirs.set(piece);
    }

    assert_eq!(picker.next(&theirs, &has_all, ConnId(1), false), Some(1));
    assert_eq!(picker.availability(2), 3);

    picker.lost_have(2);
    picker.lost_have(2);
    picker.lost_have(2);
    assert_eq!(picker.next(&theirs, &has_all, ConnId(1), false), Some(2));
}

#[test]
fn test_picker_finishes_started_pieces_first() {
    let mut picker = RarestFirstPicker::new(3);
    picker.got_have(2);
    let theirs = Bitfield::full(3);

    picker.requested(2);
    assert_eq!(picker.next(&theirs, &has_all, ConnId(1), false), Some(2));
    assert_eq!(picker.next(&theirs, &has_all, ConnId(1), true), Some(2));

    // a started piece with nothing left to reserve no longer counts
    let none_left = |p: u32| p != 2;
    assert_eq!(picker.next(&theirs, &none_left, ConnId(1), false), Some(0));
    assert_eq!(picker.next(&theirs, &none_left, ConnId(1), true), None);

    picker.complete(2);
    assert_eq!(picker.next(&theirs, &has_all, ConnId(1), true), None);
}

#[test]
fn test_picker_bump_and_block() {
    let mut picker = RarestFirstPicker::new(3);
    let theirs = Bitfield::full(3);

    assert_eq!(picker.next(&theirs, &has_all, ConnId(1), false), Some(0));
    picker.bump(0);
    assert_eq!(picker.next(&theirs, &has_all, ConnId(1), false), Some(1));

    picker.block(1);
    assert!(picker.is_blocked(1));
    assert_eq!(picker.next(&theirs, &has_all, ConnId(1), false), Some(2));
    picker.unblock(1);
    assert!(!picker.is_blocked(1));
}

#[test]
fn test_picker_seed_accounting() {
    let mut picker = RarestFirstPicker::new(3);
    let full = Bitfield::full(3);
    for piece in full.iter() {
        picker.got_have(piece as u32);
    }

    picker.became_seed(&full);
    assert_eq!(picker.seeds(), 1);
    assert_eq!(picker.availability(0), 1);

    picker.lost_seed();
    assert_eq!(picker.availability(0), 0);
}

#[test]
fn test_picker_completion() {
    let mut picker = RarestFirstPicker::with_have(Bitfield::full(2));
    assert!(picker.am_i_complete());
    assert_eq!(picker.next(&Bitfield::full(2), &has_all, ConnId(1), false), None);

    let mut picker = RarestFirstPicker::new(2);
    picker.complete(0);
    assert!(!picker.am_i_complete());
    picker.complete(1);
    assert!(picker.am_i_complete());
}
