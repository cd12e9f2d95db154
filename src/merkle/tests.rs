use proptest::prelude::*;

use super::*;

fn pieces(count: usize, piece_length: usize) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| (0..piece_length).map(|j| (i * 31 + j) as u8).collect())
        .collect()
}

fn tree_over(pieces: &[Vec<u8>], piece_length: u64) -> MerkleTree {
    let leaves: Vec<Hash> = pieces.iter().map(|p| hash_piece(p)).collect();
    let total: u64 = pieces.iter().map(|p| p.len() as u64).sum();
    MerkleTree::build(&leaves, piece_length, total).unwrap()
}

#[test]
fn test_tree_shape_and_parent_invariant() {
    let data = pieces(5, 64);
    let tree = tree_over(&data, 64);

    assert_eq!(tree.leaf_count(), 8);
    assert_eq!(tree.hashes().len(), 15);
    assert_eq!(tree.hashes()[0], tree.root());

    for i in 0..7 {
        let mut joined = Vec::new();
        joined.extend_from_slice(&tree.hashes()[2 * i + 1]);
        joined.extend_from_slice(&tree.hashes()[2 * i + 2]);
        assert_eq!(tree.hashes()[i], hash_piece(&joined));
    }

    // leaves 5..8 are padding
    for leaf in 12..15 {
        assert_eq!(tree.hashes()[leaf], ZERO_HASH);
    }
}

#[test]
fn test_single_piece_torrent() {
    let data = vec![0xAAu8; 32];
    let tree = MerkleTree::from_data(&data, 32).unwrap();

    let uncles = tree.uncles_for(0).unwrap();
    assert_eq!(uncles.len(), 1);
    assert_eq!(uncles.entries()[0], (0, tree.root()));
    assert!(tree.verify(0, &data, &uncles).is_ok());
}

#[test]
fn test_uncle_list_walks_to_root() {
    let data = pieces(5, 16);
    let tree = tree_over(&data, 16);

    let uncles = tree.uncles_for(4).unwrap();
    let indices: Vec<u32> = uncles.entries().iter().map(|(i, _)| *i).collect();
    // leaf 4 lives at heap index 11; siblings 12, 6, 1
    assert_eq!(indices, vec![11, 12, 6, 1]);
    assert_eq!(uncles.len(), tree.verifier().height() + 1);
}

#[test]
fn test_every_piece_verifies_with_root_only() {
    let data = pieces(7, 40);
    let tree = tree_over(&data, 40);
    let root = MerkleRoot::new(tree.root(), 40, 7 * 40).unwrap();

    for (i, piece) in data.iter().enumerate() {
        let uncles = tree.uncles_for(i as u32).unwrap();
        assert!(root.is_valid(i as u32, piece, &uncles), "piece {}", i);
    }
}

#[test]
fn test_short_last_piece() {
    let data: Vec<u8> = (0..1000u32).map(|i| i as u8).collect();
    let tree = MerkleTree::from_data(&data, 300).unwrap();
    assert_eq!(tree.piece_count(), 4);

    let uncles = tree.uncles_for(3).unwrap();
    assert!(tree.verify(3, &data[900..], &uncles).is_ok());
}

#[test]
fn test_tampered_data_is_rejected() {
    let data = pieces(4, 32);
    let tree = tree_over(&data, 32);
    let uncles = tree.uncles_for(1).unwrap();

    let mut bad = data[1].clone();
    bad[5] ^= 0x01;
    assert!(matches!(
        tree.verify(1, &bad, &uncles),
        Err(MerkleError::LeafMismatch)
    ));
}

#[test]
fn test_wrong_piece_index_is_rejected() {
    let data = pieces(4, 32);
    let tree = tree_over(&data, 32);
    let uncles = tree.uncles_for(1).unwrap();

    assert!(matches!(
        tree.verify(2, &data[1], &uncles),
        Err(MerkleError::SiblingIndexMismatch { position: 0, .. })
    ));
    assert!(matches!(
        tree.verify(9, &data[1], &uncles),
        Err(MerkleError::InvalidPieceIndex(9))
    ));
}

#[test]
fn test_tampered_root_is_rejected() {
    let data = pieces(4, 32);
    let tree = tree_over(&data, 32);
    let uncles = tree.uncles_for(0).unwrap();

    let mut root = tree.root();
    root[0] ^= 0x80;
    let verifier = MerkleRoot::new(root, 32, 128).unwrap();
    assert!(matches!(
        verifier.verify(0, &data[0], &uncles),
        Err(MerkleError::RootMismatch)
    ));
}

#[test]
fn test_bad_uncle_list_length() {
    let data = pieces(4, 32);
    let tree = tree_over(&data, 32);
    let mut entries = tree.uncles_for(0).unwrap().entries().to_vec();
    entries.pop();

    assert!(matches!(
        tree.verify(0, &data[0], &UncleList::new(entries)),
        Err(MerkleError::BadUncleListLength {
            expected: 3,
            actual: 2
        })
    ));
}

#[test]
fn test_invalid_geometry() {
    assert!(matches!(
        MerkleTree::build(&[ZERO_HASH], 0, 10),
        Err(MerkleError::InvalidPieceLength { .. })
    ));
    assert!(matches!(
        MerkleTree::build(&[ZERO_HASH; 2], 10, 10),
        Err(MerkleError::PieceCountMismatch {
            expected: 1,
            actual: 2
        })
    ));
    assert!(MerkleRoot::new(ZERO_HASH, 16, 0).is_err());
}

#[test]
fn test_uncle_list_bencode() {
    let tree = MerkleTree::from_data(&[1u8; 100], 25).unwrap();
    let uncles = tree.uncles_for(2).unwrap();

    let encoded = uncles.to_bencode();
    assert_eq!(UncleList::from_bencode(&encoded).unwrap(), uncles);

    assert!(UncleList::from_bencode(b"li1ee").is_err());
    assert!(UncleList::from_bencode(b"lli-1e20:aaaaaaaaaaaaaaaaaaaaee").is_err());
    assert!(UncleList::from_bencode(b"lli1e3:abcee").is_err());
}

proptest! {
    #[test]
    fn prop_uncles_verify_iff_hash_matches(
        count in 1usize..40,
        piece in any::<prop::sample::Index>(),
        seed in any::<u8>(),
    ) {
        let data: Vec<Vec<u8>> = (0..count)
            .map(|i| vec![seed.wrapping_add(i as u8); 24])
            .collect();
        let tree = tree_over(&data, 24);
        let p = piece.index(count);
        let uncles = tree.uncles_for(p as u32).unwrap();

        prop_assert!(tree.verify(p as u32, &data[p], &uncles).is_ok());

        let mut other = data[p].clone();
        other.push(0);
        prop_assert!(tree.verify(p as u32, &other, &uncles).is_err());
    }

    #[test]
    fn prop_any_uncle_hash_flip_fails(
        count in 2usize..40,
        piece in any::<prop::sample::Index>(),
        entry in any::<prop::sample::Index>(),
        byte in 0usize..20,
        bit in 0u8..8,
    ) {
        let data: Vec<Vec<u8>> = (0..count).map(|i| vec![i as u8; 16]).collect();
        let tree = tree_over(&data, 16);
        let p = piece.index(count);
        let mut entries = tree.uncles_for(p as u32).unwrap().entries().to_vec();

        let e = entry.index(entries.len());
        entries[e].1[byte] ^= 1 << bit;

        prop_assert!(tree.verify(p as u32, &data[p], &UncleList::new(entries)).is_err());
    }
}
