//! Bitmap Codec Tests

use std::collections::BTreeSet;

use iqmesh_dpa::bitmap::{decode, encode};
use iqmesh_dpa::NodeBitmap;
use rand::seq::SliceRandom;
use rand::Rng;

#[test]
fn test_round_trip_random_subsets() {
    let mut rng = rand::thread_rng();
    let all: Vec<u8> = (0..=239).collect();

    for _ in 0..200 {
        let size = rng.gen_range(0..=all.len());
        let mut subset: Vec<u8> = all.choose_multiple(&mut rng, size).copied().collect();
        subset.shuffle(&mut rng);

        let expected: Vec<u8> = subset.iter().copied().collect::<BTreeSet<_>>().into_iter().collect();
        assert_eq!(decode(&encode(&subset).unwrap()), expected);
    }
}

#[test]
fn test_round_trip_edges() {
    assert!(decode(&encode(&[]).unwrap()).is_empty());

    let full: Vec<u8> = (0..=239).collect();
    assert_eq!(decode(&encode(&full).unwrap()), full);
    assert_eq!(NodeBitmap::from_addresses(&full).unwrap().len(), 240);
}

#[test]
fn test_duplicates_collapse() {
    assert_eq!(decode(&encode(&[5, 1, 5, 2]).unwrap()), vec![1, 2, 5]);
}

#[test]
fn test_from_short_slice_fails() {
    assert!(NodeBitmap::from_slice(&[0u8; 29]).is_err());
    let bitmap = NodeBitmap::from_slice(&[0xFFu8; 40]).unwrap();
    assert_eq!(bitmap.len(), 240);
}
