use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use std::{collections::BTreeMap, env, fs, process, sync::Arc};

use super::*;
use crate::block::BlockFile;

fn test_store(name: &str) -> Store {
    let loc = {
        let mut loc = env::temp_dir();
        loc.push(format!("grove-btree-test-{}", process::id()));
        loc.push(name);
        fs::remove_file(&loc).ok();
        loc.into_os_string()
    };
    Store::new(0, Arc::new(BlockFile::create(&loc).unwrap()), false)
}

#[test]
fn test_btree_ops() {
    let seed: u64 = random();
    println!("test_btree_ops seed:{}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let store = test_store("btree-ops");
    let bt = Btree::new(8);
    let mut root = BLK_NOT_FOUND;
    let mut refmap: BTreeMap<Vec<u8>, u64> = BTreeMap::new();

    let n_ops = 5_000;
    for _ in 0..n_ops {
        let key = format!("key-{:06}", rng.gen::<u32>() % 2_000).into_bytes();
        match rng.gen::<u8>() % 4 {
            // insert/update with 3/4 probability.
            0..=2 => {
                let value = rng.gen::<u64>() >> 1;
                let (nroot, old) = bt.insert(&store, root, &key, value).unwrap();
                root = nroot;
                assert_eq!(old, refmap.insert(key, value));
            }
            3 => {
                let (nroot, old) = bt.remove(&store, root, &key).unwrap();
                root = nroot;
                assert_eq!(old, refmap.remove(&key));
            }
            _ => unreachable!(),
        }
    }

    // point lookups.
    for (key, value) in refmap.iter() {
        assert_eq!(bt.find(&store, root, key).unwrap(), Some(*value));
    }
    assert_eq!(bt.find(&store, root, b"missing-key").unwrap(), None);

    // full scan must match the reference in order.
    let mut cursor = bt.seek_ge(&store, root, Bound::Unbounded).unwrap();
    let mut scanned = vec![];
    while let Some((key, value)) = cursor.next(&bt, &store).unwrap() {
        scanned.push((key, value));
    }
    let expected: Vec<(Vec<u8>, u64)> =
        refmap.iter().map(|(k, v)| (k.clone(), *v)).collect();
    assert_eq!(scanned, expected);
}

#[test]
fn test_btree_seek() {
    let store = test_store("btree-seek");
    let bt = Btree::new(8);
    let mut root = BLK_NOT_FOUND;

    for i in (0..100_u64).step_by(2) {
        let key = format!("key-{:03}", i).into_bytes();
        root = bt.insert(&store, root, &key, i).unwrap().0;
    }

    // included bound on a present key.
    let mut cursor = bt
        .seek_ge(&store, root, Bound::Included(b"key-010".as_ref()))
        .unwrap();
    assert_eq!(cursor.next(&bt, &store).unwrap().unwrap().1, 10);

    // included bound between keys lands on the next one.
    let mut cursor = bt
        .seek_ge(&store, root, Bound::Included(b"key-011".as_ref()))
        .unwrap();
    assert_eq!(cursor.next(&bt, &store).unwrap().unwrap().1, 12);

    // excluded bound skips the exact match.
    let mut cursor = bt
        .seek_ge(&store, root, Bound::Excluded(b"key-010".as_ref()))
        .unwrap();
    assert_eq!(cursor.next(&bt, &store).unwrap().unwrap().1, 12);

    // bound past the last key exhausts immediately.
    let mut cursor = bt
        .seek_ge(&store, root, Bound::Included(b"key-999".as_ref()))
        .unwrap();
    assert!(cursor.next(&bt, &store).unwrap().is_none());
}

#[test]
fn test_btree_snapshot_isolation() {
    let store = test_store("btree-snapshot");
    let bt = Btree::new(8);
    let mut root = BLK_NOT_FOUND;

    for i in 0..500_u64 {
        let key = format!("key-{:04}", i).into_bytes();
        root = bt.insert(&store, root, &key, i).unwrap().0;
    }
    let snapshot = root;

    // keep mutating past the snapshot.
    for i in 0..500_u64 {
        let key = format!("key-{:04}", i).into_bytes();
        root = bt.insert(&store, root, &key, i + 10_000).unwrap().0;
    }
    for i in (0..500_u64).step_by(3) {
        let key = format!("key-{:04}", i).into_bytes();
        root = bt.remove(&store, root, &key).unwrap().0;
    }

    // the snapshot root still serves the old view.
    for i in 0..500_u64 {
        let key = format!("key-{:04}", i).into_bytes();
        assert_eq!(bt.find(&store, snapshot, &key).unwrap(), Some(i));
    }
}

#[test]
fn test_btree_drain() {
    let store = test_store("btree-drain");
    let bt = Btree::new(8);
    let mut root = BLK_NOT_FOUND;

    for i in 0..1_000_u64 {
        let key = format!("key-{:04}", i).into_bytes();
        root = bt.insert(&store, root, &key, i).unwrap().0;
    }
    for i in 0..999_u64 {
        let key = format!("key-{:04}", i).into_bytes();
        let (nroot, old) = bt.remove(&store, root, &key).unwrap();
        root = nroot;
        assert_eq!(old, Some(i));
    }

    // a single survivor collapses to a one-entry leaf root.
    let entry = bt.single_entry(&store, root).unwrap().unwrap();
    assert_eq!(entry, (b"key-0999".to_vec(), 999));

    let (root, old) = bt.remove(&store, root, b"key-0999").unwrap();
    assert_eq!(old, Some(999));
    assert_eq!(root, BLK_NOT_FOUND);
}

fn reverse_cmp(a: &[u8], b: &[u8]) -> std::cmp::Ordering {
    b.cmp(a)
}

#[test]
fn test_btree_custom_cmp() {
    let store = test_store("btree-cmp");
    let bt = Btree::with_cmp(8, Some(reverse_cmp));
    let mut root = BLK_NOT_FOUND;

    for i in 0..200_u64 {
        let key = format!("key-{:03}", i).into_bytes();
        root = bt.insert(&store, root, &key, i).unwrap().0;
    }

    for i in 0..200_u64 {
        let key = format!("key-{:03}", i).into_bytes();
        assert_eq!(bt.find(&store, root, &key).unwrap(), Some(i));
    }

    // scan comes out in reverse byte order.
    let mut cursor = bt.seek_ge(&store, root, Bound::Unbounded).unwrap();
    let mut prev: Option<Vec<u8>> = None;
    let mut count = 0;
    while let Some((key, _)) = cursor.next(&bt, &store).unwrap() {
        if let Some(prev) = prev {
            assert!(key < prev, "{:?} vs {:?}", key, prev);
        }
        prev = Some(key);
        count += 1;
    }
    assert_eq!(count, 200);
}
