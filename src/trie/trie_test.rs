use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use std::{collections::BTreeMap, env, fs, process, sync::Arc};

use super::*;
use crate::block::{BlockFile, Store};

fn test_store(name: &str) -> Store {
    let loc = {
        let mut loc = env::temp_dir();
        loc.push(format!("grove-trie-test-{}", process::id()));
        loc.push(name);
        fs::remove_file(&loc).ok();
        loc.into_os_string()
    };
    Store::new(0, Arc::new(BlockFile::create(&loc).unwrap()), false)
}

fn full_scan(trie: &Hbtrie, store: &Store, root: u64) -> Vec<(Vec<u8>, u64)> {
    let mut iter = trie.iter(store, root, Bound::Unbounded).unwrap();
    let mut items = vec![];
    while let Some(item) = iter.next(trie, store).unwrap() {
        items.push(item);
    }
    items
}

#[test]
fn test_trie_ops() {
    let seed: u64 = random();
    println!("test_trie_ops seed:{}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let store = test_store("trie-ops");
    let trie = Hbtrie::new(8, 8, None);
    let mut root = BLK_NOT_FOUND;
    let mut refmap: BTreeMap<Vec<u8>, u64> = BTreeMap::new();

    // keys drawn from clusters sharing 8- and 16-byte prefixes, plus
    // short keys, to exercise promotion across several depths.
    let n_ops = 3_000;
    for _ in 0..n_ops {
        let key: Vec<u8> = match rng.gen::<u8>() % 4 {
            0 => format!("k{}", rng.gen::<u32>() % 100).into_bytes(),
            1 => format!("cluster-{:03}", rng.gen::<u32>() % 100).into_bytes(),
            2 => format!("cluster-shared--{:05}", rng.gen::<u32>() % 100).into_bytes(),
            3 => format!("cluster-shared--deep----{:07}", rng.gen::<u32>() % 100)
                .into_bytes(),
            _ => unreachable!(),
        };
        match rng.gen::<u8>() % 4 {
            0..=2 => {
                let offset = rng.gen::<u64>() >> 1;
                let (nroot, old) = trie.insert(&store, root, &key, offset).unwrap();
                root = nroot;
                assert_eq!(old, refmap.insert(key, offset), "seed {}", seed);
            }
            3 => {
                let (nroot, old) = trie.remove(&store, root, &key).unwrap();
                root = nroot;
                assert_eq!(old, refmap.remove(&key), "seed {}", seed);
            }
            _ => unreachable!(),
        }
    }

    for (key, offset) in refmap.iter() {
        assert_eq!(trie.find(&store, root, key).unwrap(), Some(*offset));
    }
    assert_eq!(trie.find(&store, root, b"absent-key-000").unwrap(), None);

    let expected: Vec<(Vec<u8>, u64)> =
        refmap.iter().map(|(k, v)| (k.clone(), *v)).collect();
    assert_eq!(full_scan(&trie, &store, root), expected, "seed {}", seed);
}

#[test]
fn test_trie_promotion_demotion() {
    let store = test_store("trie-promote");
    let trie = Hbtrie::new(8, 8, None);
    let mut root = BLK_NOT_FOUND;

    // a lone key stays inline.
    root = trie.insert(&store, root, b"aaaaaaaa-one", 1).unwrap().0;
    assert_eq!(trie.find(&store, root, b"aaaaaaaa-one").unwrap(), Some(1));

    // a second key sharing the first chunk forces a sub-tree.
    root = trie.insert(&store, root, b"aaaaaaaa-two", 2).unwrap().0;
    assert_eq!(trie.find(&store, root, b"aaaaaaaa-one").unwrap(), Some(1));
    assert_eq!(trie.find(&store, root, b"aaaaaaaa-two").unwrap(), Some(2));

    // a key ending exactly at the chunk boundary lands on the empty
    // fragment inside the sub-tree.
    root = trie.insert(&store, root, b"aaaaaaaa", 3).unwrap().0;
    assert_eq!(trie.find(&store, root, b"aaaaaaaa").unwrap(), Some(3));

    // prefix ordering: "aaaaaaaa" < "aaaaaaaa-one" < "aaaaaaaa-two".
    let scan = full_scan(&trie, &store, root);
    let keys: Vec<&[u8]> = scan.iter().map(|(k, _)| k.as_slice()).collect();
    assert_eq!(keys, vec![&b"aaaaaaaa"[..], b"aaaaaaaa-one", b"aaaaaaaa-two"]);

    // removals demote the sub-tree back to an inline suffix.
    root = trie.remove(&store, root, b"aaaaaaaa").unwrap().0;
    let (nroot, old) = trie.remove(&store, root, b"aaaaaaaa-one").unwrap();
    root = nroot;
    assert_eq!(old, Some(1));
    assert_eq!(trie.find(&store, root, b"aaaaaaaa-two").unwrap(), Some(2));
    assert_eq!(trie.find(&store, root, b"aaaaaaaa-one").unwrap(), None);

    let (root, old) = trie.remove(&store, root, b"aaaaaaaa-two").unwrap();
    assert_eq!(old, Some(2));
    assert_eq!(root, BLK_NOT_FOUND);
}

#[test]
fn test_trie_iter_bounds() {
    let store = test_store("trie-bounds");
    let trie = Hbtrie::new(8, 8, None);
    let mut root = BLK_NOT_FOUND;

    for i in 0..50_u64 {
        let key = format!("shared--key-{:03}", i).into_bytes();
        root = trie.insert(&store, root, &key, i).unwrap().0;
    }

    let from = b"shared--key-010".to_vec();
    let mut iter = trie.iter(&store, root, Bound::Included(&from)).unwrap();
    let mut offsets = vec![];
    while let Some((_, offset)) = iter.next(&trie, &store).unwrap() {
        offsets.push(offset);
    }
    assert_eq!(offsets, (10..50).collect::<Vec<u64>>());

    let mut iter = trie.iter(&store, root, Bound::Excluded(&from)).unwrap();
    assert_eq!(iter.next(&trie, &store).unwrap().unwrap().1, 11);
}

fn reverse_cmp(a: &[u8], b: &[u8]) -> std::cmp::Ordering {
    b.cmp(a)
}

#[test]
fn test_trie_custom_cmp() {
    let store = test_store("trie-cmp");
    let trie = Hbtrie::new(8, 8, Some(reverse_cmp));
    let mut root = BLK_NOT_FOUND;

    for i in 0..100_u64 {
        let key = format!("{:08}", i).into_bytes();
        root = trie.insert(&store, root, &key, i).unwrap().0;
    }

    for i in 0..100_u64 {
        let key = format!("{:08}", i).into_bytes();
        assert_eq!(trie.find(&store, root, &key).unwrap(), Some(i));
    }

    let scan = full_scan(&trie, &store, root);
    let offsets: Vec<u64> = scan.iter().map(|(_, v)| *v).collect();
    assert_eq!(offsets, (0..100).rev().collect::<Vec<u64>>());
}
