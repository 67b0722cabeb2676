use std::{env, fs, path, process};

use super::*;
use crate::{Error, BLK_NOT_FOUND};

fn test_dir(name: &str) -> path::PathBuf {
    let mut dir = env::temp_dir();
    dir.push(format!("grove-iter-test-{}-{}", process::id(), name));
    fs::remove_dir_all(&dir).ok();
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn small_config() -> Config {
    let mut config = Config::new();
    config.set_buffercache_size(0).set_wal_threshold(1024);
    config
}

fn doc_for(i: usize) -> Doc {
    let key = format!("key{}", i);
    let meta = format!("meta{}", i);
    let body = format!("body{}", i);
    Doc::with(key.as_bytes(), meta.as_bytes(), Some(body.as_bytes()))
}

// populate so even keys live in the primary index and odd keys in
// the write-ahead buffer, both committed.
fn populate_split(db: &mut Db, n: usize) -> Vec<Doc> {
    let mut docs: Vec<Doc> = (0..n).map(doc_for).collect();
    for doc in docs.iter_mut().step_by(2) {
        db.set(doc).unwrap();
    }
    db.flush_wal().unwrap();
    db.commit().unwrap();

    for doc in docs.iter_mut().skip(1).step_by(2) {
        db.set(doc).unwrap();
    }
    db.commit().unwrap();
    docs
}

#[test]
fn test_iterator_merges_wal() {
    let dir = test_dir("merge");
    let mut db = Db::open(dir.join("dummy"), small_config()).unwrap();
    let docs = populate_split(&mut db, 10);

    // full range interleaves index and buffer in key order.
    let iter = db.range::<_, &[u8]>(.., IterOptions::default()).unwrap();
    let got: Vec<Doc> = iter.map(|doc| doc.unwrap()).collect();
    assert_eq!(got.len(), 10);
    for (doc, expect) in got.iter().zip(docs.iter()) {
        assert_eq!(doc.key, expect.key);
        assert_eq!(doc.meta, expect.meta);
        assert_eq!(doc.body, expect.body);
    }

    // metaonly yields offsets and suppresses bodies.
    let opts = IterOptions { metaonly: true };
    let iter = db.range::<_, &[u8]>(.., opts).unwrap();
    let mut count = 0;
    for doc in iter {
        let doc = doc.unwrap();
        assert_ne!(doc.offset, BLK_NOT_FOUND);
        assert_eq!(doc.body, None);
        assert!(!doc.deleted);
        assert_eq!(doc.meta, docs[count].meta);
        count += 1;
    }
    assert_eq!(count, 10);
}

#[test]
fn test_iterator_bounds() {
    let dir = test_dir("bounds");
    let mut db = Db::open(dir.join("dummy"), small_config()).unwrap();
    let docs = populate_split(&mut db, 10);

    // from key3 to the end.
    let start = b"key3".to_vec();
    let iter = db.range(start.., IterOptions::default()).unwrap();
    let got: Vec<Doc> = iter.map(|doc| doc.unwrap()).collect();
    assert_eq!(got.len(), 7);
    assert_eq!(got[0].key, docs[3].key);

    // closed range key4..=key8.
    let (start, end) = (b"key4".to_vec(), b"key8".to_vec());
    let iter = db.range(start..=end, IterOptions::default()).unwrap();
    let got: Vec<Doc> = iter.map(|doc| doc.unwrap()).collect();
    assert_eq!(got.len(), 5);
    assert_eq!(got[0].key, docs[4].key);
    assert_eq!(got[4].key, docs[8].key);

    // deleted keys disappear from iteration.
    let mut tomb = Doc::with(&docs[6].key, b"", None);
    db.set(&mut tomb).unwrap();
    let iter = db.range::<_, &[u8]>(.., IterOptions::default()).unwrap();
    let keys: Vec<Vec<u8>> = iter.map(|doc| doc.unwrap().key).collect();
    assert_eq!(keys.len(), 9);
    assert!(!keys.contains(&docs[6].key));
}

#[test]
fn test_iterator_snapshot() {
    let dir = test_dir("snapshot");
    let dummy = dir.join("dummy");
    let mut config = small_config();
    config.set_buffercache_size(1024 * 1024);

    let mut db = Db::open(&dummy, config.clone()).unwrap();
    let docs = populate_split(&mut db, 10);

    let mut iter = db.range::<_, &[u8]>(.., IterOptions::default()).unwrap();
    let first = iter.next().unwrap().unwrap();
    assert_eq!(first.body, docs[0].body);

    // another handle rewrites everything and commits.
    let mut db2 = Db::open(&dummy, config).unwrap();
    for i in 0..10 {
        let key = format!("key{}", i);
        let mut doc = Doc::with(key.as_bytes(), b"new-meta", Some(b"new-body"));
        db2.set(&mut doc).unwrap();
    }
    db2.flush_wal().unwrap();
    db2.commit().unwrap();

    // the open cursor stays on its snapshot.
    let rest: Vec<Doc> = iter.map(|doc| doc.unwrap()).collect();
    assert_eq!(rest.len(), 9);
    for (doc, expect) in rest.iter().zip(docs.iter().skip(1)) {
        assert_eq!(doc.body, expect.body);
    }
}

#[test]
fn test_seq_iterator() {
    let dir = test_dir("seq");
    let mut db = Db::open(dir.join("dummy"), small_config()).unwrap();

    let mut docs: Vec<Doc> = (0..6).map(doc_for).collect();
    for doc in docs.iter_mut() {
        db.set(doc).unwrap(); // seqnums 0..5
    }
    db.flush_wal().unwrap();
    db.commit().unwrap();

    // update key1 (seqnum 6, in the buffer) and delete key2
    // (seqnum 7); 1 and 2 are superseded.
    let mut doc = Doc::with(&docs[1].key, b"meta-x", Some(b"body-x"));
    db.set(&mut doc).unwrap();
    let mut tomb = Doc::with(&docs[2].key, b"", None);
    db.set(&mut tomb).unwrap();

    let iter = db.seq_range(.., IterOptions::default()).unwrap();
    let got: Vec<Doc> = iter.map(|doc| doc.unwrap()).collect();
    let seqnums: Vec<u64> = got.iter().map(|doc| doc.seqnum).collect();
    assert_eq!(seqnums, vec![0, 3, 4, 5, 6, 7]);

    // the tombstone write is yielded as deleted.
    assert!(got[5].deleted);
    assert_eq!(got[5].body, None);
    // the update carries its new content.
    assert_eq!(got[4].body, Some(b"body-x".to_vec()));

    // bounded scan.
    let iter = db.seq_range(4..=6, IterOptions::default()).unwrap();
    let seqnums: Vec<u64> =
        iter.map(|doc| doc.unwrap().seqnum).collect();
    assert_eq!(seqnums, vec![4, 5, 6]);
}

fn cmp_double(a: &[u8], b: &[u8]) -> std::cmp::Ordering {
    let mut scratch = [0_u8; 8];
    scratch.copy_from_slice(a);
    let aa = f64::from_ne_bytes(scratch);
    scratch.copy_from_slice(b);
    let bb = f64::from_ne_bytes(scratch);
    aa.partial_cmp(&bb).unwrap()
}

#[test]
fn test_custom_compare_doubles() {
    let dir = test_dir("custom-cmp");
    let dummy1 = dir.join("dummy1");
    let dummy2 = dir.join("dummy2");
    let n = 10;

    let mut db = Db::open(&dummy1, small_config()).unwrap();
    db.set_custom_cmp(cmp_double).unwrap();

    for i in 0..n {
        let key_double = 10_000.0 / ((i as f64) * 11.0 + 1.0);
        let body = format!("value: {}, {}", i, key_double);
        let mut doc =
            Doc::with(&key_double.to_ne_bytes(), b"", Some(body.as_bytes()));
        db.set(&mut doc).unwrap();
    }

    let check_ascending = |db: &mut Db| {
        let iter = db.range::<_, &[u8]>(.., IterOptions::default()).unwrap();
        let mut prev = f64::NEG_INFINITY;
        let mut count = 0;
        for doc in iter {
            let doc = doc.unwrap();
            let mut scratch = [0_u8; 8];
            scratch.copy_from_slice(&doc.key);
            let key_double = f64::from_ne_bytes(scratch);
            assert!(key_double > prev, "{} after {}", key_double, prev);
            prev = key_double;
            count += 1;
        }
        assert_eq!(count, n);
    };

    // ordered while everything sits in the write-ahead buffer.
    check_ascending(&mut db);

    // ordered from the persistent index.
    db.flush_wal().unwrap();
    db.commit().unwrap();
    check_ascending(&mut db);

    // ordered after compaction; the comparator follows the handle.
    db.compact(&dummy2).unwrap();
    check_ascending(&mut db);

    // comparator can only be set before the first write.
    match db.set_custom_cmp(cmp_double) {
        Err(Error::InvalidArgs(_, _)) => (),
        res => panic!("unexpected {:?}", res),
    }
}
