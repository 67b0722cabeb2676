use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use std::{env, fs, process};

use super::*;
use crate::block::BlockFile;

fn test_store(name: &str) -> Store {
    let loc = {
        let mut loc = env::temp_dir();
        loc.push(format!("grove-doclog-test-{}", process::id()));
        loc.push(name);
        fs::remove_file(&loc).ok();
        loc.into_os_string()
    };
    Store::new(0, Arc::new(BlockFile::create(&loc).unwrap()), false)
}

#[test]
fn test_doclog_roundtrip() {
    let seed: u64 = random();
    println!("test_doclog_roundtrip seed:{}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let store = test_store("roundtrip");
    let mut cursor = LogCursor::default();

    let mut docs = vec![];
    for seqnum in 0..100_u64 {
        let key = format!("key-{:03}", seqnum).into_bytes();
        let meta = format!("meta-{}", seqnum).into_bytes();
        let body: Vec<u8> = (0..rng.gen::<usize>() % 512).map(|_| rng.gen()).collect();
        let rec = Record::new(&key, &meta, Some(&body), seqnum);
        let offset = write_doc(&store, &mut cursor, &rec).unwrap();
        docs.push((offset, rec));
    }

    for (offset, rec) in docs.iter() {
        assert_eq!(&read_doc(&store, *offset).unwrap(), rec);

        let meta = read_doc_meta(&store, *offset).unwrap();
        assert_eq!(meta.key, rec.key);
        assert_eq!(meta.meta, rec.meta);
        assert_eq!(meta.seqnum, rec.seqnum);
        assert_eq!(meta.body, None);
        assert!(!meta.deleted);
    }
}

#[test]
fn test_doclog_spill() {
    let store = test_store("spill");
    let mut cursor = LogCursor::default();

    // small record, then one spanning three blocks, then small again.
    let rec1 = Record::new(b"small-1", b"m", Some(b"v"), 1);
    let big_body = vec![0xCD_u8; PAYLOAD_SIZE * 2 + 500];
    let rec2 = Record::new(b"big-key", b"meta", Some(&big_body), 2);
    let rec3 = Record::new(b"small-3", b"m", Some(b"v"), 3);

    let off1 = write_doc(&store, &mut cursor, &rec1).unwrap();
    let off2 = write_doc(&store, &mut cursor, &rec2).unwrap();
    let off3 = write_doc(&store, &mut cursor, &rec3).unwrap();

    // the big record started a fresh run of consecutive blocks.
    assert_eq!(off2 % (BLOCK_SIZE as u64), 0);
    assert_eq!(read_doc(&store, off1).unwrap(), rec1);
    assert_eq!(read_doc(&store, off2).unwrap(), rec2);
    assert_eq!(read_doc(&store, off3).unwrap(), rec3);

    // the stream continues in the big record's last block.
    assert_eq!(off3 / (BLOCK_SIZE as u64), off2 / (BLOCK_SIZE as u64) + 2);
}

#[test]
fn test_doclog_tombstone() {
    let store = test_store("tombstone");
    let mut cursor = LogCursor::default();

    let rec = Record::new(b"gone-key", b"last-meta", None, 7);
    assert!(rec.deleted);
    let offset = write_doc(&store, &mut cursor, &rec).unwrap();

    let read = read_doc(&store, offset).unwrap();
    assert!(read.deleted);
    assert_eq!(read.body, None);
    assert_eq!(read.meta, b"last-meta");
    assert_eq!(read.seqnum, 7);

    // zero-length body is a value, not a tombstone.
    let rec = Record::new(b"empty-key", b"", Some(b""), 8);
    let offset = write_doc(&store, &mut cursor, &rec).unwrap();
    let read = read_doc(&store, offset).unwrap();
    assert!(!read.deleted);
    assert_eq!(read.body, Some(vec![]));
}

#[test]
fn test_doclog_bad_key() {
    let store = test_store("bad-key");
    let mut cursor = LogCursor::default();

    let rec = Record::new(b"", b"m", Some(b"v"), 1);
    assert!(write_doc(&store, &mut cursor, &rec).is_err());

    let rec = Record::new(&vec![b'k'; KEY_MAX + 1], b"m", Some(b"v"), 1);
    assert!(write_doc(&store, &mut cursor, &rec).is_err());
}

#[test]
fn test_doclog_crc() {
    let store = test_store("crc");
    let mut cursor = LogCursor::default();

    let rec = Record::new(b"key-check", b"meta", Some(b"body-bytes"), 1);
    let offset = write_doc(&store, &mut cursor, &rec).unwrap();

    // flip one payload byte, keeping the block trailer valid.
    let bid = offset / (BLOCK_SIZE as u64);
    let mut block = Block::clone(&store.read_block(bid).unwrap());
    block.as_mut_payload()[DOC_HDR + 2] ^= 0xFF;
    store.write_block(block).unwrap();

    match read_doc(&store, offset) {
        Err(Error::ChecksumError(_, _)) => (),
        res => panic!("unexpected {:?}", res),
    }
}

#[test]
fn test_doclog_scan() {
    let store = test_store("scan");
    let mut cursor = LogCursor::default();

    let mut expect = vec![];
    for seqnum in 0..20_u64 {
        let key = format!("scan-key-{:02}", seqnum).into_bytes();
        let rec = Record::new(&key, b"m", Some(b"body"), seqnum);
        let offset = write_doc(&store, &mut cursor, &rec).unwrap();
        expect.push((offset, rec));
    }

    // sprinkle a non-data block in the middle of the window, the way
    // an index flush would.
    let bid = store.alloc();
    store
        .write_block(Block::new(bid, Kind::Index))
        .unwrap();
    cursor.seal();

    for seqnum in 20..30_u64 {
        let key = format!("scan-key-{:02}", seqnum).into_bytes();
        let rec = Record::new(&key, b"m", Some(b"body"), seqnum);
        let offset = write_doc(&store, &mut cursor, &rec).unwrap();
        expect.push((offset, rec));
    }

    let end_bid = store.to_next_bid();
    assert_eq!(scan(&store, 0, end_bid).unwrap(), expect);

    // a partial window picks up from its offset.
    let from = expect[5].0;
    assert_eq!(scan(&store, from, end_bid).unwrap(), expect[5..]);

    // scanning an empty window yields nothing.
    assert!(scan(&store, end_bid * (BLOCK_SIZE as u64), end_bid)
        .unwrap()
        .is_empty());
}
