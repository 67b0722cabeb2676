use std::{env, ffi, fs, process, sync::Arc};

use super::*;

fn test_location(name: &str) -> ffi::OsString {
    let mut loc = env::temp_dir();
    loc.push(format!("grove-block-test-{}", process::id()));
    loc.push(name);
    fs::remove_file(&loc).ok();
    loc.into_os_string()
}

#[test]
fn test_block_encode_decode() {
    let mut block = Block::new(42, Kind::Index);
    block.as_mut_payload()[..5].copy_from_slice(b"hello");

    let buf = block.encode();
    assert_eq!(buf.len(), BLOCK_SIZE);

    let block = Block::decode(42, &buf).unwrap();
    assert_eq!(block.to_bid(), 42);
    assert_eq!(block.to_kind(), Kind::Index);
    assert_eq!(&block.as_payload()[..5], b"hello");

    // a flipped bit in the payload must fail the crc.
    let mut bad = buf.clone();
    bad[100] ^= 0x01;
    match Block::decode(42, &bad) {
        Err(Error::ChecksumError(_, _)) => (),
        res => panic!("unexpected {:?}", res.map(|b| b.to_bid())),
    }

    // a block read back at the wrong position must fail.
    match Block::decode(43, &buf) {
        Err(Error::ChecksumError(_, _)) => (),
        res => panic!("unexpected {:?}", res.map(|b| b.to_bid())),
    }
}

#[test]
fn test_block_file() {
    let loc = test_location("block-file");

    let blkfile = BlockFile::create(&loc).unwrap();

    // creating over an existing file shall fail.
    match BlockFile::create(&loc) {
        Err(Error::FileExists(_, _)) => (),
        res => panic!("unexpected {:?}", res.map(|_| ())),
    }

    for bid in 0..4_u64 {
        let mut block = Block::new(bid, Kind::Data);
        block.as_mut_payload()[0] = bid as u8;
        blkfile.write(&block).unwrap();
    }
    blkfile.sync().unwrap();
    assert_eq!(blkfile.to_len().unwrap(), 4 * BLOCK_SIZE as u64);

    let blkfile = BlockFile::open(&loc).unwrap();
    for bid in 0..4_u64 {
        let block = blkfile.read(bid).unwrap();
        assert_eq!(block.to_kind(), Kind::Data);
        assert_eq!(block.as_payload()[0], bid as u8);
    }

    // overwrite, as done when recycling a truncated tail.
    let mut block = Block::new(2, Kind::Super);
    block.as_mut_payload()[0] = 0xAA;
    blkfile.write(&block).unwrap();
    let block = blkfile.read(2).unwrap();
    assert_eq!(block.to_kind(), Kind::Super);
    assert_eq!(block.as_payload()[0], 0xAA);
}

#[test]
fn test_store_alloc() {
    let loc = test_location("store-alloc");
    let blkfile = Arc::new(BlockFile::create(&loc).unwrap());
    let store = Store::new(1000, blkfile, false /*cached*/);

    assert_eq!(store.alloc(), 0);
    assert_eq!(store.alloc(), 1);
    assert_eq!(store.alloc_n(3), 2);
    assert_eq!(store.alloc(), 5);

    store.set_next_bid(100);
    assert_eq!(store.alloc(), 100);
    assert_eq!(store.to_next_bid(), 101);

    assert_eq!(store.to_last_header_bid(), crate::BLK_NOT_FOUND);
    store.set_last_header_bid(7);
    assert_eq!(store.to_last_header_bid(), 7);
}

#[test]
fn test_store_read_write() {
    let loc = test_location("store-rw");
    let blkfile = Arc::new(BlockFile::create(&loc).unwrap());
    let store = Store::new(1001, blkfile, false /*cached*/);

    let bid = store.alloc();
    let mut block = Block::new(bid, Kind::Data);
    block.as_mut_payload()[..4].copy_from_slice(b"doc1");
    store.write_block(block).unwrap();
    store.flush().unwrap();

    let block = store.read_block(bid).unwrap();
    assert_eq!(&block.as_payload()[..4], b"doc1");
    assert_eq!(store.len_blocks().unwrap(), 1);
}
