//! Module implement the document record stream inside data blocks.
//!
//! Records are laid out back-to-back in the payload region of blocks
//! of kind `Data`, as
//! `[keylen u16][metalen u16][bodylen u32][flags u8][seqnum u64]`
//! followed by key, meta, body and a crc32 over everything before it.
//! A record whose header would not fit the space left in the current
//! block starts a fresh block, and a record larger than that space
//! spills over a run of consecutively allocated blocks. The byte
//! offset of the record's first header byte identifies it in the
//! indexes and in the write-ahead buffer.
//!
//! The stream is replayable: [scan] walks the committed window after
//! the last index flush, skipping index and superblock kinds, and
//! stops leniently at zero padding or checksum damage, which is how a
//! torn tail gets logically truncated.

use std::{convert::TryFrom, sync::Arc};

use crate::{
    block::{Block, Kind, Store, PAYLOAD_SIZE},
    util, Error, Result, BLK_NOT_FOUND, BLOCK_SIZE,
};

/// Record header bytes, always contiguous within one block.
pub const DOC_HDR: usize = 17;

/// Upper limit on key length. Two maximal index entries must fit a
/// single B+-tree node for splits to make progress.
pub const KEY_MAX: usize = 1920;

// flags bit marking a tombstone.
const DELETED: u8 = 0x01;

/// One decoded document record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Record {
    pub key: Vec<u8>,
    pub meta: Vec<u8>,
    /// None for tombstones and for meta-only reads.
    pub body: Option<Vec<u8>>,
    pub seqnum: u64,
    pub deleted: bool,
    /// Encoded on-disk footprint, header and crc included.
    pub length: usize,
}

/// Encoded footprint of a record with these fields, header and crc
/// included.
pub fn encoded_len(key: &[u8], meta: &[u8], body: Option<&[u8]>) -> usize {
    DOC_HDR + key.len() + meta.len() + body.map(<[u8]>::len).unwrap_or(0) + 4
}

impl Record {
    pub fn new(key: &[u8], meta: &[u8], body: Option<&[u8]>, seqnum: u64) -> Record {
        let length = encoded_len(key, meta, body);
        Record {
            key: key.to_vec(),
            meta: meta.to_vec(),
            body: body.map(|b| b.to_vec()),
            seqnum,
            deleted: body.is_none(),
            length,
        }
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let klen = err_at!(FailConvert, u16::try_from(self.key.len()))?;
        let mlen = err_at!(FailConvert, u16::try_from(self.meta.len()))?;
        let body = self.body.as_deref().unwrap_or(&[]);
        let blen = err_at!(FailConvert, u32::try_from(body.len()))?;
        let flags = if self.deleted { DELETED } else { 0 };

        let mut data = Vec::with_capacity(DOC_HDR + self.key.len() + self.meta.len() + body.len() + 4);
        data.extend_from_slice(&klen.to_be_bytes());
        data.extend_from_slice(&mlen.to_be_bytes());
        data.extend_from_slice(&blen.to_be_bytes());
        data.push(flags);
        data.extend_from_slice(&self.seqnum.to_be_bytes());
        data.extend_from_slice(&self.key);
        data.extend_from_slice(&self.meta);
        data.extend_from_slice(body);
        let crc = crc32fast::hash(&data);
        data.extend_from_slice(&crc.to_be_bytes());
        Ok(data)
    }
}

/// Append position within the record stream. `BLK_NOT_FOUND` bid
/// denotes the sealed state, the next record starts a fresh block.
#[derive(Clone, Copy, Debug)]
pub struct LogCursor {
    bid: u64,
    off: usize,
}

impl Default for LogCursor {
    fn default() -> LogCursor {
        LogCursor { bid: BLK_NOT_FOUND, off: 0 }
    }
}

impl LogCursor {
    /// Seal the stream. Done at commit so the replay window never
    /// splices records written after the superblock into a block
    /// written before it.
    pub fn seal(&mut self) {
        self.bid = BLK_NOT_FOUND;
        self.off = 0;
    }

    /// Byte offset of the stream end, the replay window start for the
    /// next superblock.
    pub fn frontier(&self, store: &Store) -> u64 {
        match self.bid {
            BLK_NOT_FOUND => store.to_next_bid() * (BLOCK_SIZE as u64),
            bid => bid * (BLOCK_SIZE as u64) + (self.off as u64),
        }
    }
}

/// Append `rec` at the cursor, returning its byte offset.
pub fn write_doc(store: &Store, cursor: &mut LogCursor, rec: &Record) -> Result<u64> {
    if rec.key.is_empty() || rec.key.len() > KEY_MAX {
        err_at!(InvalidArgs, msg: "key length {}", rec.key.len())?;
    }
    let data = rec.encode()?;

    // place the record: continue in the open block only when it fits
    // there whole, otherwise start a consecutive run of fresh blocks.
    let (start_bid, start_off) = {
        let remaining = PAYLOAD_SIZE - cursor.off;
        if cursor.bid != BLK_NOT_FOUND && remaining >= DOC_HDR && data.len() <= remaining {
            (cursor.bid, cursor.off)
        } else {
            let nblocks = (data.len() + PAYLOAD_SIZE - 1) / PAYLOAD_SIZE;
            (store.alloc_n(util::to_u64(nblocks)?), 0)
        }
    };

    let mut bid = start_bid;
    let mut off = start_off;
    let mut rest = data.as_slice();
    while !rest.is_empty() {
        let mut block = if off == 0 && bid != cursor.bid {
            Block::new(bid, Kind::Data)
        } else {
            Block::clone(&*store.read_block(bid)?)
        };
        let n = std::cmp::min(PAYLOAD_SIZE - off, rest.len());
        block.as_mut_payload()[off..off + n].copy_from_slice(&rest[..n]);
        store.write_block(block)?;
        rest = &rest[n..];
        if !rest.is_empty() {
            bid += 1;
            off = 0;
        } else {
            off += n;
        }
    }

    cursor.bid = bid;
    cursor.off = off;
    if PAYLOAD_SIZE - cursor.off < DOC_HDR {
        cursor.seal()
    }

    Ok(start_bid * (BLOCK_SIZE as u64) + (start_off as u64))
}

// Byte reader spanning the consecutive blocks of one record.
struct SpanReader<'a> {
    store: &'a Store,
    block: Arc<Block>,
    off: usize,
}

impl<'a> SpanReader<'a> {
    fn new(store: &'a Store, offset: u64) -> Result<SpanReader<'a>> {
        let bid = offset / (BLOCK_SIZE as u64);
        let off = util::to_usize(offset % (BLOCK_SIZE as u64))?;
        if off >= PAYLOAD_SIZE {
            err_at!(InvalidArgs, msg: "offset {} inside trailer", offset)?;
        }
        let block = store.read_block(bid)?;
        if block.to_kind() != Kind::Data {
            err_at!(ChecksumError, msg: "offset {} in {:?} block", offset, block.to_kind())?;
        }
        Ok(SpanReader { store, block, off })
    }

    fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            if self.off == PAYLOAD_SIZE {
                let bid = self.block.to_bid() + 1;
                self.block = self.store.read_block(bid)?;
                if self.block.to_kind() != Kind::Data {
                    err_at!(ChecksumError, msg: "record spans {:?} block", self.block.to_kind())?;
                }
                self.off = 0;
            }
            let take = std::cmp::min(n - out.len(), PAYLOAD_SIZE - self.off);
            out.extend_from_slice(&self.block.as_payload()[self.off..self.off + take]);
            self.off += take;
        }
        Ok(out)
    }
}

struct Header {
    klen: usize,
    mlen: usize,
    blen: usize,
    flags: u8,
    seqnum: u64,
}

fn decode_header(buf: &[u8]) -> Header {
    let mut u16s = [0_u8; 2];
    let mut u32s = [0_u8; 4];
    let mut u64s = [0_u8; 8];
    u16s.copy_from_slice(&buf[0..2]);
    let klen = u16::from_be_bytes(u16s) as usize;
    u16s.copy_from_slice(&buf[2..4]);
    let mlen = u16::from_be_bytes(u16s) as usize;
    u32s.copy_from_slice(&buf[4..8]);
    let blen = u32::from_be_bytes(u32s) as usize;
    let flags = buf[8];
    u64s.copy_from_slice(&buf[9..17]);
    let seqnum = u64::from_be_bytes(u64s);
    Header { klen, mlen, blen, flags, seqnum }
}

/// Read the record at `offset`, verifying its crc.
pub fn read_doc(store: &Store, offset: u64) -> Result<Record> {
    let mut reader = SpanReader::new(store, offset)?;
    let mut data = reader.read(DOC_HDR)?;
    let hdr = decode_header(&data);
    if hdr.klen == 0 || hdr.klen > KEY_MAX {
        err_at!(ChecksumError, msg: "record at {} key length {}", offset, hdr.klen)?;
    }

    data.extend_from_slice(&reader.read(hdr.klen + hdr.mlen + hdr.blen)?);
    let crc = {
        let mut scratch = [0_u8; 4];
        scratch.copy_from_slice(&reader.read(4)?);
        u32::from_be_bytes(scratch)
    };
    if crc32fast::hash(&data) != crc {
        err_at!(ChecksumError, msg: "record at {} crc mismatch", offset)?;
    }

    let deleted = hdr.flags & DELETED != 0;
    let key = data[DOC_HDR..DOC_HDR + hdr.klen].to_vec();
    let meta = data[DOC_HDR + hdr.klen..DOC_HDR + hdr.klen + hdr.mlen].to_vec();
    let body = match deleted {
        true => None,
        false => Some(data[DOC_HDR + hdr.klen + hdr.mlen..].to_vec()),
    };
    let length = DOC_HDR + hdr.klen + hdr.mlen + hdr.blen + 4;

    Ok(Record { key, meta, body, seqnum: hdr.seqnum, deleted, length })
}

/// Read everything but the body of the record at `offset`. The crc
/// covers the body and is not re-verified here; meta-only readers
/// trade that check for not touching the body blocks.
pub fn read_doc_meta(store: &Store, offset: u64) -> Result<Record> {
    let mut reader = SpanReader::new(store, offset)?;
    let data = reader.read(DOC_HDR)?;
    let hdr = decode_header(&data);
    if hdr.klen == 0 || hdr.klen > KEY_MAX {
        err_at!(ChecksumError, msg: "record at {} key length {}", offset, hdr.klen)?;
    }

    let rest = reader.read(hdr.klen + hdr.mlen)?;
    let key = rest[..hdr.klen].to_vec();
    let meta = rest[hdr.klen..].to_vec();

    Ok(Record {
        key,
        meta,
        body: None,
        seqnum: hdr.seqnum,
        deleted: hdr.flags & DELETED != 0,
        length: DOC_HDR + hdr.klen + hdr.mlen + hdr.blen + 4,
    })
}

/// Walk the record stream from byte offset `from` up to block
/// `end_bid` (exclusive), for write-ahead buffer replay. Non-data
/// blocks are skipped; zero padding, damage and the window end stop
/// the walk without error.
pub fn scan(store: &Store, from: u64, end_bid: u64) -> Result<Vec<(u64, Record)>> {
    let mut bid = from / (BLOCK_SIZE as u64);
    let mut off = util::to_usize(from % (BLOCK_SIZE as u64))?;
    let mut records = vec![];

    'scan: while bid < end_bid {
        let block = match store.read_block(bid) {
            Ok(block) => block,
            Err(Error::ChecksumError(_, _)) => break 'scan,
            Err(err) => return Err(err),
        };
        if block.to_kind() != Kind::Data {
            bid += 1;
            off = 0;
            continue;
        }
        if PAYLOAD_SIZE - off < DOC_HDR {
            bid += 1;
            off = 0;
            continue;
        }

        let hdr = decode_header(&block.as_payload()[off..off + DOC_HDR]);
        if hdr.klen == 0 {
            match off {
                0 => break 'scan, // data blocks never start with padding
                _ => {
                    bid += 1;
                    off = 0;
                    continue;
                }
            }
        }
        if hdr.klen > KEY_MAX {
            break 'scan;
        }
        let total = DOC_HDR + hdr.klen + hdr.mlen + hdr.blen + 4;
        if off > 0 && total > PAYLOAD_SIZE - off {
            break 'scan; // spilling records always start a fresh block
        }

        let offset = bid * (BLOCK_SIZE as u64) + (off as u64);
        match read_doc(store, offset) {
            Ok(rec) => records.push((offset, rec)),
            Err(Error::ChecksumError(_, _)) => break 'scan,
            Err(err) => return Err(err),
        }

        // move past the record, which spans consecutive blocks.
        let spilled = (off + total) / PAYLOAD_SIZE;
        bid += util::to_u64(spilled)?;
        off = (off + total) % PAYLOAD_SIZE;
    }

    Ok(records)
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod mod_test;
