//! Module implement fixed-size block I/O over a single database file.
//!
//! A file is a sequence of [BLOCK_SIZE] blocks. Every block carries a
//! 16-byte trailer `[kind u8][pad 3][bid u64][crc32 u32]`, where the
//! crc covers the entire block except the crc field itself. Torn or
//! misplaced blocks are detected by trailer mismatch. Block-ids are
//! handed out monotonically by [Store::alloc]; there is no free-list,
//! space is reclaimed by compaction alone.

use std::{
    convert::TryFrom,
    sync::{
        atomic::{AtomicU64, Ordering::SeqCst},
        Arc,
    },
};

use crate::{cache, util, Error, Result, BLOCK_SIZE};

mod file;

pub use file::BlockFile;

/// Size of the per-block trailer, in bytes.
pub const TRAILER_SIZE: usize = 16;

/// Usable payload bytes in a block.
pub const PAYLOAD_SIZE: usize = BLOCK_SIZE - TRAILER_SIZE;

/// Kind of a block, stored in its trailer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Kind {
    /// Holds a window of the document record stream.
    Data,
    /// Holds one B+-tree node.
    Index,
    /// Commit marker, refer to [crate::db::Superblock].
    Super,
}

impl From<Kind> for u8 {
    fn from(kind: Kind) -> u8 {
        match kind {
            Kind::Data => 1,
            Kind::Index => 2,
            Kind::Super => 3,
        }
    }
}

impl TryFrom<u8> for Kind {
    type Error = Error;

    fn try_from(byte: u8) -> Result<Kind> {
        match byte {
            1 => Ok(Kind::Data),
            2 => Ok(Kind::Index),
            3 => Ok(Kind::Super),
            _ => err_at!(InvalidFormat, msg: "bad block kind {}", byte),
        }
    }
}

/// A single block held in memory, always [BLOCK_SIZE] bytes on disk.
#[derive(Clone)]
pub struct Block {
    bid: u64,
    kind: Kind,
    payload: Vec<u8>, // PAYLOAD_SIZE bytes
}

impl Block {
    /// New zero-filled block for `bid`.
    pub fn new(bid: u64, kind: Kind) -> Block {
        Block {
            bid,
            kind,
            payload: vec![0; PAYLOAD_SIZE],
        }
    }

    /// Decode `buf`, a full [BLOCK_SIZE] image read at block `bid`,
    /// verifying the trailer crc and position.
    pub fn decode(bid: u64, buf: &[u8]) -> Result<Block> {
        if buf.len() != BLOCK_SIZE {
            err_at!(Fatal, msg: "block image {} bytes", buf.len())?;
        }

        let crc = {
            let mut scratch = [0_u8; 4];
            scratch.copy_from_slice(&buf[BLOCK_SIZE - 4..]);
            u32::from_be_bytes(scratch)
        };
        if crc32fast::hash(&buf[..BLOCK_SIZE - 4]) != crc {
            err_at!(ChecksumError, msg: "block {} crc mismatch", bid)?;
        }

        let sbid = {
            let mut scratch = [0_u8; 8];
            scratch.copy_from_slice(&buf[PAYLOAD_SIZE + 4..PAYLOAD_SIZE + 12]);
            u64::from_be_bytes(scratch)
        };
        if sbid != bid {
            err_at!(ChecksumError, msg: "block {} stamped as {}", bid, sbid)?;
        }

        let kind = Kind::try_from(buf[PAYLOAD_SIZE])?;

        Ok(Block {
            bid,
            kind,
            payload: buf[..PAYLOAD_SIZE].to_vec(),
        })
    }

    /// Encode this block into its on-disk [BLOCK_SIZE] image.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(BLOCK_SIZE);
        buf.extend_from_slice(&self.payload);
        buf.push(u8::from(self.kind));
        buf.extend_from_slice(&[0_u8; 3]);
        buf.extend_from_slice(&self.bid.to_be_bytes());
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_be_bytes());
        buf
    }

    #[inline]
    pub fn to_bid(&self) -> u64 {
        self.bid
    }

    #[inline]
    pub fn to_kind(&self) -> Kind {
        self.kind
    }

    #[inline]
    pub fn as_payload(&self) -> &[u8] {
        &self.payload
    }

    #[inline]
    pub fn as_mut_payload(&mut self) -> &mut [u8] {
        &mut self.payload
    }
}

/// Per-file block store, stitching together the block file, the shared
/// buffer cache and the monotonic block allocator.
pub struct Store {
    file_id: u64,
    blkfile: Arc<BlockFile>,
    cached: bool,
    next_bid: AtomicU64,
    last_header_bid: AtomicU64,
}

impl Store {
    pub fn new(file_id: u64, blkfile: Arc<BlockFile>, cached: bool) -> Store {
        Store {
            file_id,
            blkfile,
            cached,
            next_bid: AtomicU64::new(0),
            last_header_bid: AtomicU64::new(crate::BLK_NOT_FOUND),
        }
    }

    /// Allocate the next block-id.
    pub fn alloc(&self) -> u64 {
        self.next_bid.fetch_add(1, SeqCst)
    }

    /// Allocate `n` consecutive block-ids, return the first. Used for
    /// document records spilling over multiple blocks.
    pub fn alloc_n(&self, n: u64) -> u64 {
        self.next_bid.fetch_add(n, SeqCst)
    }

    /// Reset the allocator, done when recovery adopts a superblock and
    /// logically truncates the torn tail after it.
    pub fn set_next_bid(&self, bid: u64) {
        self.next_bid.store(bid, SeqCst)
    }

    pub fn to_next_bid(&self) -> u64 {
        self.next_bid.load(SeqCst)
    }

    pub fn set_last_header_bid(&self, bid: u64) {
        self.last_header_bid.store(bid, SeqCst)
    }

    pub fn to_last_header_bid(&self) -> u64 {
        self.last_header_bid.load(SeqCst)
    }

    #[inline]
    pub fn to_file_id(&self) -> u64 {
        self.file_id
    }

    #[inline]
    pub fn as_block_file(&self) -> &Arc<BlockFile> {
        &self.blkfile
    }

    /// Read a block, consulting the shared buffer cache when enabled.
    pub fn read_block(&self, bid: u64) -> Result<Arc<Block>> {
        if self.cached {
            if let Some(block) = cache::get(self.file_id, bid) {
                return Ok(block);
            }
        }
        let block = Arc::new(self.blkfile.read(bid)?);
        if self.cached {
            cache::set(self.file_id, Arc::clone(&block), false /*dirty*/)?;
        }
        Ok(block)
    }

    /// Write a block through the cache, or straight to disk when the
    /// cache is disabled. Cached writes turn durable on [Store::flush]
    /// or when the cache evicts the dirty block.
    pub fn write_block(&self, block: Block) -> Result<()> {
        if self.cached {
            cache::set(self.file_id, Arc::new(block), true /*dirty*/)
        } else {
            self.blkfile.write(&block)
        }
    }

    /// Write a block to disk bypassing the cache, used for commit
    /// markers that must land after everything they describe.
    pub fn write_block_direct(&self, block: &Block) -> Result<()> {
        if self.cached {
            cache::forget(self.file_id, block.to_bid());
        }
        self.blkfile.write(block)
    }

    /// Flush dirty cached blocks of this file and fsync.
    pub fn flush(&self) -> Result<()> {
        if self.cached {
            cache::flush_file(self.file_id)?;
        }
        self.blkfile.sync()
    }

    pub fn len_blocks(&self) -> Result<u64> {
        Ok(self.blkfile.to_len()? / util::to_u64(BLOCK_SIZE)?)
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod mod_test;
