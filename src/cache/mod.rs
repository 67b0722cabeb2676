//! Module implement the process-wide buffer cache.
//!
//! A single size-bounded, write-back cache fronts every open database
//! file, sharded by `(file-id, block-id)` with one mutex per shard.
//! Dirty blocks are written to their owning [BlockFile] before
//! eviction; files register themselves while open. A database opened
//! with `buffercache_size == 0` bypasses this module entirely.
//!
//! Block pinning is realized through `Arc<Block>` ownership: holders
//! of a block reference keep it alive regardless of eviction, and
//! dropping the reference releases it.

use lazy_static::lazy_static;

use std::sync::Arc;

use crate::{
    block::{Block, BlockFile},
    Result,
};

mod lru;

use lru::Lru;

lazy_static! {
    static ref CACHE: Lru = Lru::new(num_cpus::get().next_power_of_two());
}

/// Fix the cache budget, in bytes. The first configuration wins,
/// subsequent calls with a different budget are ignored.
pub fn configure(max_bytes: usize) {
    CACHE.configure(max_bytes)
}

/// Register `blkfile` so dirty blocks of `file_id` can be written back
/// on eviction.
pub fn register(file_id: u64, blkfile: Arc<BlockFile>) {
    CACHE.register(file_id, blkfile)
}

/// Forget a file, dropping its cached blocks without write-back. Dirty
/// blocks at this point are uncommitted by definition and the previous
/// superblock stays authoritative.
pub fn deregister(file_id: u64) {
    CACHE.purge_file(file_id);
    CACHE.deregister(file_id)
}

pub fn get(file_id: u64, bid: u64) -> Option<Arc<Block>> {
    CACHE.get(file_id, bid)
}

pub fn set(file_id: u64, block: Arc<Block>, dirty: bool) -> Result<()> {
    CACHE.set(file_id, block, dirty)
}

/// Drop a single slot without write-back.
pub fn forget(file_id: u64, bid: u64) {
    CACHE.forget(file_id, bid)
}

/// Write out every dirty block of `file_id`, in block order. Does not
/// fsync, the caller owns durability ordering.
pub fn flush_file(file_id: u64) -> Result<()> {
    CACHE.flush_file(file_id)
}

/// Write out dirty blocks of every registered file and drop all slots.
pub fn shutdown() -> Result<()> {
    CACHE.shutdown()
}
