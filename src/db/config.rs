use crate::{Error, Result};

/// Default width of HB+-trie key chunks, in bytes.
pub const CHUNKSIZE: usize = 8;
/// Default width of index leaf values, in bytes.
pub const OFFSETSIZE: usize = 8;
/// Default buffer cache budget, in bytes.
pub const BUFFERCACHE_SIZE: usize = 16 * 1024 * 1024;
/// Default write-ahead buffer occupancy triggering an implicit flush
/// at the next commit, in entries.
pub const WAL_THRESHOLD: usize = 4096;

/// Durability mode of a handle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DurabilityOpt {
    /// Regular read-write handle.
    None,
    /// Read-only handle; opening a missing file fails and every
    /// mutating call returns `RdonlyViolation`.
    ReadOnly,
}

impl Default for DurabilityOpt {
    fn default() -> DurabilityOpt {
        DurabilityOpt::None
    }
}

/// Configuration for a database handle, create a value with
/// [Config::new] and shape it with the `set_*` methods before
/// passing it to [crate::Db::open].
///
/// Index-shape options (`chunksize`, `offsetsize`) and the cache
/// budget take effect when the file's shared state is first created;
/// later opens of the same file share that state as-is.
#[derive(Clone, Debug)]
pub struct Config {
    /// HB+-trie chunk width, in bytes. Default: [CHUNKSIZE].
    pub chunksize: usize,
    /// Width of index leaf values, in bytes. Default: [OFFSETSIZE].
    pub offsetsize: usize,
    /// Buffer cache budget in bytes, 0 disables caching for this
    /// file. Default: [BUFFERCACHE_SIZE].
    pub buffercache_size: usize,
    /// Write-ahead buffer entries beyond which commit implicitly
    /// flushes. Default: [WAL_THRESHOLD].
    pub wal_threshold: usize,
    /// Maintain the sequence-number index. Default: true.
    pub seqtree_opt: bool,
    /// Durability mode. Default: [DurabilityOpt::None].
    pub durability_opt: DurabilityOpt,
    /// Reserved bitset.
    pub flag: u32,
}

impl Default for Config {
    fn default() -> Config {
        Config::new()
    }
}

impl Config {
    pub fn new() -> Config {
        Config {
            chunksize: CHUNKSIZE,
            offsetsize: OFFSETSIZE,
            buffercache_size: BUFFERCACHE_SIZE,
            wal_threshold: WAL_THRESHOLD,
            seqtree_opt: true,
            durability_opt: DurabilityOpt::None,
            flag: 0,
        }
    }

    pub fn set_chunksize(&mut self, chunksize: usize) -> &mut Self {
        self.chunksize = chunksize;
        self
    }

    pub fn set_offsetsize(&mut self, offsetsize: usize) -> &mut Self {
        self.offsetsize = offsetsize;
        self
    }

    pub fn set_buffercache_size(&mut self, buffercache_size: usize) -> &mut Self {
        self.buffercache_size = buffercache_size;
        self
    }

    pub fn set_wal_threshold(&mut self, wal_threshold: usize) -> &mut Self {
        self.wal_threshold = wal_threshold;
        self
    }

    pub fn set_seqtree(&mut self, seqtree_opt: bool) -> &mut Self {
        self.seqtree_opt = seqtree_opt;
        self
    }

    pub fn set_durability(&mut self, durability_opt: DurabilityOpt) -> &mut Self {
        self.durability_opt = durability_opt;
        self
    }

    pub fn set_flag(&mut self, flag: u32) -> &mut Self {
        self.flag = flag;
        self
    }

    pub fn to_read_only(&self) -> bool {
        self.durability_opt == DurabilityOpt::ReadOnly
    }

    pub fn validate(&self) -> Result<()> {
        if !(2..=32).contains(&self.chunksize) {
            err_at!(InvalidArgs, msg: "chunksize {}", self.chunksize)?;
        }
        if !(4..=8).contains(&self.offsetsize) {
            err_at!(InvalidArgs, msg: "offsetsize {}", self.offsetsize)?;
        }
        Ok(())
    }
}
