use std::{
    collections::hash_map::DefaultHasher,
    collections::HashMap,
    hash::{Hash, Hasher},
    sync::{
        atomic::{AtomicUsize, Ordering::SeqCst},
        Arc, Mutex,
    },
};

use crate::{
    block::{Block, BlockFile},
    util::Spinlock,
    Error, Result, BLOCK_SIZE,
};

// Budget sentinel until the first database open configures the cache.
const UNCONFIGURED: usize = usize::MAX;

pub struct Lru {
    budget: AtomicUsize, // total bytes across shards
    shards: Vec<Mutex<Shard>>,
    files: Spinlock<HashMap<u64, Arc<BlockFile>>>,

    n_gets: AtomicUsize,
    n_hits: AtomicUsize,
    n_evicted: AtomicUsize,
}

#[derive(Default)]
struct Shard {
    slots: HashMap<(u64, u64), Slot>,
    tick: u64,
    used: usize, // bytes held in this shard
}

struct Slot {
    block: Arc<Block>,
    dirty: bool,
    at: u64,
}

impl Lru {
    pub fn new(n_shards: usize) -> Lru {
        let mut shards = Vec::with_capacity(n_shards);
        (0..n_shards).for_each(|_| shards.push(Mutex::new(Shard::default())));

        Lru {
            budget: AtomicUsize::new(UNCONFIGURED),
            shards,
            files: Spinlock::new(HashMap::new()),

            n_gets: AtomicUsize::new(0),
            n_hits: AtomicUsize::new(0),
            n_evicted: AtomicUsize::new(0),
        }
    }

    pub fn configure(&self, max_bytes: usize) {
        let res =
            self.budget.compare_exchange(UNCONFIGURED, max_bytes, SeqCst, SeqCst);
        if let Err(prev) = res {
            if prev != max_bytes {
                log::debug!(target: "cache", "budget stays {}, asked {}", prev, max_bytes);
            }
        }
    }

    pub fn register(&self, file_id: u64, blkfile: Arc<BlockFile>) {
        self.files.lock().insert(file_id, blkfile);
    }

    pub fn deregister(&self, file_id: u64) {
        self.files.lock().remove(&file_id);
    }

    fn shard_for(&self, file_id: u64, bid: u64) -> &Mutex<Shard> {
        let mut hasher = DefaultHasher::new();
        (file_id, bid).hash(&mut hasher);
        let off = (hasher.finish() as usize) % self.shards.len();
        &self.shards[off]
    }

    fn shard_budget(&self) -> usize {
        match self.budget.load(SeqCst) {
            UNCONFIGURED | 0 => 0,
            n => std::cmp::max(n / self.shards.len(), BLOCK_SIZE * 4),
        }
    }

    pub fn get(&self, file_id: u64, bid: u64) -> Option<Arc<Block>> {
        self.n_gets.fetch_add(1, SeqCst);

        let mut shard = self.shard_for(file_id, bid).lock().ok()?;
        shard.tick += 1;
        let tick = shard.tick;
        match shard.slots.get_mut(&(file_id, bid)) {
            Some(slot) => {
                slot.at = tick;
                self.n_hits.fetch_add(1, SeqCst);
                Some(Arc::clone(&slot.block))
            }
            None => None,
        }
    }

    pub fn set(&self, file_id: u64, block: Arc<Block>, dirty: bool) -> Result<()> {
        let shard_budget = self.shard_budget();
        if shard_budget == 0 {
            // cache disabled, dirty blocks go straight to disk.
            return match dirty {
                true => self.write_back(file_id, &block),
                false => Ok(()),
            };
        }

        let bid = block.to_bid();
        let evicted = {
            let mutex = self.shard_for(file_id, bid);
            let mut shard = err_at!(Fatal, mutex.lock())?;
            shard.tick += 1;
            let slot = Slot { block, dirty, at: shard.tick };
            match shard.slots.insert((file_id, bid), slot) {
                Some(old) if old.dirty && !dirty => {
                    // a racing clean read must not shadow a dirty image.
                    shard.slots.insert((file_id, bid), old);
                }
                Some(_) => (),
                None => shard.used += BLOCK_SIZE,
            }
            self.evict(&mut shard, shard_budget)
        };

        for (file_id, block) in evicted.into_iter() {
            self.n_evicted.fetch_add(1, SeqCst);
            self.write_back(file_id, &block)?;
        }
        Ok(())
    }

    pub fn forget(&self, file_id: u64, bid: u64) {
        if let Ok(mut shard) = self.shard_for(file_id, bid).lock() {
            if shard.slots.remove(&(file_id, bid)).is_some() {
                shard.used -= BLOCK_SIZE;
            }
        }
    }

    // Pop least-recently-used slots till the shard fits its budget,
    // returning dirty ones for write-back outside the shard lock.
    fn evict(&self, shard: &mut Shard, shard_budget: usize) -> Vec<(u64, Arc<Block>)> {
        let mut dirty = vec![];
        while shard.used > shard_budget {
            let key = match shard
                .slots
                .iter()
                .min_by_key(|(_, slot)| slot.at)
                .map(|(key, _)| *key)
            {
                Some(key) => key,
                None => break,
            };
            let slot = shard.slots.remove(&key).unwrap();
            shard.used -= BLOCK_SIZE;
            if slot.dirty {
                dirty.push((key.0, slot.block));
            }
        }
        dirty
    }

    fn write_back(&self, file_id: u64, block: &Block) -> Result<()> {
        let blkfile = {
            let files = self.files.lock();
            match files.get(&file_id) {
                Some(blkfile) => Arc::clone(blkfile),
                None => return err_at!(Fatal, msg: "no file {} for write-back", file_id),
            }
        };
        blkfile.write(block)
    }

    pub fn flush_file(&self, file_id: u64) -> Result<()> {
        let mut dirty: Vec<Arc<Block>> = vec![];
        for mutex in self.shards.iter() {
            let mut shard = err_at!(Fatal, mutex.lock())?;
            for ((fid, _), slot) in shard.slots.iter_mut() {
                if *fid == file_id && slot.dirty {
                    slot.dirty = false;
                    dirty.push(Arc::clone(&slot.block));
                }
            }
        }

        dirty.sort_by_key(|block| block.to_bid());
        for block in dirty.into_iter() {
            self.write_back(file_id, &block)?;
        }
        Ok(())
    }

    pub fn purge_file(&self, file_id: u64) {
        for mutex in self.shards.iter() {
            if let Ok(mut shard) = mutex.lock() {
                let stale: Vec<(u64, u64)> = shard
                    .slots
                    .keys()
                    .filter(|(fid, _)| *fid == file_id)
                    .cloned()
                    .collect();
                for key in stale.into_iter() {
                    shard.slots.remove(&key);
                    shard.used -= BLOCK_SIZE;
                }
            }
        }
    }

    pub fn shutdown(&self) -> Result<()> {
        let file_ids: Vec<u64> = self.files.lock().keys().cloned().collect();
        for file_id in file_ids.into_iter() {
            self.flush_file(file_id)?;
            self.purge_file(file_id);
        }
        log::debug!(
            target: "cache",
            "shutdown gets:{} hits:{} evicted:{}",
            self.n_gets.load(SeqCst),
            self.n_hits.load(SeqCst),
            self.n_evicted.load(SeqCst)
        );
        Ok(())
    }
}
