use lazy_static::lazy_static;

use std::{
    collections::HashMap,
    ffi, fs, path,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering::SeqCst},
        Arc, Mutex, Weak,
    },
};

use crate::{
    block::{BlockFile, Store},
    cache,
    db::{superblock, Config},
    doclog::{self, LogCursor},
    seqidx::SeqIndex,
    trie::Hbtrie,
    util::Spinlock,
    wal::{self, Wal},
    CmpFn, Error, Result, BLK_NOT_FOUND, BLOCK_SIZE,
};

lazy_static! {
    // process-wide registry of per-file shared state, keyed by
    // canonicalized path. Handles own the state through Arc, the
    // registry only observes it, so the entry dies with the last
    // handle.
    static ref REGISTRY: Spinlock<HashMap<path::PathBuf, Weak<FileState>>> =
        Spinlock::new(HashMap::new());
    static ref FILE_IDS: AtomicU64 = AtomicU64::new(1);
    static ref HANDLE_IDS: AtomicU64 = AtomicU64::new(1);
}

/// A handle's pinned view: index roots plus the sequence-number
/// horizon deciding write-ahead buffer visibility.
#[derive(Clone, Copy, Debug)]
pub(crate) struct View {
    pub primary_root: u64,
    pub seq_root: u64,
    pub pin_seqno: u64,
}

// Mutable per-file state serialized by the writer mutex.
pub(crate) struct WriterState {
    pub cursor: LogCursor,
    pub wal_frontier: u64,
    // live roots, reflecting every flushed write.
    pub primary_root: u64,
    pub seq_root: u64,
    pub ndocs: u64,
    pub nlivedocs: u64,
    pub datasize: u64,
    // armed while a compaction runs; writes are mirrored there.
    pub compacting: Option<Arc<FileState>>,
}

/// Shared state of one open database file. All handles (and
/// iterators) against the file hold it through an `Arc`.
pub(crate) struct FileState {
    pub location: ffi::OsString,
    pub config: Config,
    pub store: Store,
    pub wal: Spinlock<Wal>,
    pub writer: Mutex<WriterState>,
    pub committed: Spinlock<View>,
    pub live: Spinlock<View>,
    pub next_seqnum: AtomicU64,
    pub cmp: Spinlock<Option<CmpFn>>,
    pub wrote: AtomicBool,
    /// Hand-off pointer published by a finished compaction; every
    /// handle operation follows it.
    pub redirect: Spinlock<Option<Arc<FileState>>>,
    /// On-disk marker adopted at open, driving auto-compaction
    /// recovery.
    pub compact_target: Option<String>,
}

impl Drop for FileState {
    fn drop(&mut self) {
        if self.config.buffercache_size > 0 {
            cache::deregister(self.store.to_file_id());
        }
    }
}

impl FileState {
    pub fn has_commit(&self) -> bool {
        self.store.to_last_header_bid() != BLK_NOT_FOUND
    }

    pub fn to_cmp(&self) -> Option<CmpFn> {
        *self.cmp.lock()
    }

    pub fn primary_index(&self) -> Hbtrie {
        Hbtrie::new(self.config.chunksize, self.config.offsetsize, self.to_cmp())
    }

    pub fn seq_index(&self) -> SeqIndex {
        SeqIndex::new(self.config.offsetsize)
    }
}

pub(crate) fn new_handle_id() -> u64 {
    HANDLE_IDS.fetch_add(1, SeqCst)
}

// Best-effort canonical key for the registry: resolve through the
// parent when the file itself does not exist yet.
fn canon_path(location: &path::Path) -> path::PathBuf {
    match location.canonicalize() {
        Ok(canon) => canon,
        Err(_) => match (location.parent(), location.file_name()) {
            (Some(dir), Some(name)) if dir.as_os_str().is_empty() => {
                path::PathBuf::from(".").canonicalize().map(|d| d.join(name)).unwrap_or_else(|_| location.to_path_buf())
            }
            (Some(dir), Some(name)) => dir
                .canonicalize()
                .map(|dir| dir.join(name))
                .unwrap_or_else(|_| location.to_path_buf()),
            _ => location.to_path_buf(),
        },
    }
}

/// Open (or create) the shared state for `location`. Subsequent opens
/// of the same path share the same state; its index-shape options are
/// fixed by the first open.
pub(crate) fn open_file(location: &path::Path, config: &Config) -> Result<Arc<FileState>> {
    config.validate()?;
    let canon = canon_path(location);

    {
        let mut registry = REGISTRY.lock();
        registry.retain(|_, weak| weak.strong_count() > 0);
        if let Some(state) = registry.get(&canon).and_then(Weak::upgrade) {
            return Ok(state);
        }
    }

    let state = Arc::new(build_state(location, config)?);

    let mut registry = REGISTRY.lock();
    match registry.get(&canon).and_then(Weak::upgrade) {
        Some(winner) => Ok(winner), // lost a racing open, adopt theirs
        None => {
            registry.insert(canon, Arc::downgrade(&state));
            Ok(state)
        }
    }
}

/// Fresh shared state for a compaction target; the file must not
/// exist.
pub(crate) fn create_file(location: &path::Path, config: &Config) -> Result<Arc<FileState>> {
    let canon = canon_path(location);
    let blkfile = Arc::new(BlockFile::create(location.as_os_str())?);
    let state = Arc::new(fresh_state(location, config, blkfile)?);

    let mut registry = REGISTRY.lock();
    registry.retain(|_, weak| weak.strong_count() > 0);
    registry.insert(canon, Arc::downgrade(&state));
    Ok(state)
}

fn fresh_state(
    location: &path::Path,
    config: &Config,
    blkfile: Arc<BlockFile>,
) -> Result<FileState> {
    let file_id = FILE_IDS.fetch_add(1, SeqCst);
    let cached = config.buffercache_size > 0;
    if cached {
        cache::configure(config.buffercache_size);
        cache::register(file_id, Arc::clone(&blkfile));
    }
    let store = Store::new(file_id, blkfile, cached);

    let view = View {
        primary_root: BLK_NOT_FOUND,
        seq_root: BLK_NOT_FOUND,
        pin_seqno: 0,
    };
    let wtr = WriterState {
        cursor: LogCursor::default(),
        wal_frontier: 0,
        primary_root: BLK_NOT_FOUND,
        seq_root: BLK_NOT_FOUND,
        ndocs: 0,
        nlivedocs: 0,
        datasize: 0,
        compacting: None,
    };

    Ok(FileState {
        location: location.as_os_str().to_os_string(),
        config: config.clone(),
        store,
        wal: Spinlock::new(Wal::new(None)),
        writer: Mutex::new(wtr),
        committed: Spinlock::new(view),
        live: Spinlock::new(view),
        next_seqnum: AtomicU64::new(0),
        cmp: Spinlock::new(None),
        wrote: AtomicBool::new(false),
        redirect: Spinlock::new(None),
        compact_target: None,
    })
}

fn build_state(location: &path::Path, config: &Config) -> Result<FileState> {
    let exists = fs::metadata(location).map(|m| m.len() > 0).unwrap_or(false);
    let read_only = config.to_read_only();

    if !exists && read_only {
        return err_at!(NoDbFile, msg: "{:?}", location);
    }

    let blkfile = match fs::metadata(location).is_ok() {
        true => Arc::new(BlockFile::open(location.as_os_str())?),
        false => Arc::new(BlockFile::create(location.as_os_str())?),
    };

    let found = superblock::find_latest(&blkfile)?;
    let mut state = fresh_state(location, config, blkfile)?;

    let (bid, sb) = match found {
        Some((bid, sb)) => (bid, sb),
        None if read_only => return err_at!(NoDbFile, msg: "no commit in {:?}", location),
        None => return Ok(state), // fresh or garbage-only file
    };

    log::debug!(
        target: "grove",
        "open {:?} adopting superblock at bid {}, seqnum {}",
        location, bid, sb.next_seqnum
    );

    state.store.set_next_bid(bid + 1);
    state.store.set_last_header_bid(bid);
    state.next_seqnum.store(sb.next_seqnum, SeqCst);

    let view = View {
        primary_root: sb.primary_root_bid,
        seq_root: sb.seq_root_bid,
        pin_seqno: sb.next_seqnum,
    };
    *state.committed.lock() = view;
    *state.live.lock() = view;

    {
        let wtr = err_at!(Fatal, state.writer.get_mut())?;
        wtr.wal_frontier = sb.wal_frontier;
        wtr.primary_root = sb.primary_root_bid;
        wtr.seq_root = sb.seq_root_bid;
        wtr.ndocs = sb.ndocs;
        wtr.nlivedocs = sb.nlivedocs;
        wtr.datasize = sb.datasize;
    }

    // replay the document window after the last index flush into the
    // write-ahead buffer; these are committed writes that were never
    // flushed into the persistent indexes.
    let records = doclog::scan(&state.store, sb.wal_frontier, bid)?;
    if !records.is_empty() {
        log::debug!(target: "grove", "open {:?} replaying {} records", location, records.len());
        let mut wal = state.wal.lock();
        for (offset, rec) in records.into_iter() {
            let entry = wal::Entry {
                offset,
                seqnum: rec.seqnum,
                deleted: rec.deleted,
                owner: 0,
            };
            wal.insert(rec.key, entry);
        }
    }

    state.compact_target = sb.compact_target;
    Ok(state)
}

/// Append one document to `state`'s log and stage it in the
/// write-ahead buffer. Holds the writer lock across the optional
/// mirror into a compaction target so a finishing compaction cannot
/// slip between the two writes.
pub(crate) fn write_into(
    state: &Arc<FileState>,
    key: &[u8],
    meta: &[u8],
    body: Option<&[u8]>,
    owner: u64,
    seqnum: Option<u64>,
) -> Result<(u64, u64)> {
    let mut wtr = err_at!(Fatal, state.writer.lock())?;

    let seqnum = match seqnum {
        Some(seqnum) => {
            state.next_seqnum.fetch_max(seqnum + 1, SeqCst);
            seqnum
        }
        None => state.next_seqnum.fetch_add(1, SeqCst),
    };
    let rec = doclog::Record::new(key, meta, body, seqnum);
    let offset = doclog::write_doc(&state.store, &mut wtr.cursor, &rec)?;

    {
        let entry = wal::Entry { offset, seqnum, deleted: rec.deleted, owner };
        state.wal.lock().insert(key.to_vec(), entry);
    }
    wtr.ndocs += 1;
    wtr.datasize += rec.length as u64;
    state.wrote.store(true, SeqCst);

    if let Some(target) = wtr.compacting.as_ref().map(Arc::clone) {
        write_into(&target, key, meta, body, owner, Some(seqnum))?;
    }
    Ok((seqnum, offset))
}

/// Drain the write-ahead buffer into the persistent indexes, in
/// insertion order, and advance the replay frontier. Caller holds the
/// writer lock.
pub(crate) fn flush_wal_locked(state: &FileState, wtr: &mut WriterState) -> Result<()> {
    let drained = state.wal.lock().to_entries();
    let use_seq = state.config.seqtree_opt;
    let trie = state.primary_index();
    let seqidx = state.seq_index();
    let store = &state.store;

    // retire the sequence number and footprint of a superseded
    // version; its offset comes out of the primary index.
    fn retire(
        store: &Store,
        seqidx: &SeqIndex,
        use_seq: bool,
        wtr: &mut WriterState,
        old: Option<u64>,
    ) -> Result<bool> {
        match old {
            Some(old_off) => {
                let old_meta = doclog::read_doc_meta(store, old_off)?;
                if use_seq {
                    wtr.seq_root = seqidx.remove(store, wtr.seq_root, old_meta.seqnum)?;
                }
                wtr.datasize = wtr.datasize.saturating_sub(old_meta.length as u64);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    let n_drained = drained.len();
    for (key, entry) in drained.into_iter() {
        if entry.deleted {
            let (root, old) = trie.remove(store, wtr.primary_root, &key)?;
            wtr.primary_root = root;
            if retire(store, &seqidx, use_seq, wtr, old)? {
                wtr.nlivedocs = wtr.nlivedocs.saturating_sub(1);
            }
        } else {
            let (root, old) = trie.insert(store, wtr.primary_root, &key, entry.offset)?;
            wtr.primary_root = root;
            if !retire(store, &seqidx, use_seq, wtr, old)? {
                wtr.nlivedocs += 1;
            }
        }
        if use_seq {
            wtr.seq_root = seqidx.put(store, wtr.seq_root, entry.seqnum, entry.offset)?;
        }
    }

    wtr.wal_frontier = wtr.cursor.frontier(store);
    // publish the new roots before emptying the buffer; a reader
    // landing in between sees the same version twice, never neither.
    *state.live.lock() = View {
        primary_root: wtr.primary_root,
        seq_root: wtr.seq_root,
        pin_seqno: state.next_seqnum.load(SeqCst),
    };
    state.wal.lock().clear();

    if n_drained > 0 {
        log::debug!(
            target: "grove",
            "flush {:?} applied {} entries", state.location, n_drained
        );
    }
    Ok(())
}

/// Write a commit marker for the current live state. Caller holds the
/// writer lock.
pub(crate) fn commit_locked(
    state: &FileState,
    wtr: &mut WriterState,
    compact_target: Option<String>,
) -> Result<u64> {
    if state.wal.lock().len() >= state.config.wal_threshold {
        flush_wal_locked(state, wtr)?;
    }
    // seal so no later write lands physically before this marker.
    wtr.cursor.seal();

    // everything the marker references goes durable first.
    state.store.flush()?;

    let bid = state.store.alloc();
    let sb = superblock::Superblock {
        last_header_bid: bid,
        prev_header_bid: state.store.to_last_header_bid(),
        primary_root_bid: wtr.primary_root,
        seq_root_bid: wtr.seq_root,
        next_seqnum: state.next_seqnum.load(SeqCst),
        ndocs: wtr.ndocs,
        nlivedocs: wtr.nlivedocs,
        datasize: wtr.datasize,
        wal_frontier: wtr.wal_frontier,
        compact_target,
    };
    state.store.write_block_direct(&sb.to_block(bid)?)?;
    state.store.as_block_file().sync()?;
    state.store.set_last_header_bid(bid);

    *state.committed.lock() = View {
        primary_root: wtr.primary_root,
        seq_root: wtr.seq_root,
        pin_seqno: state.next_seqnum.load(SeqCst),
    };

    log::debug!(target: "grove", "commit {:?} superblock at bid {}", state.location, bid);
    Ok(bid)
}

/// Registry teardown for [crate::shutdown].
pub(crate) fn clear_registry() {
    REGISTRY.lock().clear();
}

/// Blocks a file occupies, for tests and stats.
pub(crate) fn file_blocks(state: &FileState) -> Result<u64> {
    Ok(state.store.as_block_file().to_len()? / (BLOCK_SIZE as u64))
}
