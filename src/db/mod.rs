//! Module implement the database handle and its lifecycle.
//!
//! A [Db] value is one open handle on one database file. Handles on
//! the same path share the file's state - log, indexes, write-ahead
//! buffer, allocator - through a process-wide registry, while each
//! handle pins its own view: the index roots and sequence horizon of
//! the last commit or flush it observed. Copy-on-write indexes keep
//! that view stable however far other handles move ahead; a handle
//! catches up when it commits, flushes, or reopens. A handle that has
//! written since its pin reads the live state instead, so writers
//! always see their own writes.
//!
//! [Db::commit] makes everything written through the file durable;
//! [Db::compact] rewrites the live set into a new file and every
//! handle transparently migrates there. Dropping the last handle of
//! a file releases its shared state.

use std::{
    ffi,
    ops::{Bound, RangeBounds},
    path,
    sync::{atomic::Ordering::SeqCst, Arc},
};

mod compact;
mod config;
mod doc;
mod iter;
mod shared;
mod superblock;

pub use config::{
    Config, DurabilityOpt, BUFFERCACHE_SIZE, CHUNKSIZE, OFFSETSIZE, WAL_THRESHOLD,
};
pub use doc::Doc;
pub use iter::{Iter, IterOptions, SeqIter};
pub use superblock::{Superblock, MAGIC, VERSION};

use crate::{
    cache,
    db::shared::{FileState, View},
    doclog, wal, CmpFn, Error, Result,
};

/// Tear down the process-wide state: flush the buffer cache and drop
/// the file registry. Open handles stay usable; call this between
/// test scenarios or at process exit.
pub fn shutdown() -> Result<()> {
    cache::shutdown()?;
    shared::clear_registry();
    Ok(())
}

/// Counters of one open database file, refer [Db::to_stats].
#[derive(Clone, Debug)]
pub struct Stats {
    pub location: ffi::OsString,
    /// Records written to this file over its lifetime.
    pub ndocs: u64,
    /// Keys currently live.
    pub nlivedocs: u64,
    /// Bytes of live records.
    pub datasize: u64,
    /// Sequence number the next write will take.
    pub next_seqnum: u64,
    /// Entries staged in the write-ahead buffer.
    pub wal_entries: usize,
    /// Blocks in the file.
    pub file_blocks: u64,
}

/// Handle on a database file, refer [Db::open].
pub struct Db {
    state: Arc<FileState>,
    view: View,
    // write-ahead entries frozen at pin time; paired with `view`
    // they make the handle's snapshot immune to concurrent flushes.
    wal_snap: Arc<wal::Wal>,
    dirty: bool,
    id: u64,
    read_only: bool,
}

impl Db {
    /// Open a database file, creating it when missing unless the
    /// configuration says read-only. If the file carries a completed
    /// compaction marker pointing at a valid newer file, the handle
    /// transparently converges there.
    pub fn open<P>(location: P, config: Config) -> Result<Db>
    where
        P: AsRef<path::Path>,
    {
        let read_only = config.to_read_only();
        let mut state = shared::open_file(location.as_ref(), &config)?;

        let mut hops = 0;
        loop {
            let next = state.redirect.lock().clone();
            if let Some(next) = next {
                state = next;
                continue;
            }
            match state.compact_target.clone() {
                Some(target) if hops < 8 => {
                    let tpath = path::PathBuf::from(&target);
                    if !tpath.is_file() {
                        break;
                    }
                    match shared::open_file(&tpath, &config) {
                        Ok(tstate) if tstate.has_commit() => {
                            log::debug!(
                                target: "grove",
                                "open {:?} converging on compacted {:?}",
                                state.location, tstate.location
                            );
                            state = tstate;
                            hops += 1;
                        }
                        _ => break, // stale marker, this file stays authoritative
                    }
                }
                _ => break,
            }
        }

        let view = *state.committed.lock();
        let mut db = Db {
            state,
            view,
            wal_snap: Arc::new(wal::Wal::new(None)),
            dirty: false,
            id: shared::new_handle_id(),
            read_only,
        };
        db.pin_committed();
        Ok(db)
    }

    /// Close this handle. Nothing is flushed; commit first for
    /// durability.
    pub fn close(self) -> Result<()> {
        Ok(())
    }

    // pin this handle at the file's committed state: index roots plus
    // a freeze of the write-ahead entries that state covers. Holding
    // the writer lock keeps a concurrent flush from slipping between
    // the two reads.
    fn pin_committed(&mut self) {
        let _wtr = self.state.writer.lock();
        self.view = *self.state.committed.lock();
        self.wal_snap =
            Arc::new(self.state.wal.lock().snapshot(self.view.pin_seqno, self.id));
        self.dirty = false;
    }

    // follow a compaction hand-off, re-pinning on the new file.
    fn resolve(&mut self) {
        loop {
            let next = self.state.redirect.lock().clone();
            match next {
                Some(next) => {
                    self.state = next;
                    self.pin_committed();
                }
                None => break,
            }
        }
    }

    fn effective_view(&self) -> View {
        match self.dirty {
            // a writing handle reads the head, including every entry
            // still staged in the write-ahead buffer.
            true => {
                let live = *self.state.live.lock();
                View { pin_seqno: u64::MAX, ..live }
            }
            false => self.view,
        }
    }

    // write-ahead lookup honoring the handle's snapshot: a dirty
    // handle reads the shared buffer, a clean one its frozen copy.
    fn wal_lookup(&self, key: &[u8]) -> Option<wal::Entry> {
        match self.dirty {
            true => self.state.wal.lock().lookup(key, u64::MAX, self.id),
            false => self.wal_snap.lookup(key, u64::MAX, self.id),
        }
    }

    fn wal_lookup_seq(&self, seqnum: u64) -> Option<wal::Entry> {
        match self.dirty {
            true => self.state.wal.lock().lookup_seq(seqnum, u64::MAX, self.id),
            false => self.wal_snap.lookup_seq(seqnum, u64::MAX, self.id),
        }
    }

    fn wal_visible(&self) -> Vec<(Vec<u8>, wal::Entry)> {
        match self.dirty {
            true => self.state.wal.lock().visible(u64::MAX, self.id),
            false => self.wal_snap.visible(u64::MAX, self.id),
        }
    }

    fn wal_visible_by_seq(&self) -> Vec<(u64, wal::Entry)> {
        match self.dirty {
            true => self.state.wal.lock().visible_by_seq(u64::MAX, self.id),
            false => self.wal_snap.visible_by_seq(u64::MAX, self.id),
        }
    }

    fn check_writable(&self) -> Result<()> {
        match self.read_only {
            true => err_at!(RdonlyViolation, msg: "{:?}", self.state.location),
            false => Ok(()),
        }
    }

    /// Write `doc`, live or tombstone (`body: None`), assigning and
    /// returning its sequence number. Durable only after the next
    /// [Db::commit].
    pub fn set(&mut self, doc: &mut Doc) -> Result<u64> {
        self.resolve();
        self.check_writable()?;
        if doc.key.is_empty() || doc.key.len() > doclog::KEY_MAX {
            err_at!(InvalidArgs, msg: "key length {}", doc.key.len())?;
        }

        let (seqnum, offset) = shared::write_into(
            &self.state,
            &doc.key,
            &doc.meta,
            doc.body.as_deref(),
            self.id,
            None,
        )?;

        doc.seqnum = seqnum;
        doc.offset = offset;
        doc.deleted = doc.body.is_none();
        doc.length = doclog::encoded_len(&doc.key, &doc.meta, doc.body.as_deref());
        self.dirty = true;
        Ok(seqnum)
    }

    /// Get the live document for `key`, populating meta, body,
    /// seqnum and offset. Deleted and absent keys are `KeyNotFound`.
    pub fn get(&mut self, key: &[u8]) -> Result<Doc> {
        self.do_get(key, false)
    }

    /// [Db::get] without reading the body.
    pub fn get_metaonly(&mut self, key: &[u8]) -> Result<Doc> {
        self.do_get(key, true)
    }

    fn do_get(&mut self, key: &[u8], metaonly: bool) -> Result<Doc> {
        self.resolve();
        let view = self.effective_view();

        let offset = match self.wal_lookup(key) {
            Some(entry) if entry.deleted => return err_at!(KeyNotFound, msg: "missing key"),
            Some(entry) => entry.offset,
            None => {
                let trie = self.state.primary_index();
                match trie.find(&self.state.store, view.primary_root, key)? {
                    Some(offset) => offset,
                    None => return err_at!(KeyNotFound, msg: "missing key"),
                }
            }
        };

        let rec = match metaonly {
            true => doclog::read_doc_meta(&self.state.store, offset)?,
            false => doclog::read_doc(&self.state.store, offset)?,
        };
        Ok(Doc::from_record(rec, offset))
    }

    /// Get the document written with sequence number `seqnum`.
    /// Tombstone writes resolve too, with `deleted` set and no body;
    /// superseded numbers are `KeyNotFound`.
    pub fn get_by_seq(&mut self, seqnum: u64) -> Result<Doc> {
        self.resolve();
        if !self.state.config.seqtree_opt {
            err_at!(InvalidArgs, msg: "sequence index disabled")?;
        }
        let view = self.effective_view();

        let offset = match self.wal_lookup_seq(seqnum) {
            Some(entry) => entry.offset,
            None => {
                let seqidx = self.state.seq_index();
                match seqidx.get(&self.state.store, view.seq_root, seqnum)? {
                    Some(offset) => offset,
                    None => return err_at!(KeyNotFound, msg: "missing seqnum {}", seqnum),
                }
            }
        };

        let rec = doclog::read_doc(&self.state.store, offset)?;
        Ok(Doc::from_record(rec, offset))
    }

    /// Move the write-ahead buffer into the persistent indexes
    /// without writing a commit marker.
    pub fn flush_wal(&mut self) -> Result<()> {
        self.resolve();
        self.check_writable()?;
        let state = Arc::clone(&self.state);
        let mut wtr = err_at!(Fatal, state.writer.lock())?;
        shared::flush_wal_locked(&state, &mut wtr)?;
        self.view = *state.live.lock();
        self.wal_snap = Arc::new(wal::Wal::new(None));
        self.dirty = false;
        Ok(())
    }

    /// Durably publish everything written through this file. Flushes
    /// the write-ahead buffer first when it exceeds the configured
    /// threshold, then appends and syncs a superblock.
    pub fn commit(&mut self) -> Result<()> {
        self.resolve();
        self.check_writable()?;
        let state = Arc::clone(&self.state);
        let mut wtr = err_at!(Fatal, state.writer.lock())?;
        shared::commit_locked(&state, &mut wtr, None)?;
        self.view = *state.committed.lock();
        self.wal_snap =
            Arc::new(state.wal.lock().snapshot(self.view.pin_seqno, self.id));
        self.dirty = false;
        Ok(())
    }

    /// Rewrite the live set into a fresh file at `target`, dropping
    /// stale versions and tombstones, and migrate every open handle
    /// to it. Fails with `FileExists` when `target` exists.
    pub fn compact<P>(&mut self, target: P) -> Result<()>
    where
        P: AsRef<path::Path>,
    {
        self.resolve();
        self.check_writable()?;
        let target = compact::run(&self.state, target.as_ref())?;
        self.state = target;
        self.pin_committed();
        Ok(())
    }

    /// Cursor over documents in key order within `range`, on this
    /// handle's pinned view. Tombstones are skipped.
    pub fn range<R, Q>(&mut self, range: R, opts: IterOptions) -> Result<Iter>
    where
        R: RangeBounds<Q>,
        Q: AsRef<[u8]>,
    {
        self.resolve();
        let view = self.effective_view();
        let start = to_key_bound(range.start_bound());
        let end = to_key_bound(range.end_bound());
        let staged = self.wal_visible();
        Iter::new(Arc::clone(&self.state), view, staged, start, end, opts.metaonly)
    }

    /// Cursor over documents in sequence-number order within `range`,
    /// on this handle's pinned view. Tombstone writes are yielded.
    pub fn seq_range<R>(&mut self, range: R, opts: IterOptions) -> Result<SeqIter>
    where
        R: RangeBounds<u64>,
    {
        self.resolve();
        if !self.state.config.seqtree_opt {
            err_at!(InvalidArgs, msg: "sequence index disabled")?;
        }
        let view = self.effective_view();
        let start = to_seq_bound(range.start_bound());
        let end = to_seq_bound(range.end_bound());
        let staged = self.wal_visible_by_seq();
        let shadow = self.wal_visible();
        SeqIter::new(Arc::clone(&self.state), view, staged, shadow, start, end, opts.metaonly)
    }

    /// Override the key ordering for this file. Legal only before the
    /// first write through this file's shared state; the comparator
    /// then applies to every handle and survives compaction. A file
    /// built with a custom comparator must have the same comparator
    /// installed again right after every open.
    pub fn set_custom_cmp(&mut self, cmp: CmpFn) -> Result<()> {
        self.resolve();
        self.check_writable()?;
        if self.state.wrote.load(SeqCst) || !self.state.wal.lock().is_empty() {
            err_at!(InvalidArgs, msg: "comparator after first write")?;
        }
        *self.state.cmp.lock() = Some(cmp);
        self.state.wal.lock().set_cmp(cmp);
        self.pin_committed();
        Ok(())
    }

    /// Location of the file this handle currently operates on; after
    /// a compaction this is the compacted file.
    pub fn to_location(&mut self) -> ffi::OsString {
        self.resolve();
        self.state.location.clone()
    }

    pub fn to_stats(&mut self) -> Result<Stats> {
        self.resolve();
        let wtr = err_at!(Fatal, self.state.writer.lock())?;
        Ok(Stats {
            location: self.state.location.clone(),
            ndocs: wtr.ndocs,
            nlivedocs: wtr.nlivedocs,
            datasize: wtr.datasize,
            next_seqnum: self.state.next_seqnum.load(SeqCst),
            wal_entries: self.state.wal.lock().len(),
            file_blocks: shared::file_blocks(&self.state)?,
        })
    }
}

fn to_key_bound<Q: AsRef<[u8]>>(bound: Bound<&Q>) -> Bound<Vec<u8>> {
    match bound {
        Bound::Unbounded => Bound::Unbounded,
        Bound::Included(key) => Bound::Included(key.as_ref().to_vec()),
        Bound::Excluded(key) => Bound::Excluded(key.as_ref().to_vec()),
    }
}

fn to_seq_bound(bound: Bound<&u64>) -> Bound<u64> {
    match bound {
        Bound::Unbounded => Bound::Unbounded,
        Bound::Included(seqnum) => Bound::Included(*seqnum),
        Bound::Excluded(seqnum) => Bound::Excluded(*seqnum),
    }
}


#[cfg(test)]
#[path = "iter_test.rs"]
mod iter_test;
