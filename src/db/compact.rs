use std::{fs, ops::Bound, path, sync::atomic::Ordering::SeqCst, sync::Arc};

use crate::{
    db::shared::{self, FileState},
    doclog, Error, Result,
};

/// Rewrite the live set of `state` into a fresh file at `target_loc`
/// and hand every open handle over to it.
///
/// The source stays fully writable throughout: once the mirror is
/// armed, concurrent `set`s land in both files, and the scan walks a
/// pinned copy-on-write snapshot. The marker superblock on the source
/// is the commit point; before it the source is authoritative and the
/// partial target is deleted on failure, after it open-time recovery
/// converges on the target.
pub(crate) fn run(state: &Arc<FileState>, target_loc: &path::Path) -> Result<Arc<FileState>> {
    match run_inner(state, target_loc) {
        Ok(target) => Ok(target),
        Err(err @ Error::FileExists(_, _)) => Err(err),
        Err(err) => {
            if let Ok(mut wtr) = state.writer.lock() {
                wtr.compacting = None;
            }
            fs::remove_file(target_loc).ok();
            let prefix = format!("{}:{}", file!(), line!());
            Err(Error::CompactionFail(prefix, err.to_string()))
        }
    }
}

fn run_inner(state: &Arc<FileState>, target_loc: &path::Path) -> Result<Arc<FileState>> {
    let target = shared::create_file(target_loc, &state.config)?;
    *target.cmp.lock() = state.to_cmp();
    if let Some(cmp) = state.to_cmp() {
        target.wal.lock().set_cmp(cmp);
    }

    log::info!(
        target: "grove",
        "compact {:?} into {:?}", state.location, target.location
    );

    // settle the source: flush so the primary index holds the whole
    // live set, commit, and arm the mirror for concurrent writers.
    let snapshot = {
        let mut wtr = err_at!(Fatal, state.writer.lock())?;
        if wtr.compacting.is_some() {
            err_at!(InvalidArgs, msg: "compaction already running")?;
        }
        shared::flush_wal_locked(state, &mut wtr)?;
        shared::commit_locked(state, &mut wtr, None)?;
        wtr.compacting = Some(Arc::clone(&target));
        wtr.primary_root
    };

    // stream the reachable records into the target. Tombstones never
    // reach the primary index, so they are dropped by construction.
    let trie = state.primary_index();
    let target_trie = target.primary_index();
    let target_seqidx = target.seq_index();
    let use_seq = target.config.seqtree_opt;

    let mut iter = trie.iter(&state.store, snapshot, Bound::Unbounded)?;
    let mut n_copied = 0_u64;
    while let Some((key, offset)) = iter.next(&trie, &state.store)? {
        let rec = doclog::read_doc(&state.store, offset)?;
        debug_assert!(!rec.deleted);
        debug_assert_eq!(rec.key, key);

        let mut wtr = err_at!(Fatal, target.writer.lock())?;
        target.next_seqnum.fetch_max(rec.seqnum + 1, SeqCst);
        let new_off = doclog::write_doc(&target.store, &mut wtr.cursor, &rec)?;
        let (root, old) = target_trie.insert(&target.store, wtr.primary_root, &key, new_off)?;
        wtr.primary_root = root;
        if use_seq {
            wtr.seq_root = target_seqidx.put(&target.store, wtr.seq_root, rec.seqnum, new_off)?;
        }
        wtr.ndocs += 1;
        if old.is_none() {
            wtr.nlivedocs += 1;
        }
        wtr.datasize += rec.length as u64;
        n_copied += 1;
    }
    target.wrote.store(true, SeqCst);

    // commit the target (draining mirrored writes), stamp the source
    // with the marker, and publish the hand-off.
    {
        let mut wtr = err_at!(Fatal, state.writer.lock())?;
        {
            let mut target_wtr = err_at!(Fatal, target.writer.lock())?;
            shared::flush_wal_locked(&target, &mut target_wtr)?;
            shared::commit_locked(&target, &mut target_wtr, None)?;
        }

        let marker = target.location.to_string_lossy().to_string();
        shared::commit_locked(state, &mut wtr, Some(marker))?;
        wtr.compacting = None;
    }
    *state.redirect.lock() = Some(Arc::clone(&target));

    log::info!(
        target: "grove",
        "compacted {:?}, {} live records", target.location, n_copied
    );
    Ok(target)
}
