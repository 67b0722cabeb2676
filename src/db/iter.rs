use std::{cmp::Ordering, collections::BTreeMap, ops::Bound, sync::Arc, vec};

use crate::{
    db::{
        shared::{FileState, View},
        Doc,
    },
    doclog,
    seqidx::{SeqCursor, SeqIndex},
    trie::{self, Hbtrie},
    wal, CmpFn, Result,
};

/// Options for [crate::Db::range].
#[derive(Clone, Copy, Debug, Default)]
pub struct IterOptions {
    /// Skip body reads; yielded documents carry key, meta, seqnum and
    /// offset only.
    pub metaonly: bool,
}

/// Cursor over the documents of a pinned snapshot in key order,
/// merging the write-ahead buffer with the primary index. Entries in
/// the buffer shadow the index (a key lives in exactly one of the
/// two); tombstones are skipped. The cursor owns an `Arc` of the
/// file state, so it stays on its snapshot even across a concurrent
/// compaction hand-off, and releases everything when dropped.
pub struct Iter {
    state: Arc<FileState>,
    trie: Hbtrie,
    titer: trie::Iter,
    tpeek: Option<(Vec<u8>, u64)>,
    witer: vec::IntoIter<(Vec<u8>, wal::Entry)>,
    wpeek: Option<(Vec<u8>, wal::Entry)>,
    end: Bound<Vec<u8>>,
    metaonly: bool,
    cmp: Option<CmpFn>,
    done: bool,
}

impl Iter {
    pub(crate) fn new(
        state: Arc<FileState>,
        view: View,
        staged: Vec<(Vec<u8>, wal::Entry)>,
        start: Bound<Vec<u8>>,
        end: Bound<Vec<u8>>,
        metaonly: bool,
    ) -> Result<Iter> {
        let cmp = state.to_cmp();
        let trie = state.primary_index();

        let titer = {
            let bound = match &start {
                Bound::Unbounded => Bound::Unbounded,
                Bound::Included(key) => Bound::Included(key.as_slice()),
                Bound::Excluded(key) => Bound::Excluded(key.as_slice()),
            };
            trie.iter(&state.store, view.primary_root, bound)?
        };

        let compare = |a: &[u8], b: &[u8]| match cmp {
            Some(cmp) => cmp(a, b),
            None => a.cmp(b),
        };
        let wal_items: Vec<(Vec<u8>, wal::Entry)> = staged
            .into_iter()
            .filter(|(key, _)| match &start {
                Bound::Unbounded => true,
                Bound::Included(skey) => compare(key, skey) != Ordering::Less,
                Bound::Excluded(skey) => compare(key, skey) == Ordering::Greater,
            })
            .collect();

        Ok(Iter {
            state,
            trie,
            titer,
            tpeek: None,
            witer: wal_items.into_iter(),
            wpeek: None,
            end,
            metaonly,
            cmp,
            done: false,
        })
    }

    fn key_cmp(&self, a: &[u8], b: &[u8]) -> Ordering {
        match self.cmp {
            Some(cmp) => cmp(a, b),
            None => a.cmp(b),
        }
    }

    fn past_end(&self, key: &[u8]) -> bool {
        match &self.end {
            Bound::Unbounded => false,
            Bound::Included(ekey) => self.key_cmp(key, ekey) == Ordering::Greater,
            Bound::Excluded(ekey) => self.key_cmp(key, ekey) != Ordering::Less,
        }
    }

    fn next_doc(&mut self) -> Result<Option<Doc>> {
        loop {
            if self.done {
                return Ok(None);
            }
            if self.tpeek.is_none() {
                self.tpeek = self.titer.next(&self.trie, &self.state.store)?;
            }
            if self.wpeek.is_none() {
                self.wpeek = self.witer.next();
            }

            let pick_buffer = match (&self.tpeek, &self.wpeek) {
                (None, None) => {
                    self.done = true;
                    return Ok(None);
                }
                (Some(_), None) => false,
                (None, Some(_)) => true,
                (Some((tkey, _)), Some((wkey, _))) => match self.key_cmp(wkey, tkey) {
                    Ordering::Less => true,
                    Ordering::Greater => false,
                    Ordering::Equal => {
                        self.tpeek = None; // the buffer shadows the index
                        true
                    }
                },
            };

            let (key, offset, deleted) = match pick_buffer {
                true => match self.wpeek.take() {
                    Some((key, entry)) => (key, entry.offset, entry.deleted),
                    None => unreachable!(),
                },
                false => match self.tpeek.take() {
                    Some((key, offset)) => (key, offset, false),
                    None => unreachable!(),
                },
            };

            if self.past_end(&key) {
                self.done = true;
                return Ok(None);
            }
            if deleted {
                continue;
            }

            let rec = match self.metaonly {
                true => doclog::read_doc_meta(&self.state.store, offset)?,
                false => doclog::read_doc(&self.state.store, offset)?,
            };
            return Ok(Some(Doc::from_record(rec, offset)));
        }
    }
}

impl Iterator for Iter {
    type Item = Result<Doc>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_doc().transpose()
    }
}

/// Cursor over a pinned snapshot in sequence-number order, merging
/// the write-ahead buffer with the sequence index. Tombstone writes
/// are yielded (with `deleted` set and no body); index entries whose
/// key has a newer buffered version are skipped.
pub struct SeqIter {
    state: Arc<FileState>,
    seqidx: SeqIndex,
    cursor: SeqCursor,
    speek: Option<(u64, u64)>,
    witer: vec::IntoIter<(u64, wal::Entry)>,
    wpeek: Option<(u64, wal::Entry)>,
    shadow: BTreeMap<Vec<u8>, u64>,
    end: Bound<u64>,
    metaonly: bool,
    done: bool,
}

impl SeqIter {
    pub(crate) fn new(
        state: Arc<FileState>,
        view: View,
        staged: Vec<(u64, wal::Entry)>,
        shadow: Vec<(Vec<u8>, wal::Entry)>,
        start: Bound<u64>,
        end: Bound<u64>,
        metaonly: bool,
    ) -> Result<SeqIter> {
        let seqidx = state.seq_index();
        let cursor = seqidx.seek_ge(&state.store, view.seq_root, start)?;

        let wal_items: Vec<(u64, wal::Entry)> = staged
            .into_iter()
            .filter(|(seqnum, _)| match start {
                Bound::Unbounded => true,
                Bound::Included(from) => *seqnum >= from,
                Bound::Excluded(from) => *seqnum > from,
            })
            .collect();
        let shadow: BTreeMap<Vec<u8>, u64> = shadow
            .into_iter()
            .map(|(key, entry)| (key, entry.seqnum))
            .collect();

        Ok(SeqIter {
            state,
            seqidx,
            cursor,
            speek: None,
            witer: wal_items.into_iter(),
            wpeek: None,
            shadow,
            end,
            metaonly,
            done: false,
        })
    }

    fn past_end(&self, seqnum: u64) -> bool {
        match self.end {
            Bound::Unbounded => false,
            Bound::Included(till) => seqnum > till,
            Bound::Excluded(till) => seqnum >= till,
        }
    }

    fn next_doc(&mut self) -> Result<Option<Doc>> {
        loop {
            if self.done {
                return Ok(None);
            }
            if self.speek.is_none() {
                self.speek = self.cursor.next(&self.seqidx, &self.state.store)?;
            }
            if self.wpeek.is_none() {
                self.wpeek = self.witer.next();
            }

            let pick_buffer = match (&self.speek, &self.wpeek) {
                (None, None) => {
                    self.done = true;
                    return Ok(None);
                }
                (Some(_), None) => false,
                (None, Some(_)) => true,
                (Some((sseq, _)), Some((wseq, _))) => {
                    if wseq <= sseq {
                        if wseq == sseq {
                            self.speek = None; // same write seen twice
                        }
                        true
                    } else {
                        false
                    }
                }
            };

            let (seqnum, offset, from_index) = match pick_buffer {
                true => match self.wpeek.take() {
                    Some((seqnum, entry)) => (seqnum, entry.offset, false),
                    None => unreachable!(),
                },
                false => match self.speek.take() {
                    Some((seqnum, offset)) => (seqnum, offset, true),
                    None => unreachable!(),
                },
            };

            if self.past_end(seqnum) {
                self.done = true;
                return Ok(None);
            }

            let rec = match self.metaonly {
                true => doclog::read_doc_meta(&self.state.store, offset)?,
                false => doclog::read_doc(&self.state.store, offset)?,
            };
            if from_index {
                // a buffered newer version shadows this key.
                match self.shadow.get(&rec.key) {
                    Some(shadow_seq) if *shadow_seq != seqnum => continue,
                    _ => (),
                }
            }
            return Ok(Some(Doc::from_record(rec, offset)));
        }
    }
}

impl Iterator for SeqIter {
    type Item = Result<Doc>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_doc().transpose()
    }
}
