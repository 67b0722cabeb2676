//! Module implement the sequence-number index, a thin facade over the
//! [crate::btree] with fixed 8-byte big-endian keys. It maps every
//! sequence-number observable from the current commit, tombstone
//! writes included, to its record offset; superseded numbers are
//! removed when the write-ahead buffer flushes the newer version.

use std::ops::Bound;

use crate::{
    block::Store,
    btree::{Btree, Cursor},
    Result, BLK_NOT_FOUND,
};

#[derive(Clone, Copy)]
pub struct SeqIndex {
    bt: Btree,
}

impl SeqIndex {
    pub fn new(vsize: usize) -> SeqIndex {
        // sequence numbers always order byte-wise.
        SeqIndex { bt: Btree::new(vsize) }
    }

    /// Map `seqnum` to `offset`, returning the new root.
    pub fn put(&self, store: &Store, root: u64, seqnum: u64, offset: u64) -> Result<u64> {
        let (root, _) = self.bt.insert(store, root, &seqnum.to_be_bytes(), offset)?;
        Ok(root)
    }

    /// Unmap `seqnum`, returning the new root.
    pub fn remove(&self, store: &Store, root: u64, seqnum: u64) -> Result<u64> {
        let (root, _) = self.bt.remove(store, root, &seqnum.to_be_bytes())?;
        Ok(root)
    }

    /// Offset for `seqnum`, or None.
    pub fn get(&self, store: &Store, root: u64, seqnum: u64) -> Result<Option<u64>> {
        self.bt.find(store, root, &seqnum.to_be_bytes())
    }

    /// Cursor over `(seqnum, offset)` pairs starting at `from`.
    pub fn seek_ge(&self, store: &Store, root: u64, from: Bound<u64>) -> Result<SeqCursor> {
        let scratch: [u8; 8];
        let bound = match from {
            Bound::Unbounded => Bound::Unbounded,
            Bound::Included(seqnum) => {
                scratch = seqnum.to_be_bytes();
                Bound::Included(&scratch[..])
            }
            Bound::Excluded(seqnum) => {
                scratch = seqnum.to_be_bytes();
                Bound::Excluded(&scratch[..])
            }
        };
        let cursor = self.bt.seek_ge(store, root, bound)?;
        Ok(SeqCursor { cursor })
    }
}

pub struct SeqCursor {
    cursor: Cursor,
}

impl SeqCursor {
    pub fn next(&mut self, idx: &SeqIndex, store: &Store) -> Result<Option<(u64, u64)>> {
        match self.cursor.next(&idx.bt, store)? {
            Some((key, offset)) => {
                let mut scratch = [0_u8; 8];
                scratch.copy_from_slice(&key);
                Ok(Some((u64::from_be_bytes(scratch), offset)))
            }
            None => Ok(None),
        }
    }
}

/// Root for an empty index.
pub const EMPTY_ROOT: u64 = BLK_NOT_FOUND;

#[cfg(test)]
#[path = "seqidx_test.rs"]
mod seqidx_test;
