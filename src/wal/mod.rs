//! Module implement the write-ahead buffer.
//!
//! Every database file carries one in-memory buffer absorbing recent
//! writes: an ordered map from key to the newest `(offset, seqnum,
//! flags)` written for that key since the last index flush. The
//! document bytes are already durable in the log; the buffer holds
//! only the *index* of them, shadowing the persistent indexes until a
//! flush drains it, in insertion order, into the HB+-trie and the
//! sequence index.
//!
//! Entries are tagged with the id of the handle that wrote them, and
//! a sequence-number; a handle pinned at seqno `p` sees an entry when
//! `entry.seqnum < p` or when the entry is its own. That rule gives
//! committed-state visibility to idle handles and read-your-writes to
//! dirty ones.

use std::{
    cmp::Ordering,
    collections::BTreeMap,
    fmt::{self, Display},
    result,
};

use crate::CmpFn;

/// Key wrapper ordering by the file's comparator, byte-wise when no
/// custom comparator is set.
#[derive(Clone)]
pub struct OrdKey {
    pub bytes: Vec<u8>,
    cmp: Option<CmpFn>,
}

impl OrdKey {
    fn new(bytes: Vec<u8>, cmp: Option<CmpFn>) -> OrdKey {
        OrdKey { bytes, cmp }
    }
}

impl Eq for OrdKey {}

impl PartialEq for OrdKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl PartialOrd for OrdKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrdKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.cmp {
            Some(cmp) => cmp(&self.bytes, &other.bytes),
            None => self.bytes.cmp(&other.bytes),
        }
    }
}

/// Index entry for the newest write of a key.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Entry {
    pub offset: u64,
    pub seqnum: u64,
    pub deleted: bool,
    /// Id of the writing handle; 0 for entries rebuilt by replay.
    pub owner: u64,
}

impl Entry {
    /// Whether a handle pinned at `pin_seqno` sees this entry.
    #[inline]
    pub fn visible_to(&self, pin_seqno: u64, owner: u64) -> bool {
        self.seqnum < pin_seqno || self.owner == owner
    }
}

impl Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(f, "entry<seqnum:{} deleted:{}>", self.seqnum, self.deleted)
    }
}

/// Per-file write-ahead buffer. Callers guard it with the file's
/// spinlock.
pub struct Wal {
    cmp: Option<CmpFn>,
    entries: BTreeMap<OrdKey, Entry>,
    order: Vec<OrdKey>, // first-insertion order, drained on flush
    byseq: BTreeMap<u64, OrdKey>,
}

impl Wal {
    pub fn new(cmp: Option<CmpFn>) -> Wal {
        Wal {
            cmp,
            entries: BTreeMap::new(),
            order: vec![],
            byseq: BTreeMap::new(),
        }
    }

    /// Install a custom comparator. Only legal while empty, enforced
    /// by the handle layer as set-before-first-write.
    pub fn set_cmp(&mut self, cmp: CmpFn) {
        debug_assert!(self.entries.is_empty());
        self.cmp = Some(cmp);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stage the newest write for `key`. An existing entry is
    /// superseded in place, forgetting its sequence-number.
    pub fn insert(&mut self, key: Vec<u8>, entry: Entry) {
        let key = OrdKey::new(key, self.cmp);
        self.byseq.insert(entry.seqnum, key.clone());
        match self.entries.insert(key.clone(), entry) {
            Some(old) => {
                self.byseq.remove(&old.seqnum);
            }
            None => self.order.push(key),
        }
    }

    pub fn lookup(&self, key: &[u8], pin_seqno: u64, owner: u64) -> Option<Entry> {
        let key = OrdKey::new(key.to_vec(), self.cmp);
        match self.entries.get(&key) {
            Some(entry) if entry.visible_to(pin_seqno, owner) => Some(*entry),
            _ => None,
        }
    }

    pub fn lookup_seq(&self, seqnum: u64, pin_seqno: u64, owner: u64) -> Option<Entry> {
        let entry = self.entries.get(self.byseq.get(&seqnum)?)?;
        match entry.seqnum == seqnum && entry.visible_to(pin_seqno, owner) {
            true => Some(*entry),
            false => None,
        }
    }

    /// Every entry in first-insertion order, the order a flush
    /// applies them to the persistent indexes. The buffer is left
    /// intact; the flusher calls [Wal::clear] once the new index
    /// roots are published, so concurrent readers always find a key
    /// in at least one of the two places.
    pub fn to_entries(&self) -> Vec<(Vec<u8>, Entry)> {
        let mut out = Vec::with_capacity(self.order.len());
        for key in self.order.iter() {
            if let Some(entry) = self.entries.get(key) {
                out.push((key.bytes.clone(), *entry));
            }
        }
        out
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.byseq.clear();
    }

    /// Freeze the entries visible to `(pin_seqno, owner)` into a
    /// standalone buffer. Handles pin one of these next to their
    /// index roots, so a later flush draining the shared buffer
    /// cannot move their view.
    pub fn snapshot(&self, pin_seqno: u64, owner: u64) -> Wal {
        let mut snap = Wal::new(self.cmp);
        for key in self.order.iter() {
            match self.entries.get(key) {
                Some(entry) if entry.visible_to(pin_seqno, owner) => {
                    snap.insert(key.bytes.clone(), *entry);
                }
                _ => (),
            }
        }
        snap
    }

    /// Entries visible to `(pin_seqno, owner)` in comparator order,
    /// for merge iteration against the primary index.
    pub fn visible(&self, pin_seqno: u64, owner: u64) -> Vec<(Vec<u8>, Entry)> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.visible_to(pin_seqno, owner))
            .map(|(key, entry)| (key.bytes.clone(), *entry))
            .collect()
    }

    /// Visible entries in sequence-number order, for merge iteration
    /// against the sequence index.
    pub fn visible_by_seq(&self, pin_seqno: u64, owner: u64) -> Vec<(u64, Entry)> {
        self.byseq
            .iter()
            .filter_map(|(seqnum, key)| {
                let entry = self.entries.get(key)?;
                match entry.seqnum == *seqnum && entry.visible_to(pin_seqno, owner) {
                    true => Some((*seqnum, *entry)),
                    false => None,
                }
            })
            .collect()
    }
}
