use std::{cmp::Ordering, ops::Bound};

use crate::{
    block::Store,
    btree::{Btree, Cursor},
    CmpFn, Error, Result, BLK_NOT_FOUND,
};

/// Stateless handle for HB+-trie operations over a [Store]. The trie
/// is identified by the root block-id of its depth-0 B+-tree; every
/// mutating call returns the new root, copy-on-write all the way
/// down.
#[derive(Clone, Copy)]
pub struct Hbtrie {
    chunksize: usize,
    vsize: usize,
    bt: Btree,
}

impl Hbtrie {
    pub fn new(chunksize: usize, vsize: usize, cmp: Option<CmpFn>) -> Hbtrie {
        Hbtrie {
            chunksize,
            vsize,
            bt: Btree::with_cmp(vsize, cmp),
        }
    }

    // Top bit of the encoded value width marks a sub-tree pointer.
    #[inline]
    fn flag(&self) -> u64 {
        1 << (self.vsize * 8 - 1)
    }

    #[inline]
    fn is_subtree(&self, value: u64) -> bool {
        value & self.flag() != 0
    }

    #[inline]
    fn subroot(&self, value: u64) -> u64 {
        value & !self.flag()
    }

    #[inline]
    fn mark(&self, root: u64) -> u64 {
        root | self.flag()
    }

    #[inline]
    fn equals(&self, a: &[u8], b: &[u8]) -> bool {
        self.bt.key_cmp(a, b) == Ordering::Equal
    }

    // Whether fragment `frag` falls into the chunk's equivalence
    // class, i.e. would collide with it.
    #[inline]
    fn shares_chunk(&self, frag: &[u8], chunk: &[u8]) -> bool {
        frag.len() >= self.chunksize && self.equals(&frag[..self.chunksize], chunk)
    }

    fn suffix_at<'a>(&self, key: &'a [u8], depth: usize) -> &'a [u8] {
        &key[std::cmp::min(depth * self.chunksize, key.len())..]
    }

    /// Map `key` to `offset`, returning the new root and the previous
    /// offset if the key was present.
    pub fn insert(
        &self,
        store: &Store,
        root: u64,
        key: &[u8],
        offset: u64,
    ) -> Result<(u64, Option<u64>)> {
        if self.is_subtree(offset) {
            err_at!(FailConvert, msg: "offset {} overflows value width", offset)?;
        }
        self.do_insert(store, root, key, 0, offset)
    }

    fn do_insert(
        &self,
        store: &Store,
        root: u64,
        key: &[u8],
        depth: usize,
        offset: u64,
    ) -> Result<(u64, Option<u64>)> {
        let suffix = self.suffix_at(key, depth);
        if suffix.len() < self.chunksize {
            // short fragments cannot collide with a chunk, store inline.
            return self.bt.insert(store, root, suffix, offset);
        }

        let chunk = &suffix[..self.chunksize];
        let mut cursor = self.bt.seek_ge(store, root, Bound::Included(chunk))?;
        match cursor.next(&self.bt, store)? {
            Some((ekey, eval)) if self.is_subtree(eval) && self.equals(&ekey, chunk) => {
                // established sub-tree for this chunk, descend.
                let sub = self.subroot(eval);
                let (sub, old) = self.do_insert(store, sub, key, depth + 1, offset)?;
                let (root, _) = self.bt.insert(store, root, &ekey, self.mark(sub))?;
                Ok((root, old))
            }
            Some((ekey, _)) if self.equals(&ekey, suffix) => {
                // same logical key, plain overwrite.
                self.bt.insert(store, root, suffix, offset)
            }
            Some((ekey, eval)) if self.shares_chunk(&ekey, chunk) => {
                // first collision under this chunk, promote the inline
                // suffix into a fresh sub-tree and insert both keys.
                let (root, _) = self.bt.remove(store, root, &ekey)?;
                let (sub, _) =
                    self.bt.insert(store, BLK_NOT_FOUND, &ekey[self.chunksize..], eval)?;
                let (sub, old) = self.do_insert(store, sub, key, depth + 1, offset)?;
                debug_assert!(old.is_none());
                let (root, _) =
                    self.bt.insert(store, root, &ekey[..self.chunksize], self.mark(sub))?;
                Ok((root, old))
            }
            _ => self.bt.insert(store, root, suffix, offset),
        }
    }

    /// Get the offset for `key`, or None.
    pub fn find(&self, store: &Store, root: u64, key: &[u8]) -> Result<Option<u64>> {
        let mut root = root;
        let mut depth = 0;
        loop {
            let suffix = self.suffix_at(key, depth);
            if suffix.len() < self.chunksize {
                break self.bt.find(store, root, suffix);
            }
            let chunk = &suffix[..self.chunksize];
            let mut cursor = self.bt.seek_ge(store, root, Bound::Included(chunk))?;
            match cursor.next(&self.bt, store)? {
                Some((ekey, eval)) if self.is_subtree(eval) && self.equals(&ekey, chunk) => {
                    root = self.subroot(eval);
                    depth += 1;
                }
                Some((ekey, eval)) if self.equals(&ekey, suffix) => break Ok(Some(eval)),
                _ => break Ok(None),
            }
        }
    }

    /// Unmap `key`, returning the new root and the removed offset.
    /// Removing a missing key leaves the trie untouched.
    pub fn remove(
        &self,
        store: &Store,
        root: u64,
        key: &[u8],
    ) -> Result<(u64, Option<u64>)> {
        self.do_remove(store, root, key, 0)
    }

    fn do_remove(
        &self,
        store: &Store,
        root: u64,
        key: &[u8],
        depth: usize,
    ) -> Result<(u64, Option<u64>)> {
        let suffix = self.suffix_at(key, depth);
        if suffix.len() < self.chunksize {
            return self.bt.remove(store, root, suffix);
        }

        let chunk = &suffix[..self.chunksize];
        let mut cursor = self.bt.seek_ge(store, root, Bound::Included(chunk))?;
        match cursor.next(&self.bt, store)? {
            Some((ekey, eval)) if self.is_subtree(eval) && self.equals(&ekey, chunk) => {
                let sub = self.subroot(eval);
                let (sub, old) = self.do_remove(store, sub, key, depth + 1)?;
                if old.is_none() {
                    return Ok((root, None));
                }
                if sub == BLK_NOT_FOUND {
                    let (root, _) = self.bt.remove(store, root, &ekey)?;
                    return Ok((root, old));
                }
                match self.bt.single_entry(store, sub)? {
                    Some((frag, fval)) if !self.is_subtree(fval) => {
                        // degenerate sub-tree, demote back to an
                        // inline suffix at this level.
                        let (root, _) = self.bt.remove(store, root, &ekey)?;
                        let mut inline = ekey;
                        inline.extend_from_slice(&frag);
                        let (root, _) = self.bt.insert(store, root, &inline, fval)?;
                        Ok((root, old))
                    }
                    _ => {
                        let (root, _) = self.bt.insert(store, root, &ekey, self.mark(sub))?;
                        Ok((root, old))
                    }
                }
            }
            Some((ekey, eval)) if !self.is_subtree(eval) && self.equals(&ekey, suffix) => {
                self.bt.remove(store, root, &ekey)
            }
            _ => Ok((root, None)),
        }
    }

    /// Iterate keys in comparator order starting from `from`. The
    /// cursor owns its snapshot; the caller bounds the high end.
    pub fn iter(&self, store: &Store, root: u64, from: Bound<&[u8]>) -> Result<Iter> {
        let mut stack = vec![];
        let mut root = root;
        let mut depth = 0;
        let mut prefix: Vec<u8> = vec![];

        let key = match from {
            Bound::Unbounded => {
                let cursor = self.bt.seek_ge(store, root, Bound::Unbounded)?;
                stack.push(Level { cursor, prefix });
                return Ok(Iter { stack });
            }
            Bound::Included(key) | Bound::Excluded(key) => key,
        };

        loop {
            let suffix = self.suffix_at(key, depth);
            if suffix.len() < self.chunksize {
                let bound = match from {
                    Bound::Excluded(_) => Bound::Excluded(suffix),
                    _ => Bound::Included(suffix),
                };
                let cursor = self.bt.seek_ge(store, root, bound)?;
                stack.push(Level { cursor, prefix });
                break;
            }

            let chunk = &suffix[..self.chunksize];
            let mut cursor = self.bt.seek_ge(store, root, Bound::Included(chunk))?;
            match cursor.next(&self.bt, store)? {
                Some((ekey, eval)) if self.is_subtree(eval) && self.equals(&ekey, chunk) => {
                    // the bound continues inside this sub-tree; the
                    // parent cursor already moved past its entry.
                    stack.push(Level { cursor, prefix: prefix.clone() });
                    prefix.extend_from_slice(&ekey);
                    root = self.subroot(eval);
                    depth += 1;
                }
                _ => {
                    // no sub-tree on the bound's chunk: every entry at
                    // or after the full suffix qualifies.
                    let bound = match from {
                        Bound::Excluded(_) => Bound::Excluded(suffix),
                        _ => Bound::Included(suffix),
                    };
                    let cursor = self.bt.seek_ge(store, root, bound)?;
                    stack.push(Level { cursor, prefix });
                    break;
                }
            }
        }
        Ok(Iter { stack })
    }
}

struct Level {
    cursor: Cursor,
    prefix: Vec<u8>, // chunks accumulated above this level
}

/// Cursor over an [Hbtrie] snapshot, yielding `(key, offset)` in
/// comparator order.
pub struct Iter {
    stack: Vec<Level>,
}

impl Iter {
    pub fn next(&mut self, trie: &Hbtrie, store: &Store) -> Result<Option<(Vec<u8>, u64)>> {
        loop {
            let item = match self.stack.last_mut() {
                None => return Ok(None),
                Some(level) => match level.cursor.next(&trie.bt, store)? {
                    Some((frag, value)) => Some((frag, value, level.prefix.clone())),
                    None => None,
                },
            };
            match item {
                Some((frag, value, mut prefix)) if trie.is_subtree(value) => {
                    prefix.extend_from_slice(&frag);
                    let cursor =
                        trie.bt.seek_ge(store, trie.subroot(value), Bound::Unbounded)?;
                    self.stack.push(Level { cursor, prefix });
                }
                Some((frag, value, mut key)) => {
                    key.extend_from_slice(&frag);
                    return Ok(Some((key, value)));
                }
                None => {
                    self.stack.pop();
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "trie_test.rs"]
mod trie_test;
