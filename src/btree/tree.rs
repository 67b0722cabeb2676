use std::{cmp::Ordering, ops::Bound, result};

use crate::{
    block::{Block, Kind, Store, PAYLOAD_SIZE},
    btree::node::Node,
    CmpFn, Result, BLK_NOT_FOUND,
};

// Underflow threshold below which a node tries to merge with a
// sibling.
const MERGE_THRESHOLD: usize = PAYLOAD_SIZE / 4;

/// Stateless handle for B+-tree operations over a [Store]. The tree
/// itself is identified by its root block-id; every mutating call
/// returns the new root, leaving the old root intact for pinned
/// readers.
#[derive(Clone, Copy)]
pub struct Btree {
    vsize: usize,
    cmp: Option<CmpFn>,
}

// Outcome of rewriting a node: either a single replacement or a
// split pair, each as (first-key, bid).
enum Ins {
    One((Vec<u8>, u64)),
    Two((Vec<u8>, u64), (Vec<u8>, u64)),
}

impl Btree {
    pub fn new(vsize: usize) -> Btree {
        Btree { vsize, cmp: None }
    }

    pub fn with_cmp(vsize: usize, cmp: Option<CmpFn>) -> Btree {
        Btree { vsize, cmp }
    }

    #[inline]
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match self.cmp {
            Some(cmp) => cmp(a, b),
            None => a.cmp(b),
        }
    }

    /// Compare two keys under this tree's comparator.
    #[inline]
    pub fn key_cmp(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.compare(a, b)
    }

    #[inline]
    fn search(
        &self,
        entries: &[(Vec<u8>, u64)],
        key: &[u8],
    ) -> result::Result<usize, usize> {
        entries.binary_search_by(|(k, _)| self.compare(k, key))
    }

    pub fn read_node(&self, store: &Store, bid: u64) -> Result<Node> {
        let block = store.read_block(bid)?;
        Node::decode(block.as_payload(), self.vsize)
    }

    fn write_node(&self, store: &Store, node: &Node) -> Result<u64> {
        let bid = store.alloc();
        let mut block = Block::new(bid, Kind::Index);
        let payload = node.encode(self.vsize)?;
        block.as_mut_payload().copy_from_slice(&payload);
        store.write_block(block)?;
        Ok(bid)
    }

    /// Get the value for `key`, or None.
    pub fn find(&self, store: &Store, root: u64, key: &[u8]) -> Result<Option<u64>> {
        if root == BLK_NOT_FOUND {
            return Ok(None);
        }

        let mut bid = root;
        loop {
            let node = self.read_node(store, bid)?;
            if node.leaf {
                break Ok(match self.search(&node.entries, key) {
                    Ok(off) => Some(node.entries[off].1),
                    Err(_) => None,
                });
            }
            bid = match self.search(&node.entries, key) {
                Ok(off) => node.entries[off].1,
                Err(0) => break Ok(None),
                Err(off) => node.entries[off - 1].1,
            };
        }
    }

    /// Insert or overwrite `key`, returning the new root and the
    /// displaced value, if any.
    pub fn insert(
        &self,
        store: &Store,
        root: u64,
        key: &[u8],
        value: u64,
    ) -> Result<(u64, Option<u64>)> {
        if root == BLK_NOT_FOUND {
            let node = Node {
                leaf: true,
                entries: vec![(key.to_vec(), value)],
            };
            return Ok((self.write_node(store, &node)?, None));
        }

        let (ins, old) = self.do_insert(store, root, key, value)?;
        let root = match ins {
            Ins::One((_, bid)) => bid,
            Ins::Two(left, right) => {
                let node = Node {
                    leaf: false,
                    entries: vec![left, right],
                };
                self.write_node(store, &node)?
            }
        };
        Ok((root, old))
    }

    fn do_insert(
        &self,
        store: &Store,
        bid: u64,
        key: &[u8],
        value: u64,
    ) -> Result<(Ins, Option<u64>)> {
        let mut node = self.read_node(store, bid)?;

        let old = if node.leaf {
            match self.search(&node.entries, key) {
                Ok(off) => {
                    let old = node.entries[off].1;
                    node.entries[off].1 = value;
                    Some(old)
                }
                Err(off) => {
                    node.entries.insert(off, (key.to_vec(), value));
                    None
                }
            }
        } else {
            let off = match self.search(&node.entries, key) {
                Ok(off) => off,
                Err(0) => 0,
                Err(off) => off - 1,
            };
            let child = node.entries[off].1;
            let (ins, old) = self.do_insert(store, child, key, value)?;
            match ins {
                Ins::One(entry) => node.entries[off] = entry,
                Ins::Two(left, right) => {
                    node.entries[off] = left;
                    node.entries.insert(off + 1, right);
                }
            }
            old
        };

        Ok((self.rewrite(store, node)?, old))
    }

    // Copy-on-write a mutated node, splitting when it no longer fits.
    fn rewrite(&self, store: &Store, node: Node) -> Result<Ins> {
        if node.fits(self.vsize) {
            let first = node.entries[0].0.clone();
            let bid = self.write_node(store, &node)?;
            return Ok(Ins::One((first, bid)));
        }

        let off = self.split_point(&node);
        let right = Node {
            leaf: node.leaf,
            entries: node.entries[off..].to_vec(),
        };
        let left = Node {
            leaf: node.leaf,
            entries: node.entries[..off].to_vec(),
        };
        let lentry = (left.entries[0].0.clone(), self.write_node(store, &left)?);
        let rentry = (right.entries[0].0.clone(), self.write_node(store, &right)?);
        Ok(Ins::Two(lentry, rentry))
    }

    // Split index with both halves fitting their block, as close to
    // the byte midpoint as we can get.
    fn split_point(&self, node: &Node) -> usize {
        let sizes: Vec<usize> = node
            .entries
            .iter()
            .map(|(key, _)| Node::entry_size(key, self.vsize))
            .collect();
        let total: usize = sizes.iter().sum();
        let budget = PAYLOAD_SIZE - 3;

        let (mut best, mut best_gap, mut left) = (1, usize::MAX, 0);
        for off in 1..node.entries.len() {
            left += sizes[off - 1];
            let right = total - left;
            if left <= budget && right <= budget {
                let gap = if left * 2 > total { left * 2 - total } else { total - left * 2 };
                if gap < best_gap {
                    best_gap = gap;
                    best = off;
                }
            }
        }
        best
    }

    /// Remove `key`, returning the new root (`BLK_NOT_FOUND` when the
    /// tree empties) and the removed value. Removing a missing key
    /// leaves the tree untouched.
    pub fn remove(
        &self,
        store: &Store,
        root: u64,
        key: &[u8],
    ) -> Result<(u64, Option<u64>)> {
        if root == BLK_NOT_FOUND {
            return Ok((root, None));
        }

        let (res, old) = self.do_remove(store, root, key)?;
        let mut root = match res {
            Some((_, bid, _)) => bid,
            None => return Ok((BLK_NOT_FOUND, old)),
        };
        // collapse trivial branch chains into their only child.
        loop {
            let node = self.read_node(store, root)?;
            match (node.leaf, node.entries.len()) {
                (false, 1) => root = node.entries[0].1,
                _ => break Ok((root, old)),
            }
        }
    }

    // Returns None when the subtree emptied, otherwise the rewritten
    // child as (first-key, bid, encoded-size).
    #[allow(clippy::type_complexity)]
    fn do_remove(
        &self,
        store: &Store,
        bid: u64,
        key: &[u8],
    ) -> Result<(Option<(Vec<u8>, u64, usize)>, Option<u64>)> {
        let mut node = self.read_node(store, bid)?;

        if node.leaf {
            let old = match self.search(&node.entries, key) {
                Ok(off) => node.entries.remove(off).1,
                Err(_) => {
                    let first = node.entries[0].0.clone();
                    let size = node.size(self.vsize);
                    return Ok((Some((first, bid, size)), None));
                }
            };
            if node.entries.is_empty() {
                return Ok((None, Some(old)));
            }
            let first = node.entries[0].0.clone();
            let size = node.size(self.vsize);
            let nbid = self.write_node(store, &node)?;
            return Ok((Some((first, nbid, size)), Some(old)));
        }

        let off = match self.search(&node.entries, key) {
            Ok(off) => off,
            Err(0) => {
                let first = node.entries[0].0.clone();
                let size = node.size(self.vsize);
                return Ok((Some((first, bid, size)), None));
            }
            Err(off) => off - 1,
        };
        let child = node.entries[off].1;
        let (res, old) = self.do_remove(store, child, key)?;
        if old.is_none() {
            let first = node.entries[0].0.clone();
            let size = node.size(self.vsize);
            return Ok((Some((first, bid, size)), None));
        }

        match res {
            None => {
                node.entries.remove(off);
            }
            Some((first, cbid, csize)) => {
                node.entries[off] = (first, cbid);
                if csize < MERGE_THRESHOLD {
                    self.try_merge(store, &mut node, off)?;
                }
            }
        }
        if node.entries.is_empty() {
            return Ok((None, old));
        }
        let first = node.entries[0].0.clone();
        let size = node.size(self.vsize);
        let nbid = self.write_node(store, &node)?;
        Ok((Some((first, nbid, size)), old))
    }

    // Merge the child at `off` with a sibling when the combination
    // fits a single block.
    fn try_merge(&self, store: &Store, parent: &mut Node, off: usize) -> Result<()> {
        let sib = if off + 1 < parent.entries.len() {
            off + 1
        } else if off > 0 {
            off - 1
        } else {
            return Ok(());
        };
        let (loff, roff) = if sib > off { (off, sib) } else { (sib, off) };

        let lnode = self.read_node(store, parent.entries[loff].1)?;
        let rnode = self.read_node(store, parent.entries[roff].1)?;
        let mut merged = Node {
            leaf: lnode.leaf,
            entries: lnode.entries,
        };
        merged.entries.extend(rnode.entries);

        if merged.fits(self.vsize) {
            let first = merged.entries[0].0.clone();
            let bid = self.write_node(store, &merged)?;
            parent.entries[loff] = (first, bid);
            parent.entries.remove(roff);
        }
        Ok(())
    }

    /// When the tree holds exactly one entry, return it. Used by the
    /// HB+-trie to demote a degenerate sub-tree back to an inline
    /// suffix.
    pub fn single_entry(
        &self,
        store: &Store,
        root: u64,
    ) -> Result<Option<(Vec<u8>, u64)>> {
        if root == BLK_NOT_FOUND {
            return Ok(None);
        }
        let node = self.read_node(store, root)?;
        match (node.leaf, node.entries.len()) {
            (true, 1) => Ok(Some(node.entries[0].clone())),
            _ => Ok(None),
        }
    }

    /// Position a cursor at the first entry greater-or-equal (for
    /// `Included`), strictly-greater (for `Excluded`), or at the very
    /// first entry (for `Unbounded`).
    pub fn seek_ge(
        &self,
        store: &Store,
        root: u64,
        bound: Bound<&[u8]>,
    ) -> Result<Cursor> {
        let mut stack = vec![];
        if root == BLK_NOT_FOUND {
            return Ok(Cursor { stack });
        }

        let mut bid = root;
        loop {
            let node = self.read_node(store, bid)?;
            if node.leaf {
                let off = match bound {
                    Bound::Unbounded => 0,
                    Bound::Included(key) => match self.search(&node.entries, key) {
                        Ok(off) | Err(off) => off,
                    },
                    Bound::Excluded(key) => match self.search(&node.entries, key) {
                        Ok(off) => off + 1,
                        Err(off) => off,
                    },
                };
                stack.push((node, off));
                break;
            }
            let off = match bound {
                Bound::Unbounded => 0,
                Bound::Included(key) | Bound::Excluded(key) => {
                    match self.search(&node.entries, key) {
                        Ok(off) => off,
                        Err(0) => 0,
                        Err(off) => off - 1,
                    }
                }
            };
            bid = node.entries[off].1;
            stack.push((node, off));
        }
        Ok(Cursor { stack })
    }
}

/// Streaming cursor over a snapshot root. The path stack owns its
/// decoded nodes, so concurrent copy-on-write mutations do not move
/// the ground under an iteration.
pub struct Cursor {
    stack: Vec<(Node, usize)>,
}

impl Cursor {
    /// Next entry in key order, or None at exhaustion.
    pub fn next(&mut self, bt: &Btree, store: &Store) -> Result<Option<(Vec<u8>, u64)>> {
        loop {
            match self.stack.last_mut() {
                None => return Ok(None),
                Some((node, off)) => {
                    debug_assert!(node.leaf);
                    if *off < node.entries.len() {
                        let entry = node.entries[*off].clone();
                        *off += 1;
                        return Ok(Some(entry));
                    }
                }
            }
            self.stack.pop();
            self.advance(bt, store)?;
        }
    }

    // Leaf exhausted: move the deepest branch one child to the right
    // and descend to the leftmost leaf under it.
    fn advance(&mut self, bt: &Btree, store: &Store) -> Result<()> {
        loop {
            let child = match self.stack.last_mut() {
                None => return Ok(()),
                Some((node, off)) => {
                    *off += 1;
                    if *off < node.entries.len() {
                        Some(node.entries[*off].1)
                    } else {
                        None
                    }
                }
            };
            match child {
                Some(mut bid) => loop {
                    let node = bt.read_node(store, bid)?;
                    let down = if node.leaf { None } else { Some(node.entries[0].1) };
                    self.stack.push((node, 0));
                    match down {
                        Some(next) => bid = next,
                        None => return Ok(()),
                    }
                },
                None => {
                    self.stack.pop();
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "tree_test.rs"]
mod tree_test;
