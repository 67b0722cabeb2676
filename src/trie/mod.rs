//! Module implement the HB+-trie, the primary-key index.
//!
//! An HB+-trie is a tree of B+-trees sharded by fixed-width key
//! chunks. The inner B+-tree at depth `d` indexes key fragments
//! remaining after `d` chunks: an entry is either a *terminal*,
//! mapping the whole remaining suffix to a document offset, or a
//! *sub-tree pointer*, mapping exactly one chunk to the root of the
//! next-depth B+-tree (tagged by the top bit of the value). A suffix
//! stays inline until another key shows up sharing its first chunk,
//! at which point both are pushed down into a fresh sub-tree; the
//! reverse demotion happens when removals leave a sub-tree with one
//! terminal. Arbitrary-length keys therefore cost only as many tree
//! levels as they have colliding chunk prefixes.
//!
//! A custom comparator, when set, orders fragments at every inner
//! B+-tree and its equivalence decides chunk sharing, so sub-trees
//! group comparator-equal chunk prefixes.

mod trie;

pub use trie::{Hbtrie, Iter};
