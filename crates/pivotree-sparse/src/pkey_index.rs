//! Leaf-level indexes: which source keys a leaf represents, and which leaves
//! sit beneath each ancestor.

use ahash::AHashMap;
use indexmap::IndexSet;
use pivotree_table::Scalar;
use roaring::RoaringBitmap;

use crate::NodeIdx;

/// `leaf -> {primary keys}`, each set kept in insertion order so the most
/// recently attributed key is always last.
#[derive(Debug, Default)]
pub struct PkeyIndex {
    by_leaf: AHashMap<NodeIdx, IndexSet<Scalar>>,
}

impl PkeyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of `(leaf, pkey)` entries.
    pub fn len(&self) -> usize {
        self.by_leaf.values().map(IndexSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_leaf.is_empty()
    }

    /// Returns false if the pair was already present.
    pub fn insert(&mut self, leaf: NodeIdx, pkey: Scalar) -> bool {
        self.by_leaf.entry(leaf).or_default().insert(pkey)
    }

    /// Remove one pair; absent pairs are ignored.
    pub fn remove(&mut self, leaf: NodeIdx, pkey: &Scalar) -> bool {
        let Some(keys) = self.by_leaf.get_mut(&leaf) else {
            return false;
        };
        // Shift, not swap: the surviving keys keep their arrival order.
        let removed = keys.shift_remove(pkey);
        if keys.is_empty() {
            self.by_leaf.remove(&leaf);
        }
        removed
    }

    pub fn contains(&self, leaf: NodeIdx, pkey: &Scalar) -> bool {
        self.by_leaf
            .get(&leaf)
            .is_some_and(|keys| keys.contains(pkey))
    }

    /// Keys of one leaf, oldest first.
    pub fn keys(&self, leaf: NodeIdx) -> impl Iterator<Item = &Scalar> + '_ {
        self.by_leaf.get(&leaf).into_iter().flatten()
    }

    /// Most recently attributed key of a leaf.
    pub fn last_key(&self, leaf: NodeIdx) -> Option<&Scalar> {
        self.by_leaf.get(&leaf)?.last()
    }

    pub fn remove_leaf(&mut self, leaf: NodeIdx) {
        self.by_leaf.remove(&leaf);
    }

    pub fn clear(&mut self) {
        self.by_leaf.clear();
    }
}

/// `ancestor -> {leaves beneath it}`.
#[derive(Debug, Default)]
pub struct LeafIndex {
    by_ancestor: AHashMap<NodeIdx, RoaringBitmap>,
}

impl LeafIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of `(ancestor, leaf)` entries.
    pub fn len(&self) -> usize {
        self.by_ancestor.values().map(|bm| bm.len() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ancestor.is_empty()
    }

    pub fn insert(&mut self, ancestor: NodeIdx, leaf: NodeIdx) -> bool {
        self.by_ancestor.entry(ancestor).or_default().insert(leaf)
    }

    pub fn remove(&mut self, ancestor: NodeIdx, leaf: NodeIdx) -> bool {
        let Some(leaves) = self.by_ancestor.get_mut(&ancestor) else {
            return false;
        };
        let removed = leaves.remove(leaf);
        if leaves.is_empty() {
            self.by_ancestor.remove(&ancestor);
        }
        removed
    }

    pub fn leaves(&self, ancestor: NodeIdx) -> Option<&RoaringBitmap> {
        self.by_ancestor.get(&ancestor)
    }

    /// Highest-numbered (most recently created) leaf under `ancestor`.
    pub fn last_leaf(&self, ancestor: NodeIdx) -> Option<NodeIdx> {
        self.by_ancestor.get(&ancestor)?.max()
    }

    /// Drop every entry keyed by `ancestor`.
    pub fn remove_ancestor(&mut self, ancestor: NodeIdx) {
        self.by_ancestor.remove(&ancestor);
    }

    pub fn clear(&mut self) {
        self.by_ancestor.clear();
    }
}
