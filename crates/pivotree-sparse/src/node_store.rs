//! Multi-indexed node storage.
//!
//! One owning arena keyed by node id plus three auxiliary indexes:
//!
//! - `parent -> {children}` (roaring bitmap, ascending id order)
//! - `(parent, value) -> child` (group identity, resolve-or-create)
//! - `nstrands -> {nodes}` (locate zero-strand nodes for pruning)
//!
//! Every mutation goes through `insert` / `update` / `erase`, which keep the
//! arena and all indexes in step.

use std::collections::BTreeMap;

use ahash::AHashMap;
use pivotree_table::Scalar;
use roaring::RoaringBitmap;

use crate::error::{Result, TreeError};
use crate::NodeIdx;

/// One node of the persistent tree.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    pub idx: NodeIdx,
    /// `ROOT_PARENT` for the root.
    pub parent: NodeIdx,
    /// Group key at this level (interned).
    pub value: Scalar,
    pub depth: u32,
    /// Ordering key, independent of `value` (interned).
    pub sort_value: Scalar,
    /// Signed liveness count; 0 marks the node for pruning.
    pub nstrands: i64,
    /// Row of the aggregate table holding this node's values.
    pub agg_row: u32,
}

impl TreeNode {
    pub fn new(
        idx: NodeIdx,
        parent: NodeIdx,
        value: Scalar,
        depth: u32,
        sort_value: Scalar,
        nstrands: i64,
        agg_row: u32,
    ) -> Self {
        Self {
            idx,
            parent,
            value,
            depth,
            sort_value,
            nstrands,
            agg_row,
        }
    }
}

#[derive(Debug, Default)]
pub struct NodeStore {
    /// Arena: node id -> node.
    nodes: Vec<Option<TreeNode>>,
    len: usize,
    /// Children index: parent id -> child ids.
    by_parent: AHashMap<NodeIdx, RoaringBitmap>,
    /// Identity index: (parent id, value) -> child id.
    by_parent_value: AHashMap<(NodeIdx, Scalar), NodeIdx>,
    /// Liveness index: strand count -> node ids.
    by_nstrands: BTreeMap<i64, RoaringBitmap>,
}

impl NodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, idx: NodeIdx) -> Option<&TreeNode> {
        self.nodes.get(idx as usize)?.as_ref()
    }

    /// Like `get`, but a missing node is a structural error.
    pub fn node(&self, idx: NodeIdx) -> Result<&TreeNode> {
        self.get(idx).ok_or(TreeError::NodeNotFound(idx))
    }

    pub fn contains(&self, idx: NodeIdx) -> bool {
        self.get(idx).is_some()
    }

    /// Resolve a child by its group value.
    pub fn find_child(&self, parent: NodeIdx, value: &Scalar) -> Option<NodeIdx> {
        self.by_parent_value.get(&(parent, value.clone())).copied()
    }

    /// Children of `parent` in ascending id order.
    pub fn children(&self, parent: NodeIdx) -> impl Iterator<Item = NodeIdx> + '_ {
        self.by_parent
            .get(&parent)
            .into_iter()
            .flat_map(|bm| bm.iter())
    }

    /// Children bitmap, if `parent` has any.
    pub fn children_bitmap(&self, parent: NodeIdx) -> Option<&RoaringBitmap> {
        self.by_parent.get(&parent)
    }

    pub fn num_children(&self, parent: NodeIdx) -> usize {
        self.by_parent
            .get(&parent)
            .map_or(0, |bm| bm.len() as usize)
    }

    /// Nodes whose strand count is exactly `nstrands`.
    pub fn with_nstrands(&self, nstrands: i64) -> RoaringBitmap {
        self.by_nstrands
            .get(&nstrands)
            .cloned()
            .unwrap_or_default()
    }

    /// All live nodes in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &TreeNode> {
        self.nodes.iter().flatten()
    }

    pub fn insert(&mut self, node: TreeNode) -> Result<()> {
        if self.contains(node.idx) {
            return Err(TreeError::DuplicateNode(node.idx));
        }
        let identity = (node.parent, node.value.clone());
        if self.by_parent_value.contains_key(&identity) {
            return Err(TreeError::DuplicateSibling {
                parent: node.parent,
                value: node.value.to_string(),
            });
        }

        self.by_parent_value.insert(identity, node.idx);
        self.by_parent
            .entry(node.parent)
            .or_default()
            .insert(node.idx);
        self.by_nstrands
            .entry(node.nstrands)
            .or_default()
            .insert(node.idx);

        let slot = node.idx as usize;
        if slot >= self.nodes.len() {
            self.nodes.resize(slot + 1, None);
        }
        self.nodes[slot] = Some(node);
        self.len += 1;
        Ok(())
    }

    /// Mutate a node in place. The node's id cannot change; every index is
    /// refreshed from the mutated copy.
    pub fn update(&mut self, idx: NodeIdx, f: impl FnOnce(&mut TreeNode)) -> Result<()> {
        let before = self.erase(idx)?;
        let mut after = before.clone();
        f(&mut after);
        after.idx = idx;

        if let Err(err) = self.insert(after) {
            self.insert(before)?;
            return Err(err);
        }
        Ok(())
    }

    pub fn set_nstrands(&mut self, idx: NodeIdx, nstrands: i64) -> Result<()> {
        if self.node(idx)?.nstrands == nstrands {
            return Ok(());
        }
        self.update(idx, |node| node.nstrands = nstrands)
    }

    pub fn set_sort_value(&mut self, idx: NodeIdx, sort_value: Scalar) -> Result<()> {
        self.update(idx, |node| node.sort_value = sort_value)
    }

    /// Remove a node from the arena and every index.
    pub fn erase(&mut self, idx: NodeIdx) -> Result<TreeNode> {
        let node = self
            .nodes
            .get_mut(idx as usize)
            .and_then(Option::take)
            .ok_or(TreeError::NodeNotFound(idx))?;
        self.len -= 1;

        self.by_parent_value
            .remove(&(node.parent, node.value.clone()));
        if let Some(children) = self.by_parent.get_mut(&node.parent) {
            children.remove(idx);
            if children.is_empty() {
                self.by_parent.remove(&node.parent);
            }
        }
        if let Some(bucket) = self.by_nstrands.get_mut(&node.nstrands) {
            bucket.remove(idx);
            if bucket.is_empty() {
                self.by_nstrands.remove(&node.nstrands);
            }
        }
        Ok(node)
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ROOT_PARENT;

    fn node(idx: NodeIdx, parent: NodeIdx, value: &str, depth: u32, nstrands: i64) -> TreeNode {
        TreeNode::new(
            idx,
            parent,
            Scalar::str(value),
            depth,
            Scalar::str(value),
            nstrands,
            idx,
        )
    }

    fn store() -> NodeStore {
        let mut store = NodeStore::new();
        store.insert(node(0, ROOT_PARENT, "total", 0, 3)).unwrap();
        store.insert(node(1, 0, "East", 1, 2)).unwrap();
        store.insert(node(2, 0, "West", 1, 1)).unwrap();
        store.insert(node(3, 1, "Apples", 2, 2)).unwrap();
        store
    }

    #[test]
    fn lookups_by_every_index() {
        let store = store();
        assert_eq!(store.len(), 4);
        assert_eq!(store.node(3).unwrap().depth, 2);
        assert_eq!(store.find_child(0, &Scalar::str("West")), Some(2));
        assert_eq!(store.find_child(1, &Scalar::str("West")), None);
        assert_eq!(store.children(0).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(store.num_children(2), 0);
        assert_eq!(store.with_nstrands(2).iter().collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn duplicate_inserts_are_rejected() {
        let mut store = store();
        assert_eq!(
            store.insert(node(1, 0, "North", 1, 1)),
            Err(TreeError::DuplicateNode(1))
        );
        assert!(matches!(
            store.insert(node(9, 0, "East", 1, 1)),
            Err(TreeError::DuplicateSibling { parent: 0, .. })
        ));
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn update_moves_node_between_strand_buckets() {
        let mut store = store();
        store.set_nstrands(2, 0).unwrap();
        assert_eq!(store.with_nstrands(0).iter().collect::<Vec<_>>(), vec![2]);
        assert!(!store.with_nstrands(1).contains(2));

        store.set_sort_value(2, Scalar::Int(7)).unwrap();
        let west = store.node(2).unwrap();
        assert_eq!(west.sort_value, Scalar::Int(7));
        assert_eq!(west.nstrands, 0);
    }

    #[test]
    fn failed_update_restores_node() {
        let mut store = store();
        let err = store
            .update(2, |n| n.value = Scalar::str("East"))
            .unwrap_err();
        assert!(matches!(err, TreeError::DuplicateSibling { .. }));
        assert_eq!(store.find_child(0, &Scalar::str("West")), Some(2));
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn erase_cleans_all_indexes() {
        let mut store = store();
        let erased = store.erase(3).unwrap();
        assert_eq!(erased.value, Scalar::str("Apples"));
        assert!(!store.contains(3));
        assert_eq!(store.find_child(1, &Scalar::str("Apples")), None);
        assert!(store.children_bitmap(1).is_none());
        assert_eq!(store.with_nstrands(2).iter().collect::<Vec<_>>(), vec![1]);
        assert_eq!(store.erase(3), Err(TreeError::NodeNotFound(3)));
    }
}
