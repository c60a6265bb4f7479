//! Read-only navigation over the tree.

use std::collections::VecDeque;

use pivotree_table::Scalar;

use crate::error::Result;
use crate::node_store::TreeNode;
use crate::tree::SparseTree;
use crate::{NodeIdx, ROOT_IDX, ROOT_PARENT};

/// Depth-first preorder walk; siblings in ascending id order.
pub struct Dfs<'a> {
    tree: &'a SparseTree,
    stack: Vec<NodeIdx>,
}

impl Iterator for Dfs<'_> {
    type Item = NodeIdx;

    fn next(&mut self) -> Option<NodeIdx> {
        let idx = self.stack.pop()?;
        let start = self.stack.len();
        self.stack.extend(self.tree.nodes.children(idx));
        self.stack[start..].reverse();
        Some(idx)
    }
}

/// Breadth-first walk; siblings in ascending id order.
pub struct Bfs<'a> {
    tree: &'a SparseTree,
    queue: VecDeque<NodeIdx>,
}

impl Iterator for Bfs<'_> {
    type Item = NodeIdx;

    fn next(&mut self) -> Option<NodeIdx> {
        let idx = self.queue.pop_front()?;
        self.queue.extend(self.tree.nodes.children(idx));
        Some(idx)
    }
}

impl SparseTree {
    pub fn dfs(&self) -> Dfs<'_> {
        self.dfs_from(ROOT_IDX)
    }

    /// Depth-first walk of the subtree at `idx`; empty if it doesn't exist.
    pub fn dfs_from(&self, idx: NodeIdx) -> Dfs<'_> {
        let stack = if self.node_exists(idx) { vec![idx] } else { vec![] };
        Dfs { tree: self, stack }
    }

    pub fn bfs(&self) -> Bfs<'_> {
        self.bfs_from(ROOT_IDX)
    }

    pub fn bfs_from(&self, idx: NodeIdx) -> Bfs<'_> {
        let queue = if self.node_exists(idx) {
            VecDeque::from([idx])
        } else {
            VecDeque::new()
        };
        Bfs { tree: self, queue }
    }

    /// Ids from the root down to `idx`, both included.
    pub fn ancestry(&self, idx: NodeIdx) -> Result<Vec<NodeIdx>> {
        let mut out = Vec::new();
        let mut cur = idx;
        while cur != ROOT_PARENT {
            out.push(cur);
            cur = self.parent(cur)?;
        }
        out.reverse();
        Ok(out)
    }

    /// Group values from the top level down to `idx`; the root's label is
    /// not part of any path.
    pub fn path(&self, idx: NodeIdx) -> Result<Vec<Scalar>> {
        self.path_by(idx, |n| &n.value)
    }

    /// Like `path`, with sort values.
    pub fn sortby_path(&self, idx: NodeIdx) -> Result<Vec<Scalar>> {
        self.path_by(idx, |n| &n.sort_value)
    }

    fn path_by(&self, idx: NodeIdx, field: impl Fn(&TreeNode) -> &Scalar) -> Result<Vec<Scalar>> {
        let mut out = Vec::new();
        for id in self.ancestry(idx)?.into_iter().skip(1) {
            out.push(field(self.node(id)?).clone());
        }
        Ok(out)
    }

    /// Position of `idx` among its siblings (ascending id order).
    pub fn sibling_idx(&self, idx: NodeIdx) -> Result<usize> {
        let parent = self.parent(idx)?;
        Ok(self
            .nodes
            .children_bitmap(parent)
            .map_or(0, |bm| bm.rank(idx) as usize - 1))
    }

    pub fn children(&self, idx: NodeIdx) -> Vec<NodeIdx> {
        self.nodes.children(idx).collect()
    }

    pub fn child_nodes(&self, idx: NodeIdx) -> Result<Vec<TreeNode>> {
        self.nodes
            .children(idx)
            .map(|c| self.node(c).cloned())
            .collect()
    }

    /// Children paired with their depth.
    pub fn child_idx_depth(&self, idx: NodeIdx) -> Result<Vec<(NodeIdx, u32)>> {
        self.nodes
            .children(idx)
            .map(|c| Ok((c, self.depth(c)?)))
            .collect()
    }

    pub fn num_children(&self, idx: NodeIdx) -> usize {
        self.nodes.num_children(idx)
    }

    /// Every node strictly below `idx`, depth first.
    pub fn descendants(&self, idx: NodeIdx) -> Result<Vec<NodeIdx>> {
        self.node(idx)?;
        Ok(self.dfs_from(idx).skip(1).collect())
    }

    /// Nodes exactly `rel_depth` levels below `idx`; `idx` itself for 0.
    pub fn drd_indices(&self, idx: NodeIdx, rel_depth: u32) -> Result<Vec<NodeIdx>> {
        let target = self.depth(idx)? + rel_depth;
        let mut out = Vec::new();
        for id in self.dfs_from(idx) {
            if self.depth(id)? == target {
                out.push(id);
            }
        }
        Ok(out)
    }

    pub fn resolve_child(&self, parent: NodeIdx, value: &Scalar) -> Option<NodeIdx> {
        self.nodes.find_child(parent, value)
    }

    /// Follow `path` (top level first) down from `root`.
    pub fn resolve_path(&self, root: NodeIdx, path: &[Scalar]) -> Option<NodeIdx> {
        if !self.node_exists(root) {
            return None;
        }
        path.iter()
            .try_fold(root, |cur, value| self.resolve_child(cur, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_store::TreeNode;
    use crate::{AggSpec, TreeConfig};
    use pivotree_table::{DType, Schema};

    /// root
    /// ├── 1 "a"
    /// │   ├── 3 "x"
    /// │   └── 4 "y"
    /// └── 2 "b"
    ///     └── 5 "x"
    fn tree() -> SparseTree {
        let schema = Schema::from_columns([("p0", DType::Str), ("p1", DType::Str)]).unwrap();
        let mut tree = SparseTree::new(&TreeConfig::new(&["p0", "p1"]), Vec::<AggSpec>::new(), &schema)
            .unwrap();
        for (idx, parent, value, depth) in
            [(1, 0, "a", 1), (2, 0, "b", 1), (3, 1, "x", 2), (4, 1, "y", 2), (5, 2, "x", 2)]
        {
            let sort = Scalar::str(&value.to_uppercase());
            tree.nodes
                .insert(TreeNode::new(idx, parent, Scalar::str(value), depth, sort, 1, idx))
                .unwrap();
        }
        tree
    }

    #[test]
    fn walks_visit_every_node_once() {
        let tree = tree();
        assert_eq!(tree.dfs().collect::<Vec<_>>(), vec![0, 1, 3, 4, 2, 5]);
        assert_eq!(tree.bfs().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(tree.dfs_from(2).collect::<Vec<_>>(), vec![2, 5]);
        assert_eq!(tree.dfs_from(42).count(), 0);
    }

    #[test]
    fn ancestry_and_paths() {
        let tree = tree();
        assert_eq!(tree.ancestry(4).unwrap(), vec![0, 1, 4]);
        assert_eq!(tree.ancestry(ROOT_IDX).unwrap(), vec![0]);
        assert_eq!(tree.path(4).unwrap(), vec![Scalar::str("a"), Scalar::str("y")]);
        assert_eq!(tree.sortby_path(5).unwrap(), vec![Scalar::str("B"), Scalar::str("X")]);
        assert!(tree.path(ROOT_IDX).unwrap().is_empty());
    }

    #[test]
    fn siblings_children_and_depths() {
        let tree = tree();
        assert_eq!(tree.sibling_idx(3).unwrap(), 0);
        assert_eq!(tree.sibling_idx(4).unwrap(), 1);
        assert_eq!(tree.children(1), vec![3, 4]);
        assert_eq!(tree.num_children(2), 1);
        assert_eq!(tree.child_idx_depth(0).unwrap(), vec![(1, 1), (2, 1)]);
        assert_eq!(tree.child_nodes(2).unwrap()[0].value, Scalar::str("x"));
        assert_eq!(tree.descendants(1).unwrap(), vec![3, 4]);
        assert_eq!(tree.drd_indices(0, 2).unwrap(), vec![3, 4, 5]);
        assert_eq!(tree.drd_indices(2, 0).unwrap(), vec![2]);
    }

    #[test]
    fn paths_resolve_back_to_nodes() {
        let tree = tree();
        let path = [Scalar::str("b"), Scalar::str("x")];
        assert_eq!(tree.resolve_path(ROOT_IDX, &path), Some(5));
        assert_eq!(tree.resolve_path(ROOT_IDX, &tree.path(4).unwrap()), Some(4));
        assert_eq!(tree.resolve_path(1, &[Scalar::str("x")]), Some(3));
        assert_eq!(tree.resolve_path(ROOT_IDX, &[Scalar::str("c")]), None);
        assert_eq!(tree.resolve_child(ROOT_IDX, &Scalar::str("a")), Some(1));
    }
}
