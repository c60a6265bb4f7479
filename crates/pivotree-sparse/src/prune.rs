//! Removal of nodes whose strand count dropped to zero.

use std::collections::BTreeSet;

use roaring::RoaringBitmap;
use tracing::debug;

use crate::error::Result;
use crate::tree::SparseTree;
use crate::NodeIdx;

impl SparseTree {
    /// Nodes currently at strand count 0.
    pub fn zero_strands(&self) -> RoaringBitmap {
        self.nodes.with_nstrands(0)
    }

    /// Zero the strand count of every descendant of a zero node.
    pub fn mark_zero_desc(&mut self) -> Result<()> {
        let zeros = self.zero_strands();
        for zero in &zeros {
            for desc in self.descendants(zero)? {
                self.nodes.set_nstrands(desc, 0)?;
            }
        }
        Ok(())
    }

    /// Nodes created by the last unification that are not in `zeros`.
    pub fn non_zero_ids(&self, zeros: &RoaringBitmap) -> Vec<NodeIdx> {
        non_zero(&self.new_ids, zeros)
    }

    /// Leaves created by the last unification that are not in `zeros`.
    pub fn non_zero_leaves(&self, zeros: &RoaringBitmap) -> Vec<NodeIdx> {
        non_zero(&self.new_leaves, zeros)
    }

    /// Register each leaf under all of its ancestors, root included.
    pub fn populate_leaf_index(&mut self, leaves: &[NodeIdx]) -> Result<()> {
        for &leaf in leaves {
            let mut ancestry = self.ancestry(leaf)?;
            ancestry.pop();
            for ancestor in ancestry {
                self.leaves.insert(ancestor, leaf);
            }
        }
        Ok(())
    }

    /// Invalidate the aggregate rows of `nodes`.
    pub fn clear_aggregates(&mut self, nodes: &[NodeIdx]) -> Result<()> {
        for &idx in nodes {
            let row = self.agg_row(idx)?;
            self.aggregates.table_mut().invalidate_row(row as usize)?;
        }
        Ok(())
    }

    /// Erase every zero-strand node.
    ///
    /// Leaf closure entries and pkeys go first while the ancestry is still
    /// walkable; aggregate rows return to the free list.
    pub fn drop_zero_strands(&mut self) -> Result<()> {
        let zeros = self.zero_strands();
        if zeros.is_empty() {
            return Ok(());
        }

        let mut rows = Vec::with_capacity(zeros.len() as usize);
        for zero in &zeros {
            if self.is_leaf(zero)? {
                let mut ancestry = self.ancestry(zero)?;
                ancestry.pop();
                for ancestor in ancestry {
                    self.leaves.remove(ancestor, zero);
                }
                self.pkeys.remove_leaf(zero);
            } else {
                self.leaves.remove_ancestor(zero);
            }
            rows.push(self.agg_row(zero)?);
        }
        self.aggregates.reclaim(&rows)?;

        for zero in &zeros {
            self.nodes.erase(zero)?;
        }
        debug!(dropped = zeros.len(), nodes = self.size(), "dropped zero-strand nodes");
        Ok(())
    }
}

fn non_zero(ids: &BTreeSet<NodeIdx>, zeros: &RoaringBitmap) -> Vec<NodeIdx> {
    ids.iter().copied().filter(|id| !zeros.contains(*id)).collect()
}
