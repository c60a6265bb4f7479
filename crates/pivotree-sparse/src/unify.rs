//! Merging a batch grouping into the persistent tree.

use std::cmp::Ordering;

use indexmap::IndexMap;
use pivotree_table::Scalar;
use tracing::{debug, trace};

use crate::dense::BatchContext;
use crate::error::Result;
use crate::node_store::TreeNode;
use crate::tree::SparseTree;
use crate::{NodeIdx, ROOT_IDX};

/// Ties a persistent node to the batch-local aggregate row it pulls from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnifyRecord {
    pub node: NodeIdx,
    /// Row of the batch aggregate table.
    pub src_row: usize,
    /// Row of the persistent aggregate table.
    pub dst_row: u32,
    /// Strand count after the merge (unclamped at the root).
    pub nstrands: i64,
}

impl SparseTree {
    /// Merge `ctx` into the tree in depth-first order.
    ///
    /// Creates nodes for groups seen for the first time, moves strand counts
    /// of existing ones, attributes primary keys to leaves and finally zeroes
    /// every subtree whose root reached zero strands. The resulting
    /// unification records drive `update_aggs_from_static`.
    pub fn update_shape_from_static(&mut self, ctx: &impl BatchContext) -> Result<()> {
        self.new_ids.clear();
        self.new_leaves.clear();
        self.unification_records.clear();

        if ctx.is_empty() {
            return Ok(());
        }

        let last_level = ctx.last_level();
        let mut mapped: Vec<Option<NodeIdx>> = vec![None; ctx.len()];

        let root = self.node(ROOT_IDX)?.clone();
        let nstrands = root.nstrands + ctx.strand_count_sum(0);
        self.nodes.set_nstrands(ROOT_IDX, nstrands.max(1))?;
        self.unification_records.push(UnifyRecord {
            node: ROOT_IDX,
            src_row: 0,
            dst_row: root.agg_row,
            nstrands,
        });
        mapped[0] = Some(ROOT_IDX);
        if last_level == 0 {
            self.attribute_pkeys(ctx, 0, ROOT_IDX);
        }

        for bidx in 1..ctx.len() {
            let Some(parent) = mapped[ctx.parent(bidx)] else {
                continue;
            };
            let value = self.symbols.intern(ctx.value(bidx));
            let sort_value = self.symbols.intern(ctx.sort_value(bidx));
            let delta = ctx.strand_count_sum(bidx);
            let depth = ctx.depth(bidx);

            let (idx, record) = match self.nodes.find_child(parent, &value) {
                None if delta < 0 => {
                    trace!(batch_node = bidx, %value, "skipping removal of unknown group");
                    continue;
                }
                None => {
                    let idx = self.genidx();
                    let agg_row = self.aggregates.allocate();
                    trace!(node = idx, parent, depth, %value, agg_row, "creating node");
                    self.nodes.insert(TreeNode::new(
                        idx, parent, value, depth, sort_value, delta, agg_row,
                    ))?;
                    self.new_ids.insert(idx);
                    if depth == last_level {
                        self.new_leaves.insert(idx);
                    }
                    (idx, UnifyRecord {
                        node: idx,
                        src_row: bidx,
                        dst_row: agg_row,
                        nstrands: delta,
                    })
                }
                Some(idx) => {
                    let existing = self.node(idx)?;
                    let nstrands = existing.nstrands + delta;
                    let agg_row = existing.agg_row;
                    self.nodes.update(idx, |n| {
                        n.sort_value = sort_value;
                        n.nstrands = nstrands;
                    })?;
                    (idx, UnifyRecord {
                        node: idx,
                        src_row: bidx,
                        dst_row: agg_row,
                        nstrands,
                    })
                }
            };

            self.unification_records.push(record);
            mapped[bidx] = Some(idx);

            if depth == last_level {
                self.attribute_pkeys(ctx, bidx, idx);
            }
        }

        self.mark_zero_desc()?;

        debug!(
            groups = ctx.len(),
            records = self.unification_records.len(),
            created = self.new_ids.len(),
            nodes = self.size(),
            "unified batch"
        );
        Ok(())
    }

    /// Net the strand counts of each key in `leaf` and add keys that entered
    /// it or drop keys that left it, in batch order.
    ///
    /// A row can contribute both a `+1` and a `-1` to the same leaf (a sort-by
    /// change, or an insert and delete within one batch), so only the net
    /// count decides membership.
    fn attribute_pkeys(&mut self, ctx: &impl BatchContext, bidx: usize, leaf: NodeIdx) {
        let mut net: IndexMap<Scalar, i64> = IndexMap::new();
        for &row in ctx.member_rows(bidx) {
            let count = ctx.strand_count(row);
            if count != 0 {
                *net.entry(ctx.strand_pkey(row).clone()).or_default() += count;
            }
        }
        for (pkey, count) in net {
            let pkey = self.symbols.intern(&pkey);
            match count.cmp(&0) {
                Ordering::Greater => {
                    self.pkeys.insert(leaf, pkey);
                }
                Ordering::Less => {
                    self.pkeys.remove(leaf, &pkey);
                }
                Ordering::Equal => {}
            }
        }
    }
}
