//! Batch driver: one configured tree fed batch by batch.

use pivotree_table::{DataTable, Schema};
use tracing::{debug, info_span};

use crate::aggspec::AggSpec;
use crate::config::TreeConfig;
use crate::error::Result;
use crate::row_store::{BatchSnapshot, RowStore};
use crate::strand::StrandTables;
use crate::tree::SparseTree;

/// A `SparseTree` together with the configuration it was built from.
///
/// Each `notify*` call is one transaction: strand table, batch grouping,
/// unification, leaf index upkeep, pruning and aggregate update. The row
/// store must already reflect the batch.
#[derive(Debug)]
pub struct PivotContext {
    config: TreeConfig,
    tree: SparseTree,
    batches: u64,
}

impl PivotContext {
    pub fn new(config: TreeConfig, aggspecs: Vec<AggSpec>, schema: &Schema) -> Result<Self> {
        let tree = SparseTree::new(&config, aggspecs, schema)?;
        Ok(Self {
            config,
            tree,
            batches: 0,
        })
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    pub fn tree(&self) -> &SparseTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut SparseTree {
        &mut self.tree
    }

    /// Batches applied so far.
    pub fn batches(&self) -> u64 {
        self.batches
    }

    /// Apply a batch with no prior state to compare against.
    pub fn notify_initial(&mut self, flattened: &DataTable, rows: &impl RowStore) -> Result<()> {
        let strands = self.tree.build_strand_table(flattened, &self.config)?;
        self.apply(&strands, rows)
    }

    /// Apply a batch described by its before/after snapshots.
    pub fn notify(&mut self, snapshot: &BatchSnapshot, rows: &impl RowStore) -> Result<()> {
        let strands = self.tree.build_strand_table_with_deltas(
            &snapshot.flattened,
            &snapshot.deltas(),
            &self.config,
        )?;
        self.apply(&strands, rows)
    }

    fn apply(&mut self, strands: &StrandTables, rows: &impl RowStore) -> Result<()> {
        let span = info_span!("batch", n = self.batches);
        let _guard = span.enter();

        let ctx = self.tree.dense_context(strands, &self.config)?;
        self.tree.update_shape_from_static(&ctx)?;

        let zeros = self.tree.zero_strands();
        let leaves = self.tree.non_zero_leaves(&zeros);
        self.tree.populate_leaf_index(&leaves)?;
        self.tree.drop_zero_strands()?;

        self.tree.update_aggs_from_static(&ctx, rows)?;
        self.batches += 1;

        debug!(
            strands = strands.len(),
            nodes = self.tree.size(),
            deltas = self.tree.deltas().len(),
            "applied batch"
        );
        Ok(())
    }
}
