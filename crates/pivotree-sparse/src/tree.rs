//! `SparseTree`: the persistent pivot tree and its query surface.
//!
//! The batch stages live in their own modules (`unify`, `agg_update`,
//! `prune`, `traverse`) as further `impl SparseTree` blocks.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use pivotree_table::{DataTable, Scalar, Schema, SymbolTable};
use tracing::{debug, warn};

use crate::agg_table::AggTable;
use crate::aggspec::{AggKind, AggSpec};
use crate::config::TreeConfig;
use crate::dense::DenseContext;
use crate::error::{Result, TreeError};
use crate::node_store::{NodeStore, TreeNode};
use crate::pkey_index::{LeafIndex, PkeyIndex};
use crate::strand::{DeltaTables, StrandLayout, StrandTables};
use crate::unify::UnifyRecord;
use crate::{NodeIdx, ROOT_IDX, ROOT_PARENT};

/// One aggregate cell that changed during a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Delta {
    pub node: NodeIdx,
    /// Aggregate column position.
    pub column: usize,
    pub old: Scalar,
    pub new: Scalar,
}

/// Optional behaviors toggled per tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    /// Record every changed aggregate cell in the delta log.
    Delta,
    Alert,
}

#[derive(Debug, Clone, Copy, Default)]
struct Features {
    delta: bool,
    alert: bool,
}

#[derive(Debug)]
pub struct SparseTree {
    pivots: Vec<String>,
    aggspecs: Vec<AggSpec>,
    /// Schema of the flattened source rows.
    schema: Schema,
    grand_label: String,
    pub(crate) nodes: NodeStore,
    pub(crate) pkeys: PkeyIndex,
    pub(crate) leaves: LeafIndex,
    pub(crate) aggregates: AggTable,
    pub(crate) symbols: SymbolTable,
    next_idx: NodeIdx,
    pub(crate) new_ids: BTreeSet<NodeIdx>,
    pub(crate) new_leaves: BTreeSet<NodeIdx>,
    pub(crate) unification_records: Vec<UnifyRecord>,
    pub(crate) deltas: Vec<Delta>,
    pub(crate) has_delta: bool,
    features: Features,
}

impl SparseTree {
    /// Empty tree (root only) grouping `schema`'s rows by the config's row
    /// pivots.
    ///
    /// Every aggregate spec is validated up front; an unsupported one is a
    /// configuration error.
    pub fn new(config: &TreeConfig, aggspecs: Vec<AggSpec>, schema: &Schema) -> Result<Self> {
        for pivot in &config.row_pivots {
            if !schema.contains(pivot) {
                return Err(TreeError::MissingColumn(pivot.clone()));
            }
        }
        for spec in &aggspecs {
            spec.validate(schema, aggspecs.len())?;
        }
        let aggregates = AggTable::for_specs(&aggspecs, schema)?;

        let mut tree = Self {
            pivots: config.row_pivots.clone(),
            aggspecs,
            schema: schema.clone(),
            grand_label: config.grand_agg_label().to_string(),
            nodes: NodeStore::new(),
            pkeys: PkeyIndex::new(),
            leaves: LeafIndex::new(),
            aggregates,
            symbols: SymbolTable::new(),
            next_idx: ROOT_IDX + 1,
            new_ids: BTreeSet::new(),
            new_leaves: BTreeSet::new(),
            unification_records: Vec::new(),
            deltas: Vec::new(),
            has_delta: false,
            features: Features::default(),
        };
        tree.insert_root()?;

        debug!(
            pivots = tree.pivots.len(),
            aggregates = tree.aggspecs.len(),
            "created sparse tree"
        );
        Ok(tree)
    }

    fn insert_root(&mut self) -> Result<()> {
        let label = self.symbols.intern_str(&self.grand_label);
        self.nodes.insert(TreeNode::new(
            ROOT_IDX,
            ROOT_PARENT,
            label.clone(),
            0,
            label,
            1,
            0,
        ))
    }

    /// Reset to a fresh root, dropping every node, key and aggregate.
    pub fn clear(&mut self) -> Result<()> {
        self.nodes.clear();
        self.pkeys.clear();
        self.leaves.clear();
        self.aggregates.reset();
        self.next_idx = ROOT_IDX + 1;
        self.new_ids.clear();
        self.new_leaves.clear();
        self.unification_records.clear();
        self.clear_deltas();
        self.insert_root()
    }

    pub(crate) fn genidx(&mut self) -> NodeIdx {
        let idx = self.next_idx;
        self.next_idx += 1;
        idx
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    pub fn pivots(&self) -> &[String] {
        &self.pivots
    }

    pub fn aggspecs(&self) -> &[AggSpec] {
        &self.aggspecs
    }

    pub fn num_aggcols(&self) -> usize {
        self.aggspecs.len()
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Depth of leaf nodes.
    pub fn last_level(&self) -> u32 {
        self.pivots.len() as u32
    }

    // ========================================================================
    // Batch construction
    // ========================================================================

    pub fn strand_layout(&self, source: &Schema, config: &TreeConfig) -> Result<StrandLayout> {
        StrandLayout::new(source, &self.pivots, &self.aggspecs, config)
    }

    /// Strands of a batch with no prior state to compare against.
    pub fn build_strand_table(
        &self,
        flattened: &DataTable,
        config: &TreeConfig,
    ) -> Result<StrandTables> {
        self.strand_layout(flattened.schema(), config)?
            .build(flattened, config)
    }

    /// Strands of a batch given its before/after snapshots.
    pub fn build_strand_table_with_deltas(
        &self,
        flattened: &DataTable,
        deltas: &DeltaTables<'_>,
        config: &TreeConfig,
    ) -> Result<StrandTables> {
        self.strand_layout(flattened.schema(), config)?
            .build_with_deltas(flattened, deltas, config)
    }

    /// Group a strand table into this tree's batch-local shape.
    pub fn dense_context(
        &self,
        strands: &StrandTables,
        config: &TreeConfig,
    ) -> Result<DenseContext> {
        DenseContext::build(
            strands,
            &self.pivots,
            config,
            &self.aggspecs,
            self.aggregates.schema(),
        )
    }

    // ========================================================================
    // Node accessors
    // ========================================================================

    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, idx: NodeIdx) -> Result<&TreeNode> {
        self.nodes.node(idx)
    }

    pub fn node_exists(&self, idx: NodeIdx) -> bool {
        self.nodes.contains(idx)
    }

    pub fn nodes(&self) -> &NodeStore {
        &self.nodes
    }

    pub fn value(&self, idx: NodeIdx) -> Result<&Scalar> {
        Ok(&self.node(idx)?.value)
    }

    pub fn sort_value(&self, idx: NodeIdx) -> Result<&Scalar> {
        Ok(&self.node(idx)?.sort_value)
    }

    pub fn parent(&self, idx: NodeIdx) -> Result<NodeIdx> {
        Ok(self.node(idx)?.parent)
    }

    pub fn depth(&self, idx: NodeIdx) -> Result<u32> {
        Ok(self.node(idx)?.depth)
    }

    pub fn agg_row(&self, idx: NodeIdx) -> Result<u32> {
        Ok(self.node(idx)?.agg_row)
    }

    pub fn is_leaf(&self, idx: NodeIdx) -> Result<bool> {
        Ok(self.node(idx)?.depth == self.last_level())
    }

    /// Nodes created by the last unification.
    pub fn new_ids(&self) -> &BTreeSet<NodeIdx> {
        &self.new_ids
    }

    /// Leaves created by the last unification.
    pub fn new_leaves(&self) -> &BTreeSet<NodeIdx> {
        &self.new_leaves
    }

    pub fn unification_records(&self) -> &[UnifyRecord] {
        &self.unification_records
    }

    // ========================================================================
    // Leaves and keys
    // ========================================================================

    /// Leaves beneath `idx`; a leaf is its own only leaf.
    pub fn leaves(&self, idx: NodeIdx) -> Result<Vec<NodeIdx>> {
        if self.is_leaf(idx)? {
            return Ok(vec![idx]);
        }
        Ok(self
            .leaves
            .leaves(idx)
            .map(|bm| bm.iter().collect())
            .unwrap_or_default())
    }

    /// Primary keys of every source row beneath `idx`.
    pub fn pkeys(&self, idx: NodeIdx) -> Result<Vec<Scalar>> {
        Ok(self
            .leaves(idx)?
            .into_iter()
            .flat_map(|leaf| self.pkeys.keys(leaf).cloned())
            .collect())
    }

    pub fn pkey_index(&self) -> &PkeyIndex {
        &self.pkeys
    }

    pub fn leaf_index(&self) -> &LeafIndex {
        &self.leaves
    }

    // ========================================================================
    // Aggregates
    // ========================================================================

    pub fn aggtable(&self) -> &DataTable {
        self.aggregates.table()
    }

    pub fn agg_storage(&self) -> &AggTable {
        &self.aggregates
    }

    /// Display value of aggregate `column` at `idx`.
    ///
    /// Percent-of-parent and percent-of-grand-total are expressed against the
    /// parent's / root's value; means read as numerator over denominator.
    pub fn aggregate(&self, idx: NodeIdx, column: usize) -> Result<Scalar> {
        let spec = self
            .aggspecs
            .get(column)
            .ok_or(pivotree_table::TableError::ColumnIndexOutOfRange(column))?;
        let col = self.aggtable().column(&spec.name)?;
        let node = self.node(idx)?;
        let value = col.get_scalar(node.agg_row as usize);

        let percent_of = |base: Scalar| -> Scalar {
            if value.is_none() {
                return Scalar::None;
            }
            Scalar::Float(value.to_f64() / base.to_f64() * 100.0)
        };

        Ok(match spec.kind {
            AggKind::PctSumParent => {
                if node.parent == ROOT_PARENT {
                    if value.is_none() {
                        Scalar::None
                    } else {
                        Scalar::Float(100.0)
                    }
                } else {
                    let parent_row = self.agg_row(node.parent)?;
                    percent_of(col.get_scalar(parent_row as usize))
                }
            }
            AggKind::PctSumGrandTotal => {
                let root_row = self.agg_row(ROOT_IDX)?;
                percent_of(col.get_scalar(root_row as usize))
            }
            _ => value,
        })
    }

    /// `aggregate` by column name.
    pub fn aggregate_by_name(&self, idx: NodeIdx, name: &str) -> Result<Scalar> {
        let column = self
            .aggspecs
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| TreeError::MissingColumn(name.to_string()))?;
        self.aggregate(idx, column)
    }

    /// Raw aggregate values used to order siblings. `None` selects the node's
    /// sort value; unknown columns read as `None`.
    pub fn aggregates_for_sorting(
        &self,
        idx: NodeIdx,
        columns: &[Option<usize>],
    ) -> Result<Vec<Scalar>> {
        let node = self.node(idx)?;
        let table = self.aggtable();
        Ok(columns
            .iter()
            .map(|column| match column {
                None => node.sort_value.clone(),
                Some(c) => match self.aggspecs.get(*c) {
                    Some(spec) => table
                        .get_scalar(&spec.name, node.agg_row as usize)
                        .unwrap_or_default(),
                    None => {
                        warn!(column = c, "sorting by unknown aggregate column");
                        Scalar::None
                    }
                },
            })
            .collect())
    }

    // ========================================================================
    // Deltas and features
    // ========================================================================

    pub fn deltas(&self) -> &[Delta] {
        &self.deltas
    }

    /// Drain the delta log. The pending flag stays set until `clear_deltas`.
    pub fn take_deltas(&mut self) -> Vec<Delta> {
        std::mem::take(&mut self.deltas)
    }

    pub fn clear_deltas(&mut self) {
        self.deltas.clear();
        self.has_delta = false;
    }

    pub fn has_deltas(&self) -> bool {
        self.has_delta
    }

    pub fn set_has_deltas(&mut self, has_delta: bool) {
        self.has_delta = has_delta;
    }

    pub fn set_feature_state(&mut self, feature: Feature, enabled: bool) {
        match feature {
            Feature::Delta => self.features.delta = enabled,
            Feature::Alert => self.features.alert = enabled,
        }
    }

    pub fn feature_enabled(&self, feature: Feature) -> bool {
        match feature {
            Feature::Delta => self.features.delta,
            Feature::Alert => self.features.alert,
        }
    }

    pub fn set_deltas_enabled(&mut self, enabled: bool) {
        self.set_feature_state(Feature::Delta, enabled);
    }

    pub fn set_alerts_enabled(&mut self, enabled: bool) {
        self.set_feature_state(Feature::Alert, enabled);
    }

    // ========================================================================
    // Debug output
    // ========================================================================

    pub fn repr(&self) -> String {
        format!(
            "SparseTree<pivots={:?}, nodes={}, aggregates={}>",
            self.pivots,
            self.size(),
            self.aggspecs.len()
        )
    }

    /// Indented depth-first dump: id, path and aggregates per node.
    pub fn pretty(&self) -> Result<String> {
        let mut out = String::new();
        for idx in self.dfs() {
            let path = self.path(idx)?;
            let indent = "  ".repeat(path.len());
            let path: Vec<String> = path.iter().map(ToString::to_string).collect();
            write!(out, "{indent}{idx} <{}>", path.join(", "))?;
            for column in 0..self.num_aggcols() {
                write!(out, " {},", self.aggregate(idx, column)?)?;
            }
            out.push('\n');
        }
        Ok(out)
    }
}
