//! Per-batch grouping.
//!
//! A `DenseContext` groups the strand rows of one batch by pivot path and
//! lays the groups out as a flat tree in depth-first preorder. Each group
//! gets a row of batch-local aggregates that the unifier and the update
//! engine pull from.

use std::collections::HashSet;
use std::ops::Range;

use pivotree_table::{DType, DataTable, Scalar, Schema};
use tracing::debug;

use crate::aggspec::{AggKind, AggSpec};
use crate::config::TreeConfig;
use crate::error::Result;
use crate::strand::{StrandTables, PSP_PKEY, PSP_STRAND_COUNT, PSP_STRAND_COUNT_SUM};

/// What the unifier consumes from a batch grouping.
///
/// Batch nodes are numbered in depth-first preorder with the root at 0, so
/// `0..len()` is a valid merge order.
pub trait BatchContext {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn parent(&self, node: usize) -> usize;
    fn depth(&self, node: usize) -> u32;
    fn value(&self, node: usize) -> &Scalar;
    fn sort_value(&self, node: usize) -> &Scalar;

    /// Depth of leaf groups (the number of pivots).
    fn last_level(&self) -> u32;

    /// Net strand delta of a group.
    fn strand_count_sum(&self, node: usize) -> i64;

    /// Strand rows folded into a group.
    fn member_rows(&self, node: usize) -> &[usize];

    fn strand_pkey(&self, row: usize) -> &Scalar;
    fn strand_count(&self, row: usize) -> i64;

    /// Batch-local aggregates: one row per node, columns named like the
    /// tree's aggregate columns plus `psp_strand_count_sum`.
    fn aggtable(&self) -> &DataTable;
}

#[derive(Debug, Clone)]
struct DenseNode {
    parent: usize,
    depth: u32,
    value: Scalar,
    sort_value: Scalar,
    /// Range into the sorted strand row order.
    rows: Range<usize>,
}

#[derive(Debug)]
pub struct DenseContext {
    nodes: Vec<DenseNode>,
    /// Strand rows sorted by pivot path.
    order: Vec<usize>,
    pkeys: Vec<Scalar>,
    counts: Vec<i64>,
    aggtable: DataTable,
    last_level: u32,
}

impl DenseContext {
    /// Group `strands` by `pivots` and compute each group's batch-local
    /// aggregates for the columns of `agg_schema`.
    pub fn build(
        strands: &StrandTables,
        pivots: &[String],
        config: &TreeConfig,
        aggspecs: &[AggSpec],
        agg_schema: &Schema,
    ) -> Result<Self> {
        let nrows = strands.strands.size();
        let pivot_cols = pivots
            .iter()
            .map(|p| strands.strands.column(p))
            .collect::<pivotree_table::Result<Vec<_>>>()?;
        let sort_cols = pivots
            .iter()
            .map(|p| strands.strands.column(config.get_sort_by(p)))
            .collect::<pivotree_table::Result<Vec<_>>>()?;

        let keys: Vec<Vec<Scalar>> = (0..nrows)
            .map(|row| pivot_cols.iter().map(|c| c.get_scalar(row)).collect())
            .collect();
        let mut order: Vec<usize> = (0..nrows).collect();
        order.sort_by(|a, b| keys[*a].cmp(&keys[*b]));

        let nodes = group_preorder(&order, &keys, |row, level| {
            sort_cols[level].get_scalar(row)
        });

        let pkey_col = strands.strands.column(PSP_PKEY)?;
        let pkeys = (0..nrows).map(|row| pkey_col.get_scalar(row)).collect();
        let count_col = strands.aggs.column(PSP_STRAND_COUNT)?;
        let counts: Vec<i64> = (0..nrows)
            .map(|row| count_col.get_scalar(row).as_int().unwrap_or(0))
            .collect();

        let mut ctx = Self {
            nodes,
            order,
            pkeys,
            counts,
            aggtable: DataTable::default(),
            last_level: pivots.len() as u32,
        };
        ctx.aggtable = ctx.compute_aggregates(strands, aggspecs, agg_schema)?;

        debug!(
            strands = nrows,
            groups = ctx.nodes.len(),
            "built batch grouping"
        );
        Ok(ctx)
    }

    fn compute_aggregates(
        &self,
        strands: &StrandTables,
        aggspecs: &[AggSpec],
        agg_schema: &Schema,
    ) -> Result<DataTable> {
        let mut schema = agg_schema.clone();
        schema.add_column(PSP_STRAND_COUNT_SUM, DType::Int64)?;
        let mut table = DataTable::new(schema, self.nodes.len());

        for node in 0..self.nodes.len() {
            let total: i64 = self.member_rows(node).iter().map(|&r| self.counts[r]).sum();
            table.set_scalar(PSP_STRAND_COUNT_SUM, node, &Scalar::Int(total))?;
        }

        let mut seen = HashSet::new();
        for spec in aggspecs {
            if !seen.insert(spec.name.as_str()) || !agg_schema.contains(&spec.name) {
                continue;
            }
            for node in 0..self.nodes.len() {
                let value = self.batch_value(strands, spec, node)?;
                if value.is_valid() {
                    table.set_scalar(&spec.name, node, &value)?;
                }
            }
        }
        Ok(table)
    }

    /// Batch contribution of one group to one aggregate. Kinds recomputed
    /// from the row store contribute nothing.
    fn batch_value(&self, strands: &StrandTables, spec: &AggSpec, node: usize) -> Result<Scalar> {
        let rows = self.member_rows(node);
        Ok(match spec.kind {
            kind if kind.is_sum_like() => {
                let col = strands.aggs.column(spec.dependency(0)?)?;
                rows.iter()
                    .fold(Scalar::None, |acc, &r| acc.add(&col.get_scalar(r)))
            }
            AggKind::Count => Scalar::Int(rows.iter().map(|&r| self.counts[r]).sum()),
            AggKind::HighWaterMark | AggKind::LowWaterMark => {
                let col = strands.strands.column(spec.dependency(0)?)?;
                let values = rows
                    .iter()
                    .filter(|&&r| self.counts[r] >= 0)
                    .map(|&r| col.get_scalar(r))
                    .filter(Scalar::is_valid);
                let best = if spec.kind == AggKind::HighWaterMark {
                    values.max()
                } else {
                    values.min()
                };
                best.unwrap_or_default()
            }
            _ => Scalar::None,
        })
    }
}

/// Lay out the groups of sorted rows in depth-first preorder. `sort_value`
/// gives a row's sort key at a level; a group takes its first row's.
fn group_preorder(
    order: &[usize],
    keys: &[Vec<Scalar>],
    sort_value: impl Fn(usize, usize) -> Scalar,
) -> Vec<DenseNode> {
    let nlevels = keys.first().map_or(0, Vec::len);
    let mut nodes = vec![DenseNode {
        parent: 0,
        depth: 0,
        value: Scalar::None,
        sort_value: Scalar::None,
        rows: 0..order.len(),
    }];
    // Open node at each depth along the current path.
    let mut path = vec![0usize];
    let mut prev: Option<&Vec<Scalar>> = None;

    for (pos, &row) in order.iter().enumerate() {
        let key = &keys[row];
        let diverge = prev.map_or(0, |p| {
            p.iter()
                .zip(key)
                .position(|(a, b)| a != b)
                .unwrap_or(nlevels)
        });

        for &open in &path[diverge + 1..] {
            nodes[open].rows.end = pos;
        }
        path.truncate(diverge + 1);

        for level in diverge..nlevels {
            let id = nodes.len();
            nodes.push(DenseNode {
                parent: path[level],
                depth: level as u32 + 1,
                value: key[level].clone(),
                sort_value: sort_value(row, level),
                rows: pos..order.len(),
            });
            path.push(id);
        }
        prev = Some(key);
    }
    nodes
}

impl BatchContext for DenseContext {
    fn len(&self) -> usize {
        self.nodes.len()
    }

    fn parent(&self, node: usize) -> usize {
        self.nodes[node].parent
    }

    fn depth(&self, node: usize) -> u32 {
        self.nodes[node].depth
    }

    fn value(&self, node: usize) -> &Scalar {
        &self.nodes[node].value
    }

    fn sort_value(&self, node: usize) -> &Scalar {
        &self.nodes[node].sort_value
    }

    fn last_level(&self) -> u32 {
        self.last_level
    }

    fn strand_count_sum(&self, node: usize) -> i64 {
        self.aggtable
            .get_scalar(PSP_STRAND_COUNT_SUM, node)
            .ok()
            .and_then(|v| v.as_int())
            .unwrap_or(0)
    }

    fn member_rows(&self, node: usize) -> &[usize] {
        &self.order[self.nodes[node].rows.clone()]
    }

    fn strand_pkey(&self, row: usize) -> &Scalar {
        &self.pkeys[row]
    }

    fn strand_count(&self, row: usize) -> i64 {
        self.counts[row]
    }

    fn aggtable(&self) -> &DataTable {
        &self.aggtable
    }
}
