//! Strand table construction.
//!
//! A batch of flattened row operations is reduced to "strands": one row per
//! contribution to a pivot path, carrying the path's pivot-like values, the
//! values to fold into each aggregate dependency, and a signed strand count.
//!
//! Two tables come out of a build:
//!
//! - `strands`: pivot-like columns (each pivot followed by its sort-by column,
//!   deduplicated, then the dependencies of non-delta aggregates) plus
//!   `psp_pkey`
//! - `aggs`: every aggregate dependency column (sorted by name) plus
//!   `psp_strand_count`

use std::collections::BTreeSet;

use pivotree_table::{Column, DType, DataTable, Scalar, Schema};
use roaring::RoaringBitmap;
use tracing::debug;

use crate::aggspec::AggSpec;
use crate::config::TreeConfig;
use crate::error::{Result, TreeError};

pub const PSP_PKEY: &str = "psp_pkey";
pub const PSP_OP: &str = "psp_op";
pub const PSP_EXISTED: &str = "psp_existed";
pub const PSP_STRAND_COUNT: &str = "psp_strand_count";
pub const PSP_STRAND_COUNT_SUM: &str = "psp_strand_count_sum";

/// Row operation, stored as `Int8` in `psp_op`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum Op {
    Insert = 0,
    Delete = 1,
}

impl Op {
    pub const fn code(self) -> i8 {
        self as i8
    }

    pub fn from_scalar(value: &Scalar) -> Result<Self> {
        match value.as_int() {
            Some(0) => Ok(Op::Insert),
            Some(1) => Ok(Op::Delete),
            Some(other) => Err(TreeError::InvalidOp(other)),
            None => Err(TreeError::InvalidOp(-1)),
        }
    }
}

/// How one cell changed between the previous and current row.
///
/// Naming: `EQ`/`NEQ` compares the values, the trailing letters give
/// validity before and after (`T`/`F`), `D` marks a row delete, and
/// `NVEQ_FT` is a null-to-value change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
#[allow(non_camel_case_types)]
pub enum ValueTransition {
    EQ_FF = 0,
    EQ_TT = 1,
    NEQ_FT = 2,
    NEQ_TF = 3,
    NEQ_TT = 4,
    EQ_TDF = 5,
    EQ_TDT = 6,
    NEQ_TDF = 7,
    NEQ_TDT = 8,
    NVEQ_FT = 9,
}

impl ValueTransition {
    pub const fn code(self) -> i8 {
        self as i8
    }

    pub fn from_scalar(value: &Scalar) -> Result<Self> {
        use ValueTransition::*;
        Ok(match value.as_int() {
            Some(0) => EQ_FF,
            Some(1) => EQ_TT,
            Some(2) => NEQ_FT,
            Some(3) => NEQ_TF,
            Some(4) => NEQ_TT,
            Some(5) => EQ_TDF,
            Some(6) => EQ_TDT,
            Some(7) => NEQ_TDF,
            Some(8) => NEQ_TDT,
            Some(9) => NVEQ_FT,
            Some(other) => return Err(TreeError::InvalidTransition(other)),
            None => return Err(TreeError::InvalidTransition(-1)),
        })
    }

    /// Transitions that move a row to a different group.
    pub const fn pivots_changed(self) -> bool {
        matches!(
            self,
            ValueTransition::NEQ_TF | ValueTransition::NVEQ_FT | ValueTransition::NEQ_TT
        )
    }
}

/// Output of a strand build.
#[derive(Debug, Clone)]
pub struct StrandTables {
    pub strands: DataTable,
    pub aggs: DataTable,
}

impl StrandTables {
    pub fn len(&self) -> usize {
        self.strands.size()
    }

    pub fn is_empty(&self) -> bool {
        self.strands.is_empty()
    }
}

/// Before/after views of a batch, row-aligned with its flattened table.
#[derive(Debug, Clone, Copy)]
pub struct DeltaTables<'a> {
    pub delta: &'a DataTable,
    pub prev: &'a DataTable,
    pub current: &'a DataTable,
    pub transitions: &'a DataTable,
}

/// Column layout shared by both builders.
#[derive(Debug, Clone)]
pub struct StrandLayout {
    /// Pivots and their sort-by columns, then non-delta dependencies.
    pub pivot_like: Vec<String>,
    /// How many leading `pivot_like` columns are pivots or sort-by columns.
    pub pivsize: usize,
    pub strand_schema: Schema,
    pub agg_schema: Schema,
}

impl StrandLayout {
    pub fn new(
        source: &Schema,
        pivots: &[String],
        aggspecs: &[AggSpec],
        config: &TreeConfig,
    ) -> Result<Self> {
        let mut pivot_like: Vec<String> = Vec::new();
        let mut strand_schema = Schema::new();
        for pivot in pivots {
            add_pivot_like(source, pivot, &mut pivot_like, &mut strand_schema)?;
            let sort_by = config.get_sort_by(pivot);
            add_pivot_like(source, sort_by, &mut pivot_like, &mut strand_schema)?;
        }
        let pivsize = pivot_like.len();

        let mut deps = BTreeSet::new();
        for spec in aggspecs {
            for dep in &spec.dependencies {
                deps.insert(dep.as_str());
                if spec.kind.is_non_delta() {
                    add_pivot_like(source, dep, &mut pivot_like, &mut strand_schema)?;
                }
            }
        }

        strand_schema.add_column(PSP_PKEY, source_dtype(source, PSP_PKEY)?)?;

        let mut agg_schema = Schema::new();
        for dep in deps {
            agg_schema.add_column(dep, source_dtype(source, dep)?)?;
        }
        agg_schema.add_column(PSP_STRAND_COUNT, DType::Int8)?;

        Ok(Self {
            pivot_like,
            pivsize,
            strand_schema,
            agg_schema,
        })
    }

    /// Aggregate dependency columns, in `aggs` order.
    fn agg_columns(&self) -> &[String] {
        let columns = self.agg_schema.columns();
        &columns[..columns.len() - 1]
    }

    /// Build from flattened rows alone: every live row passing the filters
    /// contributes `+1` with its own values.
    pub fn build(&self, flattened: &DataTable, config: &TreeConfig) -> Result<StrandTables> {
        let pivot_cols = columns(flattened, &self.pivot_like)?;
        let agg_cols = columns(flattened, self.agg_columns())?;
        let pkey_col = flattened.column(PSP_PKEY)?;
        let op_col = flattened.column(PSP_OP).ok();
        let mask = config
            .has_filters()
            .then(|| config.filter_mask(flattened));

        let mut out = self.writer();
        for row in 0..flattened.size() {
            if mask.as_ref().is_some_and(|m| !m.contains(row as u32)) {
                continue;
            }
            if read_op(op_col, row)? == Op::Delete {
                continue;
            }
            out.push(
                pivot_cols.iter().map(|c| c.get_scalar(row)),
                pkey_col.get_scalar(row),
                agg_cols.iter().map(|c| c.get_scalar(row)),
                1,
            )?;
        }

        let tables = out.finish()?;
        debug!(
            rows = flattened.size(),
            strands = tables.len(),
            "built strand table from flattened rows"
        );
        Ok(tables)
    }

    /// Build against before/after snapshots of the batch.
    ///
    /// Per row, by filter membership before and after (a key that did not
    /// exist before the batch is always out before it):
    ///
    /// - out, out: nothing
    /// - out, in: the current row, force-applied
    /// - in, out: reversal of the previous row
    /// - in, in: the current row; if a pivot moved and the row was not
    ///   deleted, also a reversal of the previous row
    pub fn build_with_deltas(
        &self,
        flattened: &DataTable,
        deltas: &DeltaTables<'_>,
        config: &TreeConfig,
    ) -> Result<StrandTables> {
        let aggs = self.agg_columns();
        let cols = SnapshotColumns {
            piv_prev: columns(deltas.prev, &self.pivot_like)?,
            piv_curr: columns(deltas.current, &self.pivot_like)?,
            piv_trans: columns(deltas.transitions, &self.pivot_like)?,
            agg_prev: columns(deltas.prev, aggs)?,
            agg_curr: columns(deltas.current, aggs)?,
            agg_delta: columns(deltas.delta, aggs)?,
            existed: flattened.column(PSP_EXISTED).ok(),
        };
        let pkey_col = flattened.column(PSP_PKEY)?;
        let op_col = flattened.column(PSP_OP).ok();

        let masks = config.has_filters().then(|| {
            (
                config.filter_mask(deltas.prev),
                config.filter_mask(deltas.current),
            )
        });

        let mut out = self.writer();
        for row in 0..flattened.size() {
            let pkey = pkey_col.get_scalar(row);
            let op = read_op(op_col, row)?;
            let (was_in, is_in) = membership(masks.as_ref(), row);
            // Keys new to the store were in no group before the batch.
            let was_in = was_in && cols.existed.map_or(true, |c| c.get_scalar(row).is_truthy());

            match (was_in, is_in) {
                (false, false) => {}
                (false, true) => {
                    self.phase_one(&mut out, &cols, row, pkey, op, true)?;
                }
                (true, false) => {
                    self.phase_two(&mut out, &cols, row, pkey)?;
                }
                (true, true) => {
                    let pivots_neq =
                        self.phase_one(&mut out, &cols, row, pkey.clone(), op, false)?;
                    if op != Op::Delete && pivots_neq {
                        self.phase_two(&mut out, &cols, row, pkey)?;
                    }
                }
            }
        }

        let tables = out.finish()?;
        debug!(
            rows = flattened.size(),
            strands = tables.len(),
            "built strand table from batch deltas"
        );
        Ok(tables)
    }

    /// Emit the current row. Returns whether a pivot changed.
    fn phase_one(
        &self,
        out: &mut StrandWriter,
        cols: &SnapshotColumns<'_>,
        row: usize,
        pkey: Scalar,
        op: Op,
        force_current: bool,
    ) -> Result<bool> {
        let mut pivots_neq = false;
        let mut all_eq_tt = true;
        for (pidx, trans_col) in cols.piv_trans.iter().enumerate() {
            let trans = ValueTransition::from_scalar(&trans_col.get_scalar(row))?;
            all_eq_tt &= trans == ValueTransition::EQ_TT;
            if pidx < self.pivsize {
                pivots_neq |= trans.pivots_changed();
            }
        }

        let agg_source = if pivots_neq || force_current {
            &cols.agg_curr
        } else {
            &cols.agg_delta
        };

        // A row adds a strand when it is new to its group: new to the store,
        // moved by a pivot, or entering the filter.
        let count = if op == Op::Delete {
            -1
        } else if pivots_neq || force_current {
            1
        } else {
            match cols.existed {
                Some(col) => i8::from(!col.get_scalar(row).is_truthy()),
                None => i8::from(self.pivsize == 0 || !all_eq_tt),
            }
        };

        out.push(
            cols.piv_curr.iter().map(|c| c.get_scalar(row)),
            pkey,
            agg_source.iter().map(|c| c.get_scalar(row)),
            count,
        )?;
        Ok(pivots_neq)
    }

    /// Emit the reversal of the previous row.
    fn phase_two(
        &self,
        out: &mut StrandWriter,
        cols: &SnapshotColumns<'_>,
        row: usize,
        pkey: Scalar,
    ) -> Result<()> {
        out.push(
            cols.piv_prev.iter().map(|c| c.get_scalar(row)),
            pkey,
            cols.agg_prev.iter().map(|c| c.get_scalar(row).negate()),
            -1,
        )
    }

    fn writer(&self) -> StrandWriter {
        StrandWriter {
            strands: DataTable::new(self.strand_schema.clone(), 0),
            aggs: DataTable::new(self.agg_schema.clone(), 0),
        }
    }
}

struct SnapshotColumns<'a> {
    piv_prev: Vec<&'a Column>,
    piv_curr: Vec<&'a Column>,
    piv_trans: Vec<&'a Column>,
    agg_prev: Vec<&'a Column>,
    agg_curr: Vec<&'a Column>,
    agg_delta: Vec<&'a Column>,
    existed: Option<&'a Column>,
}

struct StrandWriter {
    strands: DataTable,
    aggs: DataTable,
}

impl StrandWriter {
    fn push(
        &mut self,
        pivot_like: impl Iterator<Item = Scalar>,
        pkey: Scalar,
        aggs: impl Iterator<Item = Scalar>,
        count: i8,
    ) -> Result<()> {
        let strand_row: Vec<Scalar> = pivot_like.chain(std::iter::once(pkey)).collect();
        self.strands.push_row(&strand_row)?;

        let agg_row: Vec<Scalar> = aggs
            .chain(std::iter::once(Scalar::Int(i64::from(count))))
            .collect();
        self.aggs.push_row(&agg_row)?;
        Ok(())
    }

    fn finish(self) -> Result<StrandTables> {
        Ok(StrandTables {
            strands: self.strands,
            aggs: self.aggs,
        })
    }
}

fn source_dtype(source: &Schema, name: &str) -> Result<DType> {
    source
        .dtype(name)
        .map_err(|_| TreeError::MissingColumn(name.to_string()))
}

fn add_pivot_like(
    source: &Schema,
    name: &str,
    pivot_like: &mut Vec<String>,
    strand_schema: &mut Schema,
) -> Result<()> {
    if !strand_schema.contains(name) {
        strand_schema.add_column(name, source_dtype(source, name)?)?;
        pivot_like.push(name.to_string());
    }
    Ok(())
}

fn columns<'a>(table: &'a DataTable, names: &[String]) -> Result<Vec<&'a Column>> {
    names
        .iter()
        .map(|name| {
            table
                .column(name)
                .map_err(|_| TreeError::MissingColumn(name.clone()))
        })
        .collect()
}

fn read_op(op_col: Option<&Column>, row: usize) -> Result<Op> {
    op_col.map_or(Ok(Op::Insert), |c| Op::from_scalar(&c.get_scalar(row)))
}

fn membership(masks: Option<&(RoaringBitmap, RoaringBitmap)>, row: usize) -> (bool, bool) {
    masks.map_or((true, true), |(prev, curr)| {
        (prev.contains(row as u32), curr.contains(row as u32))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggspec::AggKind;
    use crate::config::{Filter, FilterOp};

    fn flattened() -> DataTable {
        DataTable::from_columns([
            (
                PSP_PKEY,
                DType::Int64,
                vec![Scalar::Int(1), Scalar::Int(2), Scalar::Int(3)],
            ),
            (
                PSP_OP,
                DType::Int8,
                vec![Scalar::Int(0), Scalar::Int(1), Scalar::Int(0)],
            ),
            (
                "region",
                DType::Str,
                vec![Scalar::str("East"), Scalar::str("West"), Scalar::str("East")],
            ),
            (
                "sales",
                DType::Float64,
                vec![Scalar::Float(10.0), Scalar::Float(4.0), Scalar::Float(5.0)],
            ),
        ])
        .unwrap()
    }

    fn layout(config: &TreeConfig, specs: &[AggSpec]) -> StrandLayout {
        StrandLayout::new(
            flattened().schema(),
            &config.row_pivots,
            specs,
            config,
        )
        .unwrap()
    }

    #[test]
    fn layout_dedupes_pivot_and_sort_columns() {
        let config = TreeConfig::new(&["region"]).with_sort_by("region", "region");
        let specs = vec![
            AggSpec::new("sales", AggKind::Sum, &["sales"]),
            AggSpec::new("hwm", AggKind::HighWaterMark, &["sales"]),
        ];
        let layout = layout(&config, &specs);
        assert_eq!(layout.pivot_like, vec!["region", "sales"]);
        assert_eq!(layout.pivsize, 1);
        assert_eq!(layout.strand_schema.columns(), &["region", "sales", PSP_PKEY]);
        assert_eq!(layout.agg_schema.columns(), &["sales", PSP_STRAND_COUNT]);
    }

    #[test]
    fn flattened_build_skips_deletes_and_filtered_rows() {
        let config = TreeConfig::new(&["region"])
            .with_filter(Filter::new("sales", FilterOp::Lt, 8.0));
        let specs = vec![AggSpec::new("sales", AggKind::Sum, &["sales"])];
        let tables = layout(&config, &specs)
            .build(&flattened(), &config)
            .unwrap();

        assert_eq!(tables.len(), 1);
        assert_eq!(
            tables.strands.get_scalar(PSP_PKEY, 0).unwrap(),
            Scalar::Int(3)
        );
        assert_eq!(
            tables.aggs.get_scalar(PSP_STRAND_COUNT, 0).unwrap(),
            Scalar::Int(1)
        );
    }

    #[test]
    fn transition_codes_round_trip_and_reject_garbage() {
        for code in 0..10 {
            let t = ValueTransition::from_scalar(&Scalar::Int(code)).unwrap();
            assert_eq!(i64::from(t.code()), code);
        }
        assert_eq!(
            ValueTransition::from_scalar(&Scalar::Int(42)),
            Err(TreeError::InvalidTransition(42))
        );
        assert_eq!(Op::from_scalar(&Scalar::Int(3)), Err(TreeError::InvalidOp(3)));
        assert!(ValueTransition::NEQ_TT.pivots_changed());
        assert!(!ValueTransition::NEQ_FT.pivots_changed());
    }
}
