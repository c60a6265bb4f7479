//! Aggregate update engine.
//!
//! Every unification record moves one persistent aggregate row from its old
//! values to new ones. Kinds that fold incrementally (sums, counts, water
//! marks) combine the old value with the batch contribution; the rest are
//! recomputed from the members' current values in the row store.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use pivotree_table::{DType, Scalar};
use tracing::{debug, trace};

use crate::aggspec::{AggKind, AggSpec, SortType};
use crate::dense::BatchContext;
use crate::error::Result;
use crate::row_store::RowStore;
use crate::tree::{Delta, Feature, SparseTree};
use crate::unify::UnifyRecord;
use crate::{NodeIdx, ROOT_IDX};

const UNIQUE_SENTINEL: &str = "-";

/// Outcome of one column update.
#[derive(Debug, Clone, PartialEq)]
enum Update {
    Keep,
    Value(Scalar),
    /// Numerator and denominator of a mean.
    Pair(f64, f64),
}

impl SparseTree {
    /// Apply every aggregate column to every record of the last
    /// unification. Records of nodes pruned since are skipped.
    pub fn update_aggs_from_static(
        &mut self,
        ctx: &impl BatchContext,
        rows: &impl RowStore,
    ) -> Result<()> {
        let order = self.update_order();
        let records = std::mem::take(&mut self.unification_records);
        let result = self.apply_records(&records, &order, ctx, rows);
        self.unification_records = records;
        result
    }

    /// Plain columns in declaration order, then scaled ones; a column name
    /// is visited once.
    fn update_order(&self) -> Vec<usize> {
        let specs = self.aggspecs();
        let (plain, scaled): (Vec<usize>, Vec<usize>) =
            (0..specs.len()).partition(|&c| !specs[c].kind.is_scaled());
        let mut seen = HashSet::new();
        plain
            .into_iter()
            .chain(scaled)
            .filter(|&c| seen.insert(specs[c].name.as_str()))
            .collect()
    }

    fn apply_records(
        &mut self,
        records: &[UnifyRecord],
        order: &[usize],
        ctx: &impl BatchContext,
        rows: &impl RowStore,
    ) -> Result<()> {
        let mut applied = 0usize;
        for record in records {
            if !self.node_exists(record.node) {
                trace!(node = record.node, "skipping pruned node");
                continue;
            }
            let mut members = None;
            for &column in order {
                let update = self.next_value(column, record, ctx, rows, &mut members)?;
                self.write_update(column, record, update)?;
            }
            applied += 1;
        }
        debug!(records = applied, columns = order.len(), "updated aggregates");
        Ok(())
    }

    fn next_value(
        &self,
        column: usize,
        record: &UnifyRecord,
        ctx: &impl BatchContext,
        rows: &impl RowStore,
        members: &mut Option<Vec<Scalar>>,
    ) -> Result<Update> {
        let spec = &self.aggspecs()[column];
        let dst = record.dst_row as usize;
        let old = self.aggtable().get_scalar(&spec.name, dst)?;

        let value = match spec.kind {
            AggKind::Sum | AggKind::PctSumParent | AggKind::PctSumGrandTotal => {
                if old.is_nan() {
                    let keys = self.members(record.node, members)?;
                    let values = rows.read_column_valid(spec.dependency(0)?, keys)?;
                    Scalar::Float(values.iter().map(Scalar::to_f64).sum())
                } else {
                    old.add(&ctx.aggtable().get_scalar(&spec.name, record.src_row)?)
                }
            }
            AggKind::Count => {
                let own = i64::from(record.node == ROOT_IDX);
                Scalar::Int(record.nstrands - own)
            }
            AggKind::Mean => {
                let keys = self.members(record.node, members)?;
                let values = rows.read_column_valid(spec.dependency(0)?, keys)?;
                let num: f64 = values.iter().map(Scalar::to_f64).sum();
                return Ok(Update::Pair(num, values.len() as f64));
            }
            AggKind::WeightedMean => {
                let keys = self.members(record.node, members)?;
                let values = rows.read_column(spec.dependency(0)?, keys)?;
                let weights = rows.read_column(spec.dependency(1)?, keys)?;
                let (num, den) = values
                    .iter()
                    .zip(&weights)
                    .filter(|(v, w)| v.is_valid() && w.is_valid())
                    .fold((0.0, 0.0), |(num, den), (v, w)| {
                        (num + v.to_f64() * w.to_f64(), den + w.to_f64())
                    });
                return Ok(Update::Pair(num, den));
            }
            AggKind::Unique => {
                let keys = self.members(record.node, members)?;
                match rows.is_unique(keys, spec.dependency(0)?)? {
                    (true, value) => value,
                    (false, _) => self.not_unique(spec, UNIQUE_SENTINEL)?,
                }
            }
            AggKind::Or | AggKind::Any => {
                let keys = self.members(record.node, members)?;
                let mut out = Scalar::None;
                let found = rows.apply(keys, spec.dependency(0)?, &mut out, |v, out| {
                    if v.is_truthy() {
                        *out = v.clone();
                        true
                    } else {
                        false
                    }
                })?;
                if !found {
                    return Ok(Update::Keep);
                }
                out
            }
            AggKind::Median => {
                let keys = self.members(record.node, members)?;
                rows.reduce(keys, spec.dependency(0)?, median)?
            }
            AggKind::Join => {
                let keys = self.members(record.node, members)?;
                rows.reduce(keys, spec.dependency(0)?, join)?
            }
            AggKind::ScaledDiv | AggKind::ScaledAdd | AggKind::ScaledMul => {
                self.scaled(spec, dst)?
            }
            AggKind::Dominant => {
                let keys = self.members(record.node, members)?;
                rows.reduce(keys, spec.dependency(0)?, dominant)?
            }
            AggKind::First | AggKind::LastByIndex => {
                let keys = self.members(record.node, members)?;
                let values = rows.read_column(spec.dependency(0)?, keys)?;
                let sort_keys = rows.read_column(spec.dependency(1)?, keys)?;
                first_last(spec.kind, spec.sort_type, values, sort_keys)
            }
            AggKind::And => {
                let keys = self.members(record.node, members)?;
                rows.reduce(keys, spec.dependency(0)?, |values| {
                    Scalar::Bool(values.iter().all(Scalar::is_truthy))
                })?
            }
            AggKind::LastValue => self.last_value(record.node, spec, rows)?,
            AggKind::HighWaterMark | AggKind::LowWaterMark => {
                let src = ctx.aggtable().get_scalar(&spec.name, record.src_row)?;
                if src.is_none() {
                    return Ok(Update::Keep);
                }
                if old.is_none() {
                    src
                } else if spec.kind == AggKind::HighWaterMark {
                    old.clone().max(src)
                } else {
                    old.clone().min(src)
                }
            }
            AggKind::SumNotNull => {
                let keys = self.members(record.node, members)?;
                rows.reduce(keys, spec.dependency(0)?, |values| {
                    values
                        .iter()
                        .filter(|v| !v.is_nan())
                        .fold(Scalar::None, |acc, v| acc.add(v))
                })?
            }
            AggKind::SumAbs => {
                let keys = self.members(record.node, members)?;
                rows.reduce(keys, spec.dependency(0)?, |values| {
                    values.iter().fold(Scalar::None, |acc, v| acc.add(&v.abs()))
                })?
            }
            AggKind::AbsSum => {
                let keys = self.members(record.node, members)?;
                rows.reduce(keys, spec.dependency(0)?, |values| {
                    values.iter().fold(Scalar::None, |acc, v| acc.add(v)).abs()
                })?
            }
            AggKind::Mul => {
                let keys = self.members(record.node, members)?;
                rows.reduce(keys, spec.dependency(0)?, |values| {
                    values.iter().fold(Scalar::None, |acc, v| acc.mul(v))
                })?
            }
            AggKind::DistinctCount => {
                let keys = self.members(record.node, members)?;
                rows.reduce(keys, spec.dependency(0)?, |values| {
                    Scalar::Int(values.into_iter().collect::<BTreeSet<_>>().len() as i64)
                })?
            }
            AggKind::DistinctLeaf => {
                if !self.is_leaf(record.node)? {
                    return Ok(Update::Value(self.not_unique(spec, "")?));
                }
                let keys = self.members(record.node, members)?;
                match rows.is_unique(keys, spec.dependency(0)?)? {
                    (true, value) => value,
                    (false, _) => self.not_unique(spec, "")?,
                }
            }
            AggKind::UdfCombiner | AggKind::UdfReducer => return Ok(Update::Keep),
        };
        Ok(Update::Value(value))
    }

    fn write_update(&mut self, column: usize, record: &UnifyRecord, update: Update) -> Result<()> {
        let name = self.aggspecs()[column].name.clone();
        let dst = record.dst_row as usize;
        let old = self.aggtable().get_scalar(&name, dst)?;

        let col = self.aggregates.table_mut().column_mut(&name)?;
        match update {
            Update::Keep => return Ok(()),
            Update::Value(value) => col.set_scalar(dst, &value)?,
            Update::Pair(num, den) => {
                col.set_pair(dst, (num, den))?;
                col.set_valid(dst, den != 0.0)?;
            }
        }
        let new = col.get_scalar(dst);

        if old != new {
            trace!(node = record.node, column, %old, %new, "aggregate changed");
            self.has_delta = true;
            if self.feature_enabled(Feature::Delta) {
                self.deltas.push(Delta {
                    node: record.node,
                    column,
                    old,
                    new,
                });
            }
        }
        Ok(())
    }

    /// Member keys of `node`, read once per record.
    fn members<'m>(
        &self,
        node: NodeIdx,
        cache: &'m mut Option<Vec<Scalar>>,
    ) -> Result<&'m [Scalar]> {
        if cache.is_none() {
            *cache = Some(self.pkeys(node)?);
        }
        Ok(cache.as_deref().unwrap_or_default())
    }

    /// String columns show `sentinel` when members disagree; others go
    /// invalid.
    fn not_unique(&self, spec: &AggSpec, sentinel: &str) -> Result<Scalar> {
        Ok(match self.aggregates.schema().dtype(&spec.name)? {
            DType::Str => Scalar::str(sentinel),
            _ => Scalar::None,
        })
    }

    /// Weighted combination of two already-updated columns of row `dst`.
    fn scaled(&self, spec: &AggSpec, dst: usize) -> Result<Scalar> {
        let operand = |idx: usize, weight: f64| -> Result<Option<f64>> {
            let name = &self.aggspecs()[idx].name;
            let value = self.aggtable().get_scalar(name, dst)?;
            Ok(value.is_valid().then(|| value.to_f64() * weight))
        };
        let (Some(a), Some(b)) = (
            operand(spec.agg_one_idx, spec.agg_one_weight)?,
            operand(spec.agg_two_idx, spec.agg_two_weight)?,
        ) else {
            return Ok(Scalar::None);
        };
        Ok(match spec.kind {
            AggKind::ScaledDiv if b == 0.0 => Scalar::None,
            AggKind::ScaledDiv => Scalar::Float(a / b),
            AggKind::ScaledAdd => Scalar::Float(a + b),
            _ => Scalar::Float(a * b),
        })
    }

    /// Value of the newest key of the newest leaf under `node`.
    fn last_value(&self, node: NodeIdx, spec: &AggSpec, rows: &impl RowStore) -> Result<Scalar> {
        let leaf = if self.is_leaf(node)? {
            Some(node)
        } else {
            self.leaves.last_leaf(node)
        };
        match leaf.and_then(|leaf| self.pkeys.last_key(leaf)) {
            Some(pkey) => rows.read_by_pkey(spec.dependency(0)?, pkey),
            None => Ok(Scalar::None),
        }
    }
}

/// Lower median of the valid values.
fn median(values: Vec<Scalar>) -> Scalar {
    let mut values: Vec<Scalar> = values.into_iter().filter(Scalar::is_valid).collect();
    if values.is_empty() {
        return Scalar::None;
    }
    let mid = (values.len() - 1) / 2;
    let (_, median, _) = values.select_nth_unstable(mid);
    median.clone()
}

/// Distinct valid values in ascending order, comma separated.
fn join(values: Vec<Scalar>) -> Scalar {
    let distinct: BTreeSet<Scalar> = values.into_iter().filter(Scalar::is_valid).collect();
    if distinct.is_empty() {
        return Scalar::None;
    }
    let parts: Vec<String> = distinct.iter().map(ToString::to_string).collect();
    Scalar::str(&parts.join(", "))
}

/// Most frequent valid value; the smallest one on ties.
fn dominant(values: Vec<Scalar>) -> Scalar {
    let mut counts: BTreeMap<Scalar, usize> = BTreeMap::new();
    for value in values.into_iter().filter(Scalar::is_valid) {
        *counts.entry(value).or_default() += 1;
    }
    let mut best: Option<(Scalar, usize)> = None;
    for (value, count) in counts {
        if best.as_ref().map_or(true, |(_, n)| count > *n) {
            best = Some((value, count));
        }
    }
    best.map(|(value, _)| value).unwrap_or_default()
}

/// Value whose sort key is extreme for the kind and direction. The first
/// member wins among equal keys; members without a sort key are ignored.
fn first_last(
    kind: AggKind,
    sort_type: SortType,
    values: Vec<Scalar>,
    sort_keys: Vec<Scalar>,
) -> Scalar {
    let take_min = match (sort_type, kind) {
        (SortType::None, _) => return Scalar::None,
        (SortType::Ascending | SortType::AscendingAbs, AggKind::First) => true,
        (SortType::Ascending | SortType::AscendingAbs, _) => false,
        (SortType::Descending | SortType::DescendingAbs, AggKind::First) => false,
        (SortType::Descending | SortType::DescendingAbs, _) => true,
    };
    let keyed = values
        .into_iter()
        .zip(sort_keys)
        .filter(|(_, key)| key.is_valid())
        .map(|(value, key)| {
            let key = if sort_type.is_abs() { key.abs() } else { key };
            (key, value)
        });

    let mut best: Option<(Scalar, Scalar)> = None;
    for (key, value) in keyed {
        let better = match &best {
            None => true,
            Some((k, _)) if take_min => key < *k,
            Some((k, _)) => key > *k,
        };
        if better {
            best = Some((key, value));
        }
    }
    best.map(|(_, value)| value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(values: &[i64]) -> Vec<Scalar> {
        values.iter().map(|v| Scalar::Int(*v)).collect()
    }

    #[test]
    fn median_takes_lower_middle_and_skips_invalid() {
        assert_eq!(median(ints(&[5, 1, 3])), Scalar::Int(3));
        assert_eq!(median(ints(&[4, 1, 3, 2])), Scalar::Int(2));
        assert_eq!(median(vec![Scalar::None, Scalar::Int(7)]), Scalar::Int(7));
        assert_eq!(median(vec![]), Scalar::None);
    }

    #[test]
    fn dominant_breaks_ties_towards_smallest() {
        assert_eq!(dominant(ints(&[3, 1, 3, 1, 2])), Scalar::Int(1));
        assert_eq!(dominant(ints(&[2, 5, 5])), Scalar::Int(5));
        assert_eq!(dominant(vec![Scalar::None, Scalar::None]), Scalar::None);
    }

    #[test]
    fn join_dedupes_and_sorts() {
        let values = vec![
            Scalar::str("b"),
            Scalar::str("a"),
            Scalar::None,
            Scalar::str("b"),
        ];
        assert_eq!(join(values), Scalar::str("a, b"));
        assert_eq!(join(vec![]), Scalar::None);
    }

    #[test]
    fn first_and_last_follow_sort_direction() {
        let values = vec![Scalar::str("x"), Scalar::str("y"), Scalar::str("z")];
        let keys = ints(&[2, -5, 3]);
        let pick = |kind, sort| first_last(kind, sort, values.clone(), keys.clone());

        assert_eq!(pick(AggKind::First, SortType::Ascending), Scalar::str("y"));
        assert_eq!(pick(AggKind::LastByIndex, SortType::Ascending), Scalar::str("z"));
        assert_eq!(pick(AggKind::First, SortType::Descending), Scalar::str("z"));
        assert_eq!(pick(AggKind::LastByIndex, SortType::Descending), Scalar::str("y"));
        assert_eq!(pick(AggKind::First, SortType::AscendingAbs), Scalar::str("x"));
        assert_eq!(pick(AggKind::First, SortType::DescendingAbs), Scalar::str("y"));
        assert_eq!(pick(AggKind::First, SortType::None), Scalar::None);
    }

    #[test]
    fn first_keeps_earliest_member_on_equal_keys() {
        let values = vec![Scalar::str("x"), Scalar::str("y")];
        let keys = ints(&[1, 1]);
        assert_eq!(
            first_last(AggKind::First, SortType::Ascending, values, keys),
            Scalar::str("x")
        );
    }
}
