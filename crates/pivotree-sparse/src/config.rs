//! Pivot configuration: row pivots, sort-by overrides, filters, totals.

use std::cmp::Ordering;
use std::collections::HashMap;

use anyhow::{Context, Result};
use pivotree_table::{DataTable, Scalar};
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};

pub const DEFAULT_GRAND_AGG_LABEL: &str = "Grand Aggregate";

/// Where totals rows are placed relative to their children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Totals {
    #[default]
    Before,
    After,
    Hidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "is null")]
    IsNull,
    #[serde(rename = "is not null")]
    IsNotNull,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not in")]
    NotIn,
    #[serde(rename = "begins with")]
    BeginsWith,
    #[serde(rename = "ends with")]
    EndsWith,
    #[serde(rename = "contains")]
    Contains,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterCombinator {
    #[default]
    And,
    Or,
}

/// A single column predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    /// Operand(s). Unary ops ignore it; `in`/`not in` use every entry, the
    /// rest use the first.
    #[serde(default)]
    pub values: Vec<Scalar>,
}

impl Filter {
    pub fn new(column: impl Into<String>, op: FilterOp, value: impl Into<Scalar>) -> Self {
        Self {
            column: column.into(),
            op,
            values: vec![value.into()],
        }
    }

    pub fn unary(column: impl Into<String>, op: FilterOp) -> Self {
        Self {
            column: column.into(),
            op,
            values: Vec::new(),
        }
    }

    pub fn any_of(column: impl Into<String>, op: FilterOp, values: Vec<Scalar>) -> Self {
        Self {
            column: column.into(),
            op,
            values,
        }
    }

    /// Evaluate the predicate. Invalid cells fail every operator except
    /// `is null`.
    pub fn matches(&self, cell: &Scalar) -> bool {
        let operand = self.values.first().unwrap_or(&Scalar::None);
        match self.op {
            FilterOp::IsNull => cell.is_none(),
            FilterOp::IsNotNull => cell.is_valid(),
            _ if cell.is_none() => false,
            FilterOp::Eq => compare(cell, operand) == Some(Ordering::Equal),
            FilterOp::Ne => compare(cell, operand) != Some(Ordering::Equal),
            FilterOp::Lt => compare(cell, operand) == Some(Ordering::Less),
            FilterOp::Le => matches!(
                compare(cell, operand),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOp::Gt => compare(cell, operand) == Some(Ordering::Greater),
            FilterOp::Ge => matches!(
                compare(cell, operand),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOp::In => self
                .values
                .iter()
                .any(|v| compare(cell, v) == Some(Ordering::Equal)),
            FilterOp::NotIn => !self
                .values
                .iter()
                .any(|v| compare(cell, v) == Some(Ordering::Equal)),
            FilterOp::BeginsWith => str_pair(cell, operand).is_some_and(|(c, o)| c.starts_with(o)),
            FilterOp::EndsWith => str_pair(cell, operand).is_some_and(|(c, o)| c.ends_with(o)),
            FilterOp::Contains => str_pair(cell, operand).is_some_and(|(c, o)| c.contains(o)),
        }
    }
}

/// Numbers compare by value across int/float; everything else by the scalar
/// total order.
fn compare(cell: &Scalar, operand: &Scalar) -> Option<Ordering> {
    let numeric = |s: &Scalar| matches!(s, Scalar::Int(_) | Scalar::Float(_) | Scalar::Bool(_));
    if numeric(cell) && numeric(operand) {
        return cell.to_f64().partial_cmp(&operand.to_f64());
    }
    Some(cell.cmp(operand))
}

fn str_pair<'a>(cell: &'a Scalar, operand: &'a Scalar) -> Option<(&'a str, &'a str)> {
    Some((cell.as_str()?, operand.as_str()?))
}

/// Everything a tree needs to know about the view it materializes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TreeConfig {
    /// Row pivot columns, outermost first.
    #[serde(default)]
    pub row_pivots: Vec<String>,
    /// `pivot column -> column whose values order that level`.
    #[serde(default)]
    pub sort_by: HashMap<String, String>,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub combinator: FilterCombinator,
    #[serde(default)]
    pub totals: Totals,
    /// Label of the root node.
    #[serde(default)]
    pub grand_agg_label: Option<String>,
}

impl TreeConfig {
    pub fn new(row_pivots: &[&str]) -> Self {
        Self {
            row_pivots: row_pivots.iter().map(|p| p.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn with_sort_by(mut self, pivot: &str, sort_column: &str) -> Self {
        self.sort_by
            .insert(pivot.to_string(), sort_column.to_string());
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("failed to parse tree config")
    }

    /// Column that orders the given pivot level; defaults to the pivot.
    pub fn get_sort_by<'a>(&'a self, pivot: &'a str) -> &'a str {
        self.sort_by.get(pivot).map_or(pivot, String::as_str)
    }

    pub fn has_filters(&self) -> bool {
        !self.filters.is_empty()
    }

    pub fn grand_agg_label(&self) -> &str {
        self.grand_agg_label
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_GRAND_AGG_LABEL)
    }

    /// Rows of `table` passing every filter (or any, under `or`).
    ///
    /// A filter on a column the table lacks fails every row.
    pub fn filter_mask(&self, table: &DataTable) -> RoaringBitmap {
        let size = table.size() as u32;
        let mut mask = RoaringBitmap::new();
        if !self.has_filters() {
            mask.insert_range(0..size);
            return mask;
        }

        let columns: Vec<_> = self
            .filters
            .iter()
            .map(|f| table.column(&f.column).ok())
            .collect();

        for row in 0..size {
            let mut results = self.filters.iter().zip(&columns).map(|(f, col)| {
                col.map(|c| f.matches(&c.get_scalar(row as usize)))
                    .unwrap_or(false)
            });
            let pass = match self.combinator {
                FilterCombinator::And => results.all(|r| r),
                FilterCombinator::Or => results.any(|r| r),
            };
            if pass {
                mask.insert(row);
            }
        }
        mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pivotree_table::DType;

    fn table() -> DataTable {
        DataTable::from_columns([
            (
                "region",
                DType::Str,
                vec![Scalar::str("East"), Scalar::str("West"), Scalar::None],
            ),
            (
                "sales",
                DType::Float64,
                vec![Scalar::Float(10.0), Scalar::Float(3.0), Scalar::Float(8.0)],
            ),
        ])
        .unwrap()
    }

    #[test]
    fn and_filters_intersect() {
        let config = TreeConfig::new(&["region"])
            .with_filter(Filter::new("sales", FilterOp::Gt, 5.0))
            .with_filter(Filter::unary("region", FilterOp::IsNotNull));
        let mask = config.filter_mask(&table());
        assert_eq!(mask.iter().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn or_filters_union() {
        let mut config = TreeConfig::new(&["region"])
            .with_filter(Filter::new("region", FilterOp::BeginsWith, "W"))
            .with_filter(Filter::unary("region", FilterOp::IsNull));
        config.combinator = FilterCombinator::Or;
        let mask = config.filter_mask(&table());
        assert_eq!(mask.iter().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn sort_by_defaults_to_pivot() {
        let config = TreeConfig::new(&["region"]).with_sort_by("region", "rank");
        assert_eq!(config.get_sort_by("region"), "rank");
        assert_eq!(config.get_sort_by("product"), "product");
        assert_eq!(config.grand_agg_label(), DEFAULT_GRAND_AGG_LABEL);
    }

    #[test]
    fn config_loads_from_json() {
        let config = TreeConfig::from_json(
            r#"{
                "row_pivots": ["region"],
                "filters": [{"column": "region", "op": "in", "values": ["East", "North"]}],
                "totals": "after"
            }"#,
        )
        .unwrap();
        assert_eq!(config.row_pivots, vec!["region".to_string()]);
        assert_eq!(config.totals, Totals::After);
        assert_eq!(config.filter_mask(&table()).len(), 1);
    }
}
