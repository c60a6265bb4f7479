//! Aggregate column specifications.

use std::fmt;

use pivotree_table::{DType, Schema};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TreeError};

/// Every aggregation the update engine knows how to maintain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggKind {
    Sum,
    PctSumParent,
    PctSumGrandTotal,
    Count,
    Mean,
    WeightedMean,
    Unique,
    Or,
    Any,
    Median,
    Join,
    ScaledDiv,
    ScaledAdd,
    ScaledMul,
    Dominant,
    First,
    LastByIndex,
    And,
    LastValue,
    HighWaterMark,
    LowWaterMark,
    SumNotNull,
    SumAbs,
    AbsSum,
    Mul,
    DistinctCount,
    DistinctLeaf,
    UdfCombiner,
    UdfReducer,
}

impl AggKind {
    /// Derived arithmetically from two other aggregate columns.
    pub const fn is_scaled(self) -> bool {
        matches!(
            self,
            AggKind::ScaledDiv | AggKind::ScaledAdd | AggKind::ScaledMul
        )
    }

    /// Maintained by adding the batch delta to the previous value.
    pub const fn is_sum_like(self) -> bool {
        matches!(
            self,
            AggKind::Sum | AggKind::PctSumParent | AggKind::PctSumGrandTotal
        )
    }

    /// Needs current (not delta) dependency values carried through the
    /// strand table.
    pub const fn is_non_delta(self) -> bool {
        matches!(
            self,
            AggKind::First
                | AggKind::LastByIndex
                | AggKind::LastValue
                | AggKind::HighWaterMark
                | AggKind::LowWaterMark
                | AggKind::Unique
                | AggKind::DistinctLeaf
        )
    }

    /// Number of dependency columns the kind reads from the row store.
    const fn arity(self) -> usize {
        match self {
            AggKind::Count
            | AggKind::ScaledDiv
            | AggKind::ScaledAdd
            | AggKind::ScaledMul
            | AggKind::UdfCombiner
            | AggKind::UdfReducer => 0,
            AggKind::WeightedMean | AggKind::First | AggKind::LastByIndex => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for AggKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Ordering used by first / last-by-index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortType {
    #[default]
    Ascending,
    Descending,
    AscendingAbs,
    DescendingAbs,
    None,
}

impl SortType {
    pub const fn is_abs(self) -> bool {
        matches!(self, SortType::AscendingAbs | SortType::DescendingAbs)
    }
}

/// One aggregate output column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggSpec {
    pub name: String,
    pub kind: AggKind,
    /// Row-store columns the aggregate reads, in kind-specific order
    /// (value first, then weight or sort key).
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub sort_type: SortType,
    /// Scaled kinds: operand aggregate column indices and weights.
    #[serde(default)]
    pub agg_one_idx: usize,
    #[serde(default)]
    pub agg_two_idx: usize,
    #[serde(default = "unit_weight")]
    pub agg_one_weight: f64,
    #[serde(default = "unit_weight")]
    pub agg_two_weight: f64,
}

const fn unit_weight() -> f64 {
    1.0
}

impl AggSpec {
    pub fn new(name: impl Into<String>, kind: AggKind, dependencies: &[&str]) -> Self {
        Self {
            name: name.into(),
            kind,
            dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
            sort_type: SortType::default(),
            agg_one_idx: 0,
            agg_two_idx: 0,
            agg_one_weight: 1.0,
            agg_two_weight: 1.0,
        }
    }

    /// A scaled aggregate combining columns `one` and `two` of the same row.
    pub fn scaled(
        name: impl Into<String>,
        kind: AggKind,
        (one, one_weight): (usize, f64),
        (two, two_weight): (usize, f64),
    ) -> Self {
        Self {
            agg_one_idx: one,
            agg_two_idx: two,
            agg_one_weight: one_weight,
            agg_two_weight: two_weight,
            ..Self::new(name, kind, &[])
        }
    }

    pub fn with_sort_type(mut self, sort_type: SortType) -> Self {
        self.sort_type = sort_type;
        self
    }

    pub fn dependency(&self, n: usize) -> Result<&str> {
        self.dependencies
            .get(n)
            .map(String::as_str)
            .ok_or_else(|| self.unsupported(format!("missing dependency #{n}")))
    }

    /// Type of the output column given the source schema.
    pub fn output_dtype(&self, schema: &Schema) -> Result<DType> {
        let dep_dtype = |n: usize| -> Result<DType> {
            let dep = self.dependency(n)?;
            schema
                .dtype(dep)
                .map_err(|_| TreeError::MissingColumn(dep.to_string()))
        };

        Ok(match self.kind {
            AggKind::Sum | AggKind::PctSumParent | AggKind::PctSumGrandTotal => {
                if self.kind == AggKind::Sum && dep_dtype(0)?.is_integral() {
                    DType::Int64
                } else {
                    DType::Float64
                }
            }
            AggKind::SumNotNull | AggKind::SumAbs | AggKind::AbsSum | AggKind::Mul => {
                if dep_dtype(0)?.is_integral() {
                    DType::Int64
                } else {
                    DType::Float64
                }
            }
            AggKind::Count | AggKind::DistinctCount => DType::Int64,
            AggKind::Mean | AggKind::WeightedMean => DType::F64Pair,
            AggKind::ScaledDiv
            | AggKind::ScaledAdd
            | AggKind::ScaledMul
            | AggKind::UdfCombiner
            | AggKind::UdfReducer => DType::Float64,
            AggKind::Join => DType::Str,
            AggKind::And => DType::Bool,
            AggKind::Unique
            | AggKind::Or
            | AggKind::Any
            | AggKind::Median
            | AggKind::Dominant
            | AggKind::First
            | AggKind::LastByIndex
            | AggKind::LastValue
            | AggKind::HighWaterMark
            | AggKind::LowWaterMark
            | AggKind::DistinctLeaf => match dep_dtype(0)? {
                DType::Int8 => DType::Int64,
                DType::F64Pair => {
                    return Err(self.unsupported("pair-typed dependency".to_string()))
                }
                other => other,
            },
        })
    }

    /// Check the spec against the source schema and its sibling specs.
    pub fn validate(&self, schema: &Schema, ncols: usize) -> Result<()> {
        let arity = self.kind.arity();
        if self.dependencies.len() < arity {
            return Err(self.unsupported(format!(
                "needs {arity} dependency column(s), got {}",
                self.dependencies.len()
            )));
        }
        for dep in &self.dependencies {
            if !schema.contains(dep) {
                return Err(TreeError::MissingColumn(dep.clone()));
            }
        }
        if self.kind.is_scaled() && (self.agg_one_idx >= ncols || self.agg_two_idx >= ncols) {
            return Err(self.unsupported(format!(
                "operand columns ({}, {}) out of range for {ncols} aggregates",
                self.agg_one_idx, self.agg_two_idx
            )));
        }
        self.output_dtype(schema).map(|_| ())
    }

    fn unsupported(&self, reason: String) -> TreeError {
        TreeError::UnsupportedAggregate {
            column: self.name.clone(),
            kind: self.kind.to_string(),
            reason,
        }
    }
}
