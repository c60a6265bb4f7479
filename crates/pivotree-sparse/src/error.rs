use pivotree_table::TableError;
use thiserror::Error;

use crate::NodeIdx;

pub type Result<T> = std::result::Result<T, TreeError>;

/// Structural failures of a tree.
///
/// These signal a corrupted tree or an invalid configuration, never a data
/// condition. A batch entry point that returns one leaves the tree in an
/// unspecified state; the instance must be discarded, not retried.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TreeError {
    #[error("node {0} not found")]
    NodeNotFound(NodeIdx),
    #[error("node {0} already exists")]
    DuplicateNode(NodeIdx),
    #[error("parent {parent} already has a child with value `{value}`")]
    DuplicateSibling { parent: NodeIdx, value: String },
    #[error("unsupported aggregate `{kind}` for column `{column}`: {reason}")]
    UnsupportedAggregate {
        column: String,
        kind: String,
        reason: String,
    },
    #[error("missing column `{0}`")]
    MissingColumn(String),
    #[error("invalid value transition code {0}")]
    InvalidTransition(i64),
    #[error("invalid op code {0}")]
    InvalidOp(i64),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("formatting failed")]
    Format(#[from] std::fmt::Error),
}
