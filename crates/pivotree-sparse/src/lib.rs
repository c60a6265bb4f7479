//! # pivotree-sparse
//!
//! Incremental sparse pivot tree.
//!
//! Rows are grouped into a tree by a fixed list of pivot columns; every node
//! carries one row of aggregates. Batches of inserts, updates and deletes
//! are folded in without rebuilding:
//!
//! 1. the strand builder ([`strand`]) reduces a batch to signed per-path
//!    contributions,
//! 2. a batch grouping ([`dense`]) lays those out as a small tree,
//! 3. the unifier ([`unify`]) merges it into the persistent [`SparseTree`],
//! 4. pruning ([`prune`]) erases nodes no row reaches any more, and
//! 5. the update engine ([`agg_update`]) moves every touched aggregate row
//!    to its new values.
//!
//! [`PivotContext`] runs the whole sequence per batch.
//!
//! ```ignore
//! let mut store = MemRowStore::new(&schema)?;
//! let mut ctx = PivotContext::new(TreeConfig::new(&["region"]), specs, &schema)?;
//! let snapshot = store.apply_batch(&batch)?;
//! ctx.notify(&snapshot, &store)?;
//! let east = ctx.tree().resolve_path(ROOT_IDX, &[Scalar::str("East")]);
//! ```

pub mod agg_table;
pub mod agg_update;
pub mod aggspec;
pub mod config;
pub mod context;
pub mod dense;
pub mod error;
pub mod node_store;
pub mod pkey_index;
pub mod prune;
pub mod row_store;
pub mod strand;
pub mod traverse;
pub mod tree;
pub mod unify;

/// Node identity. Ids are never reused within a tree's lifetime.
pub type NodeIdx = u32;

/// The synthetic root every tree starts with.
pub const ROOT_IDX: NodeIdx = 0;

/// Parent id recorded on the root.
pub const ROOT_PARENT: NodeIdx = NodeIdx::MAX;

pub use agg_table::AggTable;
pub use aggspec::{AggKind, AggSpec, SortType};
pub use config::{Filter, FilterCombinator, FilterOp, Totals, TreeConfig};
pub use context::PivotContext;
pub use dense::{BatchContext, DenseContext};
pub use error::{Result, TreeError};
pub use node_store::{NodeStore, TreeNode};
pub use pkey_index::{LeafIndex, PkeyIndex};
pub use row_store::{BatchSnapshot, MemRowStore, RowStore};
pub use strand::{DeltaTables, Op, StrandLayout, StrandTables, ValueTransition};
pub use traverse::{Bfs, Dfs};
pub use tree::{Delta, Feature, SparseTree};
pub use unify::UnifyRecord;

pub use pivotree_table::{DType, DataTable, Scalar, Schema};
