//! Pivotree columnar primitives
//!
//! The storage layer the sparse pivot tree is built on:
//!
//! 1. **Scalars**: a dynamically typed cell value with a total order, so values
//!    can key hash indexes and sort deterministically
//! 2. **Symbol interning**: one shared `Arc<str>` per distinct string
//! 3. **Columns**: typed vectors with a roaring validity bitmap; invalid cells
//!    read as `Scalar::None`
//! 4. **Tables**: a schema plus equal-length columns, addressed by name or
//!    position

pub mod column;
pub mod error;
pub mod scalar;
pub mod schema;
pub mod symbol;
pub mod table;

pub use column::Column;
pub use error::{Result, TableError};
pub use scalar::Scalar;
pub use schema::{DType, Schema};
pub use symbol::SymbolTable;
pub use table::DataTable;
