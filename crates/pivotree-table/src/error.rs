use thiserror::Error;

use crate::DType;

pub type Result<T> = std::result::Result<T, TableError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TableError {
    #[error("unknown column `{0}`")]
    UnknownColumn(String),
    #[error("column index {0} out of range")]
    ColumnIndexOutOfRange(usize),
    #[error("type mismatch in column `{column}`: expected {expected:?}, got {found}")]
    TypeMismatch {
        column: String,
        expected: DType,
        found: String,
    },
    #[error("row {row} out of bounds for column `{column}` (len {len})")]
    RowOutOfBounds {
        column: String,
        row: usize,
        len: usize,
    },
    #[error("column `{column}` has {found} rows, expected {expected}")]
    ColumnLengthMismatch {
        column: String,
        expected: usize,
        found: usize,
    },
    #[error("duplicate column `{0}`")]
    DuplicateColumn(String),
}
