//! Typed columns with a validity bitmap.
//!
//! Cells are stored in a typed vector; a parallel roaring bitmap records which
//! rows currently hold a valid value. Reading an invalid (or out of range)
//! cell yields `Scalar::None`, so a slot whose validity was cleared never leaks
//! its previous contents.

use std::sync::Arc;

use roaring::RoaringBitmap;

use crate::error::{Result, TableError};
use crate::{DType, Scalar};

#[derive(Debug, Clone)]
enum ColumnData {
    Bool(Vec<bool>),
    Int8(Vec<i8>),
    Int64(Vec<i64>),
    Float64(Vec<f64>),
    Str(Vec<Arc<str>>),
    F64Pair(Vec<(f64, f64)>),
}

impl ColumnData {
    fn new(dtype: DType, len: usize) -> Self {
        match dtype {
            DType::Bool => ColumnData::Bool(vec![false; len]),
            DType::Int8 => ColumnData::Int8(vec![0; len]),
            DType::Int64 => ColumnData::Int64(vec![0; len]),
            DType::Float64 => ColumnData::Float64(vec![0.0; len]),
            DType::Str => ColumnData::Str(vec![Arc::from(""); len]),
            DType::F64Pair => ColumnData::F64Pair(vec![(0.0, 0.0); len]),
        }
    }

    fn len(&self) -> usize {
        match self {
            ColumnData::Bool(v) => v.len(),
            ColumnData::Int8(v) => v.len(),
            ColumnData::Int64(v) => v.len(),
            ColumnData::Float64(v) => v.len(),
            ColumnData::Str(v) => v.len(),
            ColumnData::F64Pair(v) => v.len(),
        }
    }

    fn resize(&mut self, len: usize) {
        match self {
            ColumnData::Bool(v) => v.resize(len, false),
            ColumnData::Int8(v) => v.resize(len, 0),
            ColumnData::Int64(v) => v.resize(len, 0),
            ColumnData::Float64(v) => v.resize(len, 0.0),
            ColumnData::Str(v) => v.resize(len, Arc::from("")),
            ColumnData::F64Pair(v) => v.resize(len, (0.0, 0.0)),
        }
    }
}

/// A named, typed column.
#[derive(Debug, Clone)]
pub struct Column {
    name: String,
    dtype: DType,
    data: ColumnData,
    valid: RoaringBitmap,
}

impl Column {
    /// Create a column of `len` invalid cells.
    pub fn new(name: impl Into<String>, dtype: DType, len: usize) -> Self {
        Self {
            name: name.into(),
            dtype,
            data: ColumnData::new(dtype, len),
            valid: RoaringBitmap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Grow or shrink to `len` rows. New rows are invalid.
    pub fn resize(&mut self, len: usize) {
        let old = self.len();
        self.data.resize(len);
        if len < old {
            self.valid.remove_range(len as u32..);
        }
    }

    pub fn is_valid(&self, row: usize) -> bool {
        self.valid.contains(row as u32)
    }

    pub fn set_valid(&mut self, row: usize, valid: bool) -> Result<()> {
        self.check_row(row)?;
        if valid {
            self.valid.insert(row as u32);
        } else {
            self.valid.remove(row as u32);
        }
        Ok(())
    }

    /// Mark every row valid.
    pub fn fill_valid(&mut self) {
        let len = self.len() as u32;
        self.valid.insert_range(0..len);
    }

    /// Number of valid cells.
    pub fn valid_count(&self) -> u64 {
        self.valid.len()
    }

    /// Read a cell; invalid or out-of-range cells read as `Scalar::None`.
    pub fn get_scalar(&self, row: usize) -> Scalar {
        if !self.is_valid(row) || row >= self.len() {
            return Scalar::None;
        }
        match &self.data {
            ColumnData::Bool(v) => Scalar::Bool(v[row]),
            ColumnData::Int8(v) => Scalar::Int(i64::from(v[row])),
            ColumnData::Int64(v) => Scalar::Int(v[row]),
            ColumnData::Float64(v) => Scalar::Float(v[row]),
            ColumnData::Str(v) => Scalar::Str(Arc::clone(&v[row])),
            ColumnData::F64Pair(v) => {
                let (num, den) = v[row];
                Scalar::Float(num / den)
            }
        }
    }

    /// Write a cell. `Scalar::None` clears validity and leaves the payload.
    ///
    /// Numeric values coerce between integer and float columns; anything else
    /// that does not match the column type is rejected.
    pub fn set_scalar(&mut self, row: usize, value: &Scalar) -> Result<()> {
        self.check_row(row)?;
        if value.is_none() {
            self.valid.remove(row as u32);
            return Ok(());
        }
        match (&mut self.data, value) {
            (ColumnData::Bool(v), Scalar::Bool(b)) => v[row] = *b,
            (ColumnData::Bool(v), Scalar::Int(i)) => v[row] = *i != 0,
            (ColumnData::Int8(v), Scalar::Int(i)) => v[row] = *i as i8,
            (ColumnData::Int8(v), Scalar::Bool(b)) => v[row] = i8::from(*b),
            (ColumnData::Int8(v), Scalar::Float(f)) => v[row] = *f as i8,
            (ColumnData::Int64(v), Scalar::Int(i)) => v[row] = *i,
            (ColumnData::Int64(v), Scalar::Bool(b)) => v[row] = i64::from(*b),
            (ColumnData::Int64(v), Scalar::Float(f)) => v[row] = *f as i64,
            (ColumnData::Float64(v), Scalar::Float(f)) => v[row] = *f,
            (ColumnData::Float64(v), Scalar::Int(i)) => v[row] = *i as f64,
            (ColumnData::Float64(v), Scalar::Bool(b)) => v[row] = f64::from(u8::from(*b)),
            (ColumnData::Str(v), Scalar::Str(s)) => v[row] = Arc::clone(s),
            _ => {
                return Err(TableError::TypeMismatch {
                    column: self.name.clone(),
                    expected: self.dtype,
                    found: format!("{value:?}"),
                })
            }
        }
        self.valid.insert(row as u32);
        Ok(())
    }

    /// Append a cell, growing the column by one row.
    pub fn push(&mut self, value: &Scalar) -> Result<()> {
        let row = self.len();
        self.data.resize(row + 1);
        if let Err(err) = self.set_scalar(row, value) {
            self.data.resize(row);
            return Err(err);
        }
        Ok(())
    }

    /// Raw numerator/denominator of a pair cell, if valid.
    pub fn get_pair(&self, row: usize) -> Option<(f64, f64)> {
        if !self.is_valid(row) {
            return None;
        }
        match &self.data {
            ColumnData::F64Pair(v) => v.get(row).copied(),
            _ => None,
        }
    }

    /// Store a numerator/denominator pair without touching validity.
    pub fn set_pair(&mut self, row: usize, pair: (f64, f64)) -> Result<()> {
        self.check_row(row)?;
        match &mut self.data {
            ColumnData::F64Pair(v) => {
                v[row] = pair;
                Ok(())
            }
            _ => Err(TableError::TypeMismatch {
                column: self.name.clone(),
                expected: self.dtype,
                found: "f64 pair".to_string(),
            }),
        }
    }

    fn check_row(&self, row: usize) -> Result<()> {
        if row >= self.len() {
            return Err(TableError::RowOutOfBounds {
                column: self.name.clone(),
                row,
                len: self.len(),
            });
        }
        Ok(())
    }
}
