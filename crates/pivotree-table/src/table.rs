//! `DataTable`: a schema plus one `Column` per field, all of equal length.

use crate::error::{Result, TableError};
use crate::{Column, DType, Scalar, Schema};

#[derive(Debug, Clone, Default)]
pub struct DataTable {
    schema: Schema,
    columns: Vec<Column>,
    size: usize,
}

impl DataTable {
    /// Create a table of `size` rows, all cells invalid.
    pub fn new(schema: Schema, size: usize) -> Self {
        let columns = schema
            .columns()
            .iter()
            .zip(schema.dtypes())
            .map(|(name, dtype)| Column::new(name.clone(), *dtype, size))
            .collect();
        Self {
            schema,
            columns,
            size,
        }
    }

    /// Build a table from named, typed value lists of equal length.
    pub fn from_columns<S: Into<String>>(
        columns: impl IntoIterator<Item = (S, DType, Vec<Scalar>)>,
    ) -> Result<Self> {
        let mut schema = Schema::new();
        let mut built = Vec::new();
        let mut size = None;

        for (name, dtype, values) in columns {
            let name = name.into();
            schema.add_column(name.clone(), dtype)?;
            match size {
                None => size = Some(values.len()),
                Some(expected) if expected != values.len() => {
                    return Err(TableError::ColumnLengthMismatch {
                        column: name,
                        expected,
                        found: values.len(),
                    })
                }
                Some(_) => {}
            }
            let mut column = Column::new(name, dtype, 0);
            for value in &values {
                column.push(value)?;
            }
            built.push(column);
        }

        Ok(Self {
            schema,
            columns: built,
            size: size.unwrap_or(0),
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Number of rows.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.schema.contains(name)
    }

    pub fn column(&self, name: &str) -> Result<&Column> {
        let pos = self
            .schema
            .position(name)
            .ok_or_else(|| TableError::UnknownColumn(name.to_string()))?;
        Ok(&self.columns[pos])
    }

    pub fn column_mut(&mut self, name: &str) -> Result<&mut Column> {
        let pos = self
            .schema
            .position(name)
            .ok_or_else(|| TableError::UnknownColumn(name.to_string()))?;
        Ok(&mut self.columns[pos])
    }

    pub fn column_at(&self, idx: usize) -> Result<&Column> {
        self.columns
            .get(idx)
            .ok_or(TableError::ColumnIndexOutOfRange(idx))
    }

    pub fn column_at_mut(&mut self, idx: usize) -> Result<&mut Column> {
        self.columns
            .get_mut(idx)
            .ok_or(TableError::ColumnIndexOutOfRange(idx))
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn columns_mut(&mut self) -> &mut [Column] {
        &mut self.columns
    }

    pub fn get_scalar(&self, column: &str, row: usize) -> Result<Scalar> {
        Ok(self.column(column)?.get_scalar(row))
    }

    pub fn set_scalar(&mut self, column: &str, row: usize, value: &Scalar) -> Result<()> {
        self.column_mut(column)?.set_scalar(row, value)
    }

    /// Grow every column to `size` rows. Never shrinks.
    pub fn extend_to(&mut self, size: usize) {
        if size <= self.size {
            return;
        }
        for column in &mut self.columns {
            column.resize(size);
        }
        self.size = size;
    }

    /// Append one row given in schema order.
    pub fn push_row(&mut self, row: &[Scalar]) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(TableError::ColumnLengthMismatch {
                column: "<row>".to_string(),
                expected: self.columns.len(),
                found: row.len(),
            });
        }
        for (column, value) in self.columns.iter_mut().zip(row) {
            column.push(value)?;
        }
        self.size += 1;
        Ok(())
    }

    /// Resynchronize the row count after columns were pushed individually.
    ///
    /// Every column must have the same length.
    pub fn sync_size(&mut self) -> Result<()> {
        let Some(first) = self.columns.first() else {
            self.size = 0;
            return Ok(());
        };
        let expected = first.len();
        for column in &self.columns {
            if column.len() != expected {
                return Err(TableError::ColumnLengthMismatch {
                    column: column.name().to_string(),
                    expected,
                    found: column.len(),
                });
            }
        }
        self.size = expected;
        Ok(())
    }

    /// Clear validity of `row` in every column.
    pub fn invalidate_row(&mut self, row: usize) -> Result<()> {
        for column in &mut self.columns {
            column.set_valid(row, false)?;
        }
        Ok(())
    }

    /// One row as scalars in schema order.
    pub fn row(&self, row: usize) -> Vec<Scalar> {
        self.columns.iter().map(|c| c.get_scalar(row)).collect()
    }
}
