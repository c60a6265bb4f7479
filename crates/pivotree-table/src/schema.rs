//! Column names and types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TableError};

/// Storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DType {
    Bool,
    Int8,
    Int64,
    Float64,
    Str,
    /// Numerator/denominator pair backing mean aggregates.
    F64Pair,
}

impl DType {
    pub const fn is_numeric(self) -> bool {
        matches!(self, DType::Int8 | DType::Int64 | DType::Float64)
    }

    pub const fn is_integral(self) -> bool {
        matches!(self, DType::Int8 | DType::Int64)
    }
}

/// Ordered list of `(name, dtype)` pairs with name lookup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<String>,
    dtypes: Vec<DType>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a schema from parallel name/type lists.
    pub fn from_columns<S: Into<String>>(
        columns: impl IntoIterator<Item = (S, DType)>,
    ) -> Result<Self> {
        let mut schema = Schema::new();
        for (name, dtype) in columns {
            schema.add_column(name, dtype)?;
        }
        Ok(schema)
    }

    pub fn add_column(&mut self, name: impl Into<String>, dtype: DType) -> Result<()> {
        let name = name.into();
        if self.position(&name).is_some() {
            return Err(TableError::DuplicateColumn(name));
        }
        self.index.insert(name.clone(), self.columns.len());
        self.columns.push(name);
        self.dtypes.push(dtype);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn dtypes(&self) -> &[DType] {
        &self.dtypes
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        if self.index.len() == self.columns.len() {
            return self.index.get(name).copied();
        }
        // Deserialized schemas skip the index.
        self.columns.iter().position(|c| c == name)
    }

    pub fn dtype(&self, name: &str) -> Result<DType> {
        self.position(name)
            .map(|pos| self.dtypes[pos])
            .ok_or_else(|| TableError::UnknownColumn(name.to_string()))
    }
}
