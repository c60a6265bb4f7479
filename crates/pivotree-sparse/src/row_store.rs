//! Canonical current values per primary key.
//!
//! The tree never owns source rows. Aggregates that cannot be maintained
//! incrementally re-read their members' current values through `RowStore`.

use ahash::AHashMap;
use pivotree_table::{DType, DataTable, Scalar, Schema};
use tracing::debug;

use crate::error::{Result, TreeError};
use crate::strand::{DeltaTables, Op, ValueTransition, PSP_EXISTED, PSP_OP, PSP_PKEY};

/// Read access to current row values, keyed by primary key.
pub trait RowStore {
    fn has_column(&self, column: &str) -> bool;

    /// Current value of `column` for `pkey`; unknown keys read as `None`.
    fn read_by_pkey(&self, column: &str, pkey: &Scalar) -> Result<Scalar>;

    fn read_column(&self, column: &str, pkeys: &[Scalar]) -> Result<Vec<Scalar>> {
        pkeys
            .iter()
            .map(|pkey| self.read_by_pkey(column, pkey))
            .collect()
    }

    /// Like `read_column`, dropping invalid values.
    fn read_column_valid(&self, column: &str, pkeys: &[Scalar]) -> Result<Vec<Scalar>> {
        let mut values = self.read_column(column, pkeys)?;
        values.retain(Scalar::is_valid);
        Ok(values)
    }

    /// Whether every key holds the same value, and that value. An empty key
    /// set is unique with value `None`.
    fn is_unique(&self, pkeys: &[Scalar], column: &str) -> Result<(bool, Scalar)> {
        let mut values = self.read_column(column, pkeys)?.into_iter();
        let Some(first) = values.next() else {
            return Ok((true, Scalar::None));
        };
        let unique = values.all(|v| v == first);
        Ok((unique, first))
    }

    /// Hand every member value to `f` at once.
    fn reduce<T, F>(&self, pkeys: &[Scalar], column: &str, f: F) -> Result<T>
    where
        F: FnOnce(Vec<Scalar>) -> T,
    {
        Ok(f(self.read_column(column, pkeys)?))
    }

    /// Feed member values to `f` until it reports completion. Returns whether
    /// it did.
    fn apply<F>(&self, pkeys: &[Scalar], column: &str, out: &mut Scalar, mut f: F) -> Result<bool>
    where
        F: FnMut(&Scalar, &mut Scalar) -> bool,
    {
        for pkey in pkeys {
            if f(&self.read_by_pkey(column, pkey)?, out) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Everything the delta-aware strand builder needs about one applied batch.
///
/// All tables are row-aligned with `flattened`, which is the input batch
/// (minus deletes of unknown keys) plus a `psp_existed` column.
#[derive(Debug, Clone)]
pub struct BatchSnapshot {
    pub flattened: DataTable,
    pub prev: DataTable,
    pub current: DataTable,
    pub delta: DataTable,
    pub transitions: DataTable,
}

impl BatchSnapshot {
    pub fn deltas(&self) -> DeltaTables<'_> {
        DeltaTables {
            delta: &self.delta,
            prev: &self.prev,
            current: &self.current,
            transitions: &self.transitions,
        }
    }
}

/// In-memory row store.
#[derive(Debug, Default)]
pub struct MemRowStore {
    schema: Schema,
    rows: AHashMap<Scalar, Vec<Scalar>>,
}

impl MemRowStore {
    /// Store holding the data columns of `schema`; `psp_*` columns are
    /// skipped.
    pub fn new(schema: &Schema) -> Result<Self> {
        let mut data = Schema::new();
        for (name, dtype) in schema.columns().iter().zip(schema.dtypes()) {
            if !name.starts_with("psp_") {
                data.add_column(name.clone(), *dtype)?;
            }
        }
        Ok(Self {
            schema: data,
            rows: AHashMap::new(),
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn contains(&self, pkey: &Scalar) -> bool {
        self.rows.contains_key(pkey)
    }

    /// Apply a flattened batch (`psp_pkey`, optional `psp_op`, data columns)
    /// in row order and describe what changed.
    ///
    /// Data columns missing from the batch keep their previous values.
    pub fn apply_batch(&mut self, batch: &DataTable) -> Result<BatchSnapshot> {
        let pkey_col = batch
            .column(PSP_PKEY)
            .map_err(|_| TreeError::MissingColumn(PSP_PKEY.to_string()))?;
        let op_col = batch.column(PSP_OP).ok();
        let data_cols: Vec<_> = self
            .schema
            .columns()
            .iter()
            .map(|name| batch.column(name).ok())
            .collect();

        let mut flat_schema = batch.schema().clone();
        if !flat_schema.contains(PSP_EXISTED) {
            flat_schema.add_column(PSP_EXISTED, DType::Bool)?;
        }
        let existed_pos = flat_schema.position(PSP_EXISTED);
        let transition_schema = Schema::from_columns(
            self.schema.columns().iter().map(|c| (c.clone(), DType::Int8)),
        )?;

        let mut snapshot = BatchSnapshot {
            flattened: DataTable::new(flat_schema, 0),
            prev: DataTable::new(self.schema.clone(), 0),
            current: DataTable::new(self.schema.clone(), 0),
            delta: DataTable::new(self.schema.clone(), 0),
            transitions: DataTable::new(transition_schema, 0),
        };

        let ncols = self.schema.len();
        let mut deletes = 0usize;
        for row in 0..batch.size() {
            let pkey = pkey_col.get_scalar(row);
            let op = match op_col {
                Some(col) => Op::from_scalar(&col.get_scalar(row))?,
                None => Op::Insert,
            };
            let prev = self.rows.get(&pkey).cloned();
            let existed = prev.is_some();

            let (current, delta, transitions): (Vec<Scalar>, Vec<Scalar>, Vec<ValueTransition>) =
                match (op, prev.as_ref()) {
                (Op::Delete, None) => continue,
                (Op::Delete, Some(prev)) => {
                    self.rows.remove(&pkey);
                    deletes += 1;
                    (
                        prev.clone(),
                        prev.iter().map(Scalar::negate).collect(),
                        vec![ValueTransition::NEQ_TDF; ncols],
                    )
                }
                (Op::Insert, None) => {
                    let current: Vec<Scalar> = data_cols
                        .iter()
                        .map(|c| c.map_or(Scalar::None, |c| c.get_scalar(row)))
                        .collect();
                    self.rows.insert(pkey.clone(), current.clone());
                    (
                        current.clone(),
                        current,
                        vec![ValueTransition::NEQ_FT; ncols],
                    )
                }
                (Op::Insert, Some(prev)) => {
                    let current: Vec<Scalar> = data_cols
                        .iter()
                        .zip(prev)
                        .map(|(c, old)| c.map_or_else(|| old.clone(), |c| c.get_scalar(row)))
                        .collect();
                    let delta = current.iter().zip(prev).map(|(c, p)| c.sub(p)).collect();
                    let transitions = prev
                        .iter()
                        .zip(&current)
                        .map(|(p, c)| update_transition(p, c))
                        .collect();
                    self.rows.insert(pkey.clone(), current.clone());
                    (current, delta, transitions)
                }
            };

            let prev_row = prev.unwrap_or_else(|| vec![Scalar::None; ncols]);
            let mut flat_row = batch.row(row);
            match existed_pos {
                Some(pos) if pos < flat_row.len() => flat_row[pos] = Scalar::Bool(existed),
                _ => flat_row.push(Scalar::Bool(existed)),
            }
            let codes: Vec<Scalar> = transitions
                .iter()
                .map(|t: &ValueTransition| Scalar::Int(i64::from(t.code())))
                .collect();

            snapshot.flattened.push_row(&flat_row)?;
            snapshot.prev.push_row(&prev_row)?;
            snapshot.current.push_row(&current)?;
            snapshot.delta.push_row(&delta)?;
            snapshot.transitions.push_row(&codes)?;
        }

        debug!(
            rows = batch.size(),
            applied = snapshot.flattened.size(),
            deletes,
            keys = self.rows.len(),
            "applied batch to row store"
        );
        Ok(snapshot)
    }
}

fn update_transition(prev: &Scalar, current: &Scalar) -> ValueTransition {
    match (prev.is_valid(), current.is_valid()) {
        (true, true) if prev == current => ValueTransition::EQ_TT,
        (true, true) => ValueTransition::NEQ_TT,
        (false, true) => ValueTransition::NVEQ_FT,
        (true, false) => ValueTransition::NEQ_TF,
        (false, false) => ValueTransition::EQ_FF,
    }
}

impl RowStore for MemRowStore {
    fn has_column(&self, column: &str) -> bool {
        self.schema.contains(column)
    }

    fn read_by_pkey(&self, column: &str, pkey: &Scalar) -> Result<Scalar> {
        let pos = self
            .schema
            .position(column)
            .ok_or_else(|| TreeError::MissingColumn(column.to_string()))?;
        Ok(self
            .rows
            .get(pkey)
            .and_then(|row| row.get(pos))
            .cloned()
            .unwrap_or_default())
    }
}
