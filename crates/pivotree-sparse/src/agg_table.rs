//! Per-node aggregate storage with slot reuse.
//!
//! Rows are addressed by an aggregate row index distinct from node ids. Row 0
//! belongs to the root. Freed rows go on a stack and are handed out again
//! before the table grows; reclaiming a row clears its validity in every
//! column so the next occupant never reads stale values.

use pivotree_table::{DataTable, Schema};
use tracing::trace;

use crate::aggspec::AggSpec;
use crate::error::Result;

/// Initial row capacity.
pub const DEFAULT_CAPACITY: usize = 8;
const GROWTH_FACTOR: f64 = 1.3;

#[derive(Debug)]
pub struct AggTable {
    table: DataTable,
    free_list: Vec<u32>,
    /// Next never-used row.
    next_row: u32,
}

impl AggTable {
    /// Table with one column per distinct spec name; the first spec of a name
    /// decides the column type.
    pub fn for_specs(specs: &[AggSpec], source: &Schema) -> Result<Self> {
        let mut schema = Schema::new();
        for spec in specs {
            if !schema.contains(&spec.name) {
                schema.add_column(spec.name.clone(), spec.output_dtype(source)?)?;
            }
        }
        Ok(Self::new(schema))
    }

    pub fn new(schema: Schema) -> Self {
        Self {
            table: DataTable::new(schema, DEFAULT_CAPACITY),
            free_list: Vec::new(),
            next_row: 1,
        }
    }

    pub fn table(&self) -> &DataTable {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut DataTable {
        &mut self.table
    }

    pub fn schema(&self) -> &Schema {
        self.table.schema()
    }

    /// Allocated rows, live or free.
    pub fn capacity(&self) -> usize {
        self.table.size()
    }

    pub fn free_rows(&self) -> &[u32] {
        &self.free_list
    }

    /// Rows handed out so far (including the root's), minus freed ones.
    pub fn live_rows(&self) -> usize {
        self.next_row as usize - self.free_list.len()
    }

    /// Take a free row, growing storage when none is left.
    pub fn allocate(&mut self) -> u32 {
        if let Some(row) = self.free_list.pop() {
            trace!(row, "reusing aggregate row");
            return row;
        }
        let row = self.next_row;
        self.next_row += 1;

        let capacity = self.table.size();
        if row as usize >= capacity {
            let grown = (capacity as f64 * GROWTH_FACTOR).ceil() as usize;
            let new_capacity = grown.max(row as usize + 1);
            trace!(capacity, new_capacity, "growing aggregate table");
            self.table.extend_to(new_capacity);
        }
        row
    }

    /// Invalidate `rows` in every column and push them onto the free list.
    pub fn reclaim(&mut self, rows: &[u32]) -> Result<()> {
        for &row in rows {
            self.table.invalidate_row(row as usize)?;
        }
        self.free_list.extend_from_slice(rows);
        Ok(())
    }

    /// Drop every value and allocation, keeping the schema.
    pub fn reset(&mut self) {
        let schema = self.table.schema().clone();
        *self = Self::new(schema);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pivotree_table::{DType, Scalar};

    fn table() -> AggTable {
        AggTable::new(Schema::from_columns([("sales", DType::Float64)]).unwrap())
    }

    #[test]
    fn rows_start_after_root_and_grow() {
        let mut aggs = table();
        assert_eq!(aggs.capacity(), DEFAULT_CAPACITY);
        let rows: Vec<u32> = (0..7).map(|_| aggs.allocate()).collect();
        assert_eq!(rows, (1..8).collect::<Vec<_>>());
        assert_eq!(aggs.capacity(), DEFAULT_CAPACITY);

        assert_eq!(aggs.allocate(), 8);
        // ceil(8 * 1.3) = 11
        assert_eq!(aggs.capacity(), 11);
        assert_eq!(aggs.live_rows(), 9);
    }

    #[test]
    fn reclaimed_rows_are_reused_without_residue() {
        let mut aggs = table();
        let row = aggs.allocate();
        aggs.table_mut()
            .set_scalar("sales", row as usize, &Scalar::Float(12.5))
            .unwrap();

        aggs.reclaim(&[row]).unwrap();
        assert_eq!(aggs.free_rows(), &[row]);

        let reused = aggs.allocate();
        assert_eq!(reused, row);
        assert_eq!(
            aggs.table().get_scalar("sales", reused as usize).unwrap(),
            Scalar::None
        );
    }

    #[test]
    fn duplicate_spec_names_share_a_column() {
        let source = Schema::from_columns([("qty", DType::Int64)]).unwrap();
        let specs = vec![
            AggSpec::new("qty", crate::AggKind::Sum, &["qty"]),
            AggSpec::new("qty", crate::AggKind::Count, &[]),
        ];
        let aggs = AggTable::for_specs(&specs, &source).unwrap();
        assert_eq!(aggs.schema().len(), 1);
        assert_eq!(aggs.schema().dtype("qty").unwrap(), DType::Int64);
    }
}
