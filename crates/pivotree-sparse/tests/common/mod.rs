#![allow(dead_code)]

use pivotree_sparse::{
    AggSpec, DType, DataTable, MemRowStore, NodeIdx, PivotContext, Scalar, Schema, TreeConfig,
    ROOT_IDX,
};

/// One source row: key, region, product, sales, qty.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub pkey: i64,
    pub region: &'static str,
    pub product: &'static str,
    pub sales: f64,
    pub qty: i64,
}

pub fn row(pkey: i64, region: &'static str, product: &'static str, sales: f64, qty: i64) -> Row {
    Row {
        pkey,
        region,
        product,
        sales,
        qty,
    }
}

#[derive(Debug, Clone)]
pub enum Change {
    Upsert(Row),
    Delete(i64),
}

pub fn schema() -> Schema {
    Schema::from_columns([
        ("psp_pkey", DType::Int64),
        ("psp_op", DType::Int8),
        ("region", DType::Str),
        ("product", DType::Str),
        ("sales", DType::Float64),
        ("qty", DType::Int64),
    ])
    .unwrap()
}

pub fn batch(changes: &[Change]) -> DataTable {
    let mut table = DataTable::new(schema(), 0);
    for change in changes {
        let cells = match change {
            Change::Upsert(r) => vec![
                Scalar::Int(r.pkey),
                Scalar::Int(0),
                Scalar::str(r.region),
                Scalar::str(r.product),
                Scalar::Float(r.sales),
                Scalar::Int(r.qty),
            ],
            Change::Delete(pkey) => vec![
                Scalar::Int(*pkey),
                Scalar::Int(1),
                Scalar::None,
                Scalar::None,
                Scalar::None,
                Scalar::None,
            ],
        };
        table.push_row(&cells).unwrap();
    }
    table
}

pub fn upserts(rows: &[Row]) -> Vec<Change> {
    rows.iter().cloned().map(Change::Upsert).collect()
}

/// A pivot context fed through an in-memory row store.
pub struct Harness {
    pub store: MemRowStore,
    pub ctx: PivotContext,
}

impl Harness {
    pub fn new(config: TreeConfig, specs: Vec<AggSpec>) -> Self {
        let schema = schema();
        Self {
            store: MemRowStore::new(&schema).unwrap(),
            ctx: PivotContext::new(config, specs, &schema).unwrap(),
        }
    }

    pub fn by_region(specs: Vec<AggSpec>) -> Self {
        Self::new(TreeConfig::new(&["region"]), specs)
    }

    pub fn apply(&mut self, changes: &[Change]) {
        let snapshot = self.store.apply_batch(&batch(changes)).unwrap();
        self.ctx.notify(&snapshot, &self.store).unwrap();
    }

    pub fn node(&self, path: &[&str]) -> Option<NodeIdx> {
        let path: Vec<Scalar> = path.iter().map(|p| Scalar::str(p)).collect();
        self.ctx.tree().resolve_path(ROOT_IDX, &path)
    }

    /// Aggregate `column` at `path`; panics if the node doesn't exist.
    pub fn agg(&self, path: &[&str], column: &str) -> Scalar {
        let idx = self
            .node(path)
            .unwrap_or_else(|| panic!("no node at {path:?}"));
        self.ctx.tree().aggregate_by_name(idx, column).unwrap()
    }

    pub fn f64(&self, path: &[&str], column: &str) -> f64 {
        match self.agg(path, column) {
            Scalar::Float(v) => v,
            Scalar::Int(v) => v as f64,
            other => panic!("expected a number at {path:?}/{column}, got {other:?}"),
        }
    }
}
