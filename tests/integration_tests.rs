//! Integration tests for the complete pivotree pipeline
//!
//! These tests drive the whole stack the way an embedding host would:
//! - JSON configuration → TreeConfig / AggSpec
//! - flattened batch → row store snapshot → strand table → tree
//! - tree → traversal and aggregate queries
//!
//! Run with: cargo test --test integration_tests

use pivotree_sparse::{
    AggSpec, DType, DataTable, MemRowStore, PivotContext, Scalar, Schema, SparseTree, TreeConfig,
    ROOT_IDX,
};
use pivotree_table::Column;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

const CONFIG: &str = r#"{
    "row_pivots": ["region", "city"],
    "sort_by": {"city": "rank"},
    "grand_agg_label": "All"
}"#;

const SPECS: &str = r#"[
    {"name": "sales", "kind": "sum", "dependencies": ["sales"]},
    {"name": "share", "kind": "pct_sum_grand_total", "dependencies": ["sales"]},
    {"name": "n", "kind": "count"},
    {"name": "avg", "kind": "mean", "dependencies": ["sales"]}
]"#;

fn schema() -> Schema {
    Schema::from_columns([
        ("psp_pkey", DType::Int64),
        ("psp_op", DType::Int8),
        ("region", DType::Str),
        ("city", DType::Str),
        ("rank", DType::Int64),
        ("sales", DType::Float64),
    ])
    .unwrap()
}

/// (pkey, op, region, city, rank, sales)
fn batch(rows: &[(i64, i64, &str, &str, i64, f64)]) -> DataTable {
    let mut table = DataTable::new(schema(), 0);
    for &(pkey, op, region, city, rank, sales) in rows {
        table
            .push_row(&[
                Scalar::Int(pkey),
                Scalar::Int(op),
                Scalar::str(region),
                Scalar::str(city),
                Scalar::Int(rank),
                Scalar::Float(sales),
            ])
            .unwrap();
    }
    table
}

struct Pipeline {
    store: MemRowStore,
    ctx: PivotContext,
}

impl Pipeline {
    fn from_json() -> Self {
        let config = TreeConfig::from_json(CONFIG).expect("config should parse");
        let specs: Vec<AggSpec> = serde_json::from_str(SPECS).expect("specs should parse");
        Self {
            store: MemRowStore::new(&schema()).unwrap(),
            ctx: PivotContext::new(config, specs, &schema()).unwrap(),
        }
    }

    fn apply(&mut self, rows: &[(i64, i64, &str, &str, i64, f64)]) {
        let snapshot = self.store.apply_batch(&batch(rows)).unwrap();
        self.ctx.notify(&snapshot, &self.store).unwrap();
    }

    fn tree(&self) -> &SparseTree {
        self.ctx.tree()
    }

    fn at(&self, path: &[&str]) -> u32 {
        let path: Vec<Scalar> = path.iter().map(|p| Scalar::str(p)).collect();
        self.tree()
            .resolve_path(ROOT_IDX, &path)
            .unwrap_or_else(|| panic!("no node at {path:?}"))
    }

    fn agg(&self, path: &[&str], column: &str) -> Scalar {
        self.tree().aggregate_by_name(self.at(path), column).unwrap()
    }
}

fn seed() -> Pipeline {
    let mut p = Pipeline::from_json();
    p.apply(&[
        (1, 0, "East", "Boston", 2, 30.0),
        (2, 0, "East", "Albany", 1, 10.0),
        (3, 0, "West", "Denver", 5, 60.0),
    ]);
    p
}

// ============================================================================
// Configuration and shape
// ============================================================================

#[test]
fn json_configured_tree_groups_and_labels() {
    init_tracing();
    let p = seed();
    let tree = p.tree();

    assert_eq!(tree.size(), 6);
    assert_eq!(tree.value(ROOT_IDX).unwrap(), &Scalar::str("All"));
    assert_eq!(tree.last_level(), 2);

    let boston = p.at(&["East", "Boston"]);
    assert!(tree.is_leaf(boston).unwrap());
    assert_eq!(
        tree.sortby_path(boston).unwrap(),
        vec![Scalar::str("East"), Scalar::Int(2)]
    );
    assert_eq!(tree.sibling_idx(p.at(&["East", "Albany"])).unwrap(), 0);
    assert_eq!(tree.drd_indices(ROOT_IDX, 2).unwrap().len(), 3);
    assert_eq!(tree.leaves(p.at(&["East"])).unwrap().len(), 2);

    let dump = tree.pretty().unwrap();
    assert!(dump.contains("<East, Boston>"), "{dump}");
    assert!(tree.repr().contains("nodes=6"));
}

#[test]
fn aggregates_across_levels() {
    init_tracing();
    let p = seed();

    assert_eq!(p.agg(&["East"], "sales"), Scalar::Float(40.0));
    assert_eq!(p.agg(&[], "sales"), Scalar::Float(100.0));
    assert_eq!(p.agg(&["East"], "share"), Scalar::Float(40.0));
    assert_eq!(p.agg(&[], "share"), Scalar::Float(100.0));
    assert_eq!(p.agg(&[], "n"), Scalar::Int(3));
    assert_eq!(p.agg(&["East"], "n"), Scalar::Int(2));
    assert_eq!(p.agg(&["East"], "avg"), Scalar::Float(20.0));
}

// ============================================================================
// Incremental updates
// ============================================================================

#[test]
fn updates_moves_and_deletes_flow_through() {
    init_tracing();
    let mut p = seed();
    p.ctx.tree_mut().set_deltas_enabled(true);
    let east = p.at(&["East"]);

    p.apply(&[(1, 0, "East", "Boston", 2, 35.0)]);
    assert!(p.tree().deltas().iter().any(|d| d.node == east
        && d.column == 0
        && d.old == Scalar::Float(40.0)
        && d.new == Scalar::Float(45.0)));
    assert!(p.tree().has_deltas());
    p.ctx.tree_mut().clear_deltas();

    // Albany moves West and re-ranks
    p.apply(&[(2, 0, "West", "Albany", 9, 10.0)]);
    assert_eq!(p.agg(&["East"], "n"), Scalar::Int(1));
    assert_eq!(p.agg(&["West"], "sales"), Scalar::Float(70.0));
    let albany = p.at(&["West", "Albany"]);
    assert_eq!(p.tree().sort_value(albany).unwrap(), &Scalar::Int(9));

    p.apply(&[(1, 1, "", "", 0, 0.0)]);
    let tree = p.tree();
    let east_gone = tree.resolve_child(ROOT_IDX, &Scalar::str("East")).is_none();
    assert!(east_gone);
    assert_eq!(tree.size(), 4);
    assert_eq!(tree.num_children(ROOT_IDX), 1);
    assert_eq!(p.agg(&[], "sales"), Scalar::Float(70.0));
    assert_eq!(p.ctx.batches(), 4);
}

#[test]
fn aggregate_rows_are_recycled() {
    init_tracing();
    let mut p = seed();
    let capacity = p.tree().agg_storage().capacity();

    p.apply(&[(3, 1, "", "", 0, 0.0)]);
    assert_eq!(p.tree().agg_storage().free_rows().len(), 2);

    p.apply(&[(4, 0, "North", "Fargo", 1, 5.0)]);
    assert!(p.tree().agg_storage().free_rows().is_empty());
    assert_eq!(p.tree().agg_storage().capacity(), capacity);
    assert_eq!(p.agg(&["North", "Fargo"], "sales"), Scalar::Float(5.0));
    assert_eq!(p.agg(&["North"], "avg"), Scalar::Float(5.0));
}

#[test]
fn clear_then_reload_from_flattened_rows() {
    init_tracing();
    let mut p = seed();
    p.ctx.tree_mut().clear().unwrap();
    assert_eq!(p.tree().size(), 1);
    assert_eq!(p.tree().aggregate(ROOT_IDX, 0).unwrap(), Scalar::None);

    let everything = batch(&[
        (1, 0, "East", "Boston", 2, 30.0),
        (2, 0, "East", "Albany", 1, 10.0),
        (3, 0, "West", "Denver", 5, 60.0),
    ]);
    p.ctx.notify_initial(&everything, &p.store).unwrap();
    assert_eq!(p.tree().size(), 6);
    assert_eq!(p.agg(&[], "sales"), Scalar::Float(100.0));
    assert_eq!(p.agg(&[], "n"), Scalar::Int(3));
}

#[test]
fn aggregate_table_columns_follow_specs() {
    let p = seed();
    let table = p.tree().aggtable();
    let names: Vec<&str> = table.columns().iter().map(Column::name).collect();
    assert_eq!(names, vec!["sales", "share", "n", "avg"]);
}
