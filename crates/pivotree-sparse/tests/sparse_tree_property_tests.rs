mod common;

use std::collections::{BTreeMap, BTreeSet};

use common::{Change, Harness, Row};
use pivotree_sparse::{
    AggKind, AggSpec, Filter, FilterCombinator, FilterOp, Scalar, TreeConfig, ROOT_IDX,
};
use proptest::prelude::*;

const REGIONS: [&str; 3] = ["A", "B", "C"];
const PRODUCTS: [&str; 2] = ["x", "y"];

fn change_strategy() -> impl Strategy<Value = Change> {
    prop_oneof![
        1 => (0i64..12).prop_map(Change::Delete),
        3 => (0i64..12, 0usize..3, 0usize..2, -20i64..20, 0i64..5).prop_map(
            |(pkey, r, p, sales, qty)| Change::Upsert(common::row(
                pkey,
                REGIONS[r],
                PRODUCTS[p],
                sales as f64,
                qty
            ))
        ),
    ]
}

fn batches_strategy() -> impl Strategy<Value = Vec<Vec<Change>>> {
    prop::collection::vec(prop::collection::vec(change_strategy(), 0..10), 1..8)
}

/// Tree options exercised alongside the plain grouping.
#[derive(Debug, Clone, Copy)]
struct Setup {
    /// Keep rows with positive sales. The `or` branch on `qty is null`
    /// never holds for stored rows, only for the empty previous row of a
    /// new key.
    filtered: bool,
    /// Order both levels by `qty`.
    sorted: bool,
}

impl Setup {
    fn admits(&self, row: &Row) -> bool {
        !self.filtered || row.sales > 0.0
    }
}

fn setup_strategy() -> impl Strategy<Value = Setup> {
    (any::<bool>(), any::<bool>()).prop_map(|(filtered, sorted)| Setup { filtered, sorted })
}

fn harness(setup: Setup) -> Harness {
    let mut config = TreeConfig::new(&["region", "product"]);
    if setup.filtered {
        config = config
            .with_filter(Filter::new("sales", FilterOp::Gt, 0.0))
            .with_filter(Filter::unary("qty", FilterOp::IsNull));
        config.combinator = FilterCombinator::Or;
    }
    if setup.sorted {
        config = config
            .with_sort_by("region", "qty")
            .with_sort_by("product", "qty");
    }
    Harness::new(
        config,
        vec![
            AggSpec::new("sales", AggKind::Sum, &["sales"]),
            AggSpec::new("qty", AggKind::Sum, &["qty"]),
            AggSpec::new("n", AggKind::Count, &[]),
        ],
    )
}

/// Expected (count, sales, qty, pkeys) per group path.
#[derive(Debug, Default, PartialEq)]
struct Group {
    count: i64,
    sales: f64,
    qty: i64,
    pkeys: BTreeSet<Scalar>,
}

fn naive_groups(
    model: &BTreeMap<i64, Row>,
    setup: Setup,
) -> BTreeMap<Vec<&'static str>, Group> {
    let mut groups: BTreeMap<Vec<&'static str>, Group> = BTreeMap::new();
    for row in model.values().filter(|r| setup.admits(r)) {
        for path in [vec![row.region], vec![row.region, row.product]] {
            let g = groups.entry(path).or_default();
            g.count += 1;
            g.sales += row.sales;
            g.qty += row.qty;
            g.pkeys.insert(Scalar::Int(row.pkey));
        }
    }
    groups
}

fn observed(h: &Harness, path: &[&str]) -> Group {
    let tree = h.ctx.tree();
    let idx = h.node(path).unwrap();
    Group {
        count: h.agg(path, "n").as_int().unwrap(),
        sales: h.f64(path, "sales"),
        qty: h.agg(path, "qty").as_int().unwrap(),
        pkeys: tree.pkeys(idx).unwrap().into_iter().collect(),
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 96,
        failure_persistence: None,
        ..ProptestConfig::default()
    })]

    #[test]
    fn incremental_tree_matches_naive_regrouping(
        setup in setup_strategy(),
        batches in batches_strategy(),
    ) {
        let mut h = harness(setup);
        let mut model: BTreeMap<i64, Row> = BTreeMap::new();

        for changes in &batches {
            h.apply(changes);
            for change in changes {
                match change {
                    Change::Upsert(row) => {
                        model.insert(row.pkey, row.clone());
                    }
                    Change::Delete(pkey) => {
                        model.remove(pkey);
                    }
                }
            }

            let expected = naive_groups(&model, setup);
            let admitted: Vec<&Row> = model.values().filter(|r| setup.admits(r)).collect();
            for (path, group) in &expected {
                prop_assert!(h.node(path).is_some(), "missing node {:?}", path);
                prop_assert_eq!(&observed(&h, path), group);
            }

            let tree = h.ctx.tree();
            prop_assert_eq!(tree.size(), 1 + expected.len());
            prop_assert_eq!(h.agg(&[], "n"), Scalar::Int(admitted.len() as i64));
            prop_assert_eq!(tree.pkeys(ROOT_IDX).unwrap().len(), admitted.len());
            if !admitted.is_empty() {
                let total: f64 = admitted.iter().map(|r| r.sales).sum();
                prop_assert_eq!(h.f64(&[], "sales"), total);
            }

            for idx in tree.dfs() {
                let node = tree.node(idx).unwrap();
                prop_assert!(node.nstrands > 0);
                if idx != ROOT_IDX {
                    prop_assert_eq!(tree.depth(node.parent).unwrap() + 1, node.depth);
                }
                if node.depth == 2 {
                    prop_assert_eq!(tree.pkeys(idx).unwrap().len() as i64, node.nstrands);
                }
                if node.depth == 1 {
                    let mut leaves = tree.leaves(idx).unwrap();
                    leaves.sort_unstable();
                    prop_assert_eq!(leaves, tree.children(idx));
                }
            }
        }

        let before = h.ctx.tree().size();
        let tree = h.ctx.tree_mut();
        prop_assert!(tree.zero_strands().is_empty());
        tree.drop_zero_strands().unwrap();
        prop_assert_eq!(tree.size(), before);
    }
}
