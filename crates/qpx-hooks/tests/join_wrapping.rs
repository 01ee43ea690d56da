//! Wrapper substitution observed through whole-pipeline planning.
//!
//! These tests let the host's default planner generate its join candidates,
//! run the join-candidate chain over them, and verify that the wrapper both
//! wins plan selection (equal cost to the hash join it replaced, cheaper
//! than the fallback) and produces byte-identical results when executed.

use qpx_core::catalog::{Catalog, InMemoryCatalog};
use qpx_core::exec::Row;
use qpx_core::expr::{BinaryOp, ColumnRef, Expr, JoinType, ScalarValue, TableRef};
use qpx_core::pipeline::{Pipeline, PipelineBuilder};
use qpx_core::plan::{Cost, FragmentKind, JoinRel, PathFragment};
use qpx_core::query::{CommandKind, Query};
use qpx_hooks::wrapper::{self, is_wrapper};
use std::sync::Arc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn setup() -> Pipeline {
    init_tracing();
    let catalog: Arc<dyn Catalog> = Arc::new(InMemoryCatalog::new());
    let mut builder = PipelineBuilder::new(catalog);
    wrapper::install(&mut builder);
    builder.build()
}

fn join_query() -> Query {
    let mut query = Query::new(CommandKind::Select, "select a from t1 join t2 on a = b");
    query.range_tables.push(TableRef::parse("t1"));
    query.range_tables.push(TableRef::parse("t2"));
    query.join_type = Some(JoinType::Inner);
    query.targets.push(Expr::column("a"));
    query.quals = Some(Expr::BinaryOp {
        op: BinaryOp::Eq,
        left: Box::new(Expr::column("a")),
        right: Box::new(Expr::column("b")),
    });
    query
}

fn int_row(values: &[i64]) -> Row {
    Row(values.iter().map(|v| ScalarValue::Int64(*v)).collect())
}

fn values_fragment(rows: Vec<Row>) -> PathFragment {
    PathFragment {
        kind: FragmentKind::Values { rows },
        cost: Cost::zero(),
        rows: 0.0,
        parameterized: false,
        output: vec![],
        children: vec![],
    }
}

#[test]
fn test_planner_selects_the_wrapper() {
    let pipeline = setup();
    let planned = pipeline.run_plan(&join_query()).unwrap();

    // The wrapper inherited the hash join's cost, which beats the
    // nested-loop fallback, so final selection lands on it.
    assert!(is_wrapper(&planned.root));
    assert_eq!(planned.root.children.len(), 1);
    assert!(planned.root.children[0].is_hash_join());
}

#[test]
fn test_wrapped_plan_executes_to_completion() {
    let pipeline = setup();
    let mut query = join_query();
    // Scans over the in-memory host produce no rows; what matters is that
    // all four execution stages drive the wrapper without protocol errors.
    let rows = pipeline.execute_query(&mut query, 0).unwrap();
    assert!(rows.is_empty());
}

#[test]
fn test_wrapped_join_produces_the_same_rows_as_the_original() {
    let pipeline = setup();

    let outer = vec![int_row(&[1, 10]), int_row(&[2, 20]), int_row(&[3, 30])];
    let inner = vec![int_row(&[2, 200]), int_row(&[3, 300])];
    let hash_join = PathFragment {
        kind: FragmentKind::HashJoin { condition: None },
        cost: Cost::new(250.0),
        rows: 2.0,
        parameterized: false,
        output: vec![ColumnRef::named("a")],
        children: vec![
            values_fragment(outer.clone()),
            values_fragment(inner.clone()),
        ],
    };

    let run = |fragment: &PathFragment| -> Vec<Row> {
        let mut exec = fragment.create_exec().unwrap();
        exec.begin().unwrap();
        let mut out = Vec::new();
        while let Some(row) = exec.step().unwrap() {
            out.push(row);
        }
        exec.end().unwrap();
        out
    };
    let expected = run(&hash_join);
    assert!(!expected.is_empty());

    let mut rel = JoinRel {
        join_type: JoinType::Inner,
        is_dummy: false,
        targets: vec![Expr::column("a")],
        output: vec![ColumnRef::named("a")],
        candidates: vec![hash_join],
    };
    pipeline.run_join_candidates(&mut rel);

    assert_eq!(rel.candidates.len(), 1);
    assert!(is_wrapper(&rel.candidates[0]));
    assert_eq!(run(&rel.candidates[0]), expected);
}
