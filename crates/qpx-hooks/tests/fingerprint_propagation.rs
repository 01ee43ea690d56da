//! Fingerprint metadata propagation across pipeline stages.
//!
//! These tests drive whole queries through analyze, plan, and the four
//! execution stages and verify the propagation contract: the fingerprint
//! and literal-span metadata set at analysis must be reconstructible at
//! every later stage when fingerprinting is enabled, absence is a fatal
//! consistency violation, and a once-set fingerprint is never overwritten.

use qpx_core::catalog::{Catalog, InMemoryCatalog};
use qpx_core::expr::{BinaryOp, Expr, ScalarValue, TableRef};
use qpx_core::meta::MetaValue;
use qpx_core::pipeline::{Pipeline, PipelineBuilder};
use qpx_core::query::{CommandKind, Query};
use qpx_hooks::fingerprint::{META_LITERAL_SPANS, META_QUERY_FINGERPRINT};
use qpx_hooks::install_default_hooks;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn setup(fingerprinting: bool) -> Pipeline {
    init_tracing();
    let catalog: Arc<dyn Catalog> = Arc::new(InMemoryCatalog::new());
    let mut builder = PipelineBuilder::new(catalog);
    install_default_hooks(&mut builder, Arc::new(AtomicBool::new(fingerprinting)));
    builder.build()
}

/// A two-table join query with one literal predicate.
fn join_query(literal: i64) -> Query {
    let mut query = Query::new(
        CommandKind::Select,
        format!("select t1.a from t1 join t2 on t1.a = t2.a where t1.b = {literal}"),
    );
    query.range_tables.push(TableRef::parse("t1"));
    query.range_tables.push(TableRef::parse("t2"));
    query.targets.push(Expr::column("a"));
    query.quals = Some(Expr::BinaryOp {
        op: BinaryOp::Eq,
        left: Box::new(Expr::column("b")),
        right: Box::new(Expr::literal(
            ScalarValue::Int64(literal),
            47,
            literal.to_string().len() as i32,
        )),
    });
    query
}

#[test]
fn test_enabled_metadata_survives_every_stage() {
    let pipeline = setup(true);
    let mut query = join_query(1);

    // All six stages run; any propagation break would surface as an error.
    pipeline.execute_query(&mut query, 0).unwrap();

    assert!(query.meta.lookup(META_QUERY_FINGERPRINT).is_some());
    let spans = query.meta.lookup(META_LITERAL_SPANS).unwrap();
    let list = qpx_core::location::LocationList::unflatten(spans).unwrap();
    assert_eq!(list.count(), 1);
}

#[test]
fn test_disabled_attaches_nothing_and_runs_clean() {
    let pipeline = setup(false);
    let mut query = join_query(1);

    pipeline.execute_query(&mut query, 0).unwrap();
    assert!(query.meta.is_empty());
}

#[test]
fn test_equal_shape_queries_share_a_fingerprint() {
    let pipeline = setup(true);

    let mut q1 = join_query(1);
    let mut q2 = join_query(982_451_653);
    pipeline.run_analyze(&mut q1).unwrap();
    pipeline.run_analyze(&mut q2).unwrap();

    assert_eq!(
        q1.meta.lookup(META_QUERY_FINGERPRINT),
        q2.meta.lookup(META_QUERY_FINGERPRINT)
    );
}

#[test]
fn test_missing_metadata_at_plan_stage_is_fatal() {
    let pipeline = setup(true);
    // Never analyzed: the metadata the plan stage requires is absent.
    let query = join_query(1);

    let err = pipeline.run_plan(&query).unwrap_err();
    assert!(matches!(
        err,
        qpx_core::error::ExtensionError::MetadataMissing { .. }
    ));
}

#[test]
fn test_malformed_span_payload_is_fatal() {
    let pipeline = setup(true);
    let mut query = join_query(1);
    query.meta.attach(META_QUERY_FINGERPRINT, MetaValue::Int(42), false);
    // A scalar where the flattened list belongs.
    query.meta.attach(META_LITERAL_SPANS, MetaValue::Int(0), false);

    let err = pipeline.run_plan(&query).unwrap_err();
    assert!(matches!(
        err,
        qpx_core::error::ExtensionError::MalformedMetadata { .. }
    ));
}

#[test]
fn test_preset_fingerprint_is_never_overwritten() {
    let pipeline = setup(true);
    let mut query = join_query(1);
    // An earlier interceptor in the chain already fingerprinted the query.
    query.meta.attach(META_QUERY_FINGERPRINT, MetaValue::Int(42), false);
    query.meta.attach(
        META_LITERAL_SPANS,
        qpx_core::location::LocationList::new(0).flatten(),
        false,
    );

    pipeline.execute_query(&mut query, 0).unwrap();

    assert_eq!(
        query.meta.lookup(META_QUERY_FINGERPRINT),
        Some(&MetaValue::Int(42))
    );
}
