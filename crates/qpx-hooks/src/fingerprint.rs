//! # Query Fingerprint Propagator
//!
//! Computes a structural fingerprint ("jumble") of each query at analysis
//! time -- a hash over the query's shape that deliberately ignores literal
//! values, so `... WHERE a = 1` and `... WHERE a = 42` fingerprint
//! identically -- together with the list of literal spans usable for
//! redaction. Both are attached to the query through the metadata sidecar
//! and must survive to every later stage.
//!
//! The whole propagator is gated by a process-wide switch read once per
//! stage invocation; disabled, every handler is a pure pass-through.
//!
//! ## Propagation contract
//!
//! The analyze handler attaches with `replace_on_duplicate = false`: if an
//! earlier interceptor in the chain already fingerprinted the query, the
//! value is left untouched. At planning and at each execution sub-stage the
//! metadata is fetched and the location list reconstructed from its
//! flattened encoding. Absence at any of those stages means another
//! interceptor broke the propagation guarantee -- that is a fatal
//! consistency violation, not something to skip over.

use qpx_core::error::ExtensionError;
use qpx_core::exec::ExecDesc;
use qpx_core::expr::Expr;
use qpx_core::location::LocationList;
use qpx_core::meta::{MetaMap, MetaValue};
use qpx_core::pipeline::{
    AnalyzeHook, ExecBeginHook, ExecEndHook, ExecFinishHook, ExecStepHook, PipelineBuilder,
    PipelineStage, PlanContext, PlanHook,
};
use qpx_core::plan::PlannedStatement;
use qpx_core::query::Query;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Reserved sidecar key for the query fingerprint (scalar).
pub const META_QUERY_FINGERPRINT: &str = "qpx:query_fingerprint";
/// Reserved sidecar key for the flattened literal location list.
pub const META_LITERAL_SPANS: &str = "qpx:literal_spans";

/// Compute the structural fingerprint and literal location list of a query.
///
/// The hash covers the command kind, range tables, join type, and the shape
/// of every predicate/target expression. Literal *values* are excluded; each
/// literal contributes only a marker to the hash and its span to the
/// location list, in source order.
pub fn compute_fingerprint(query: &Query) -> (u64, LocationList) {
    let mut hasher = DefaultHasher::new();
    let mut locations = LocationList::new(query.highest_extern_param_id);

    query.command.hash(&mut hasher);
    for table in &query.range_tables {
        table.schema.hash(&mut hasher);
        table.name.hash(&mut hasher);
    }
    query.join_type.hash(&mut hasher);
    if let Some(quals) = &query.quals {
        jumble_expr(&mut hasher, &mut locations, quals);
    }
    0xffu8.hash(&mut hasher);
    for target in &query.targets {
        jumble_expr(&mut hasher, &mut locations, target);
    }

    (hasher.finish(), locations)
}

fn jumble_expr(hasher: &mut DefaultHasher, locations: &mut LocationList, expr: &Expr) {
    match expr {
        Expr::Column(c) => {
            1u8.hash(hasher);
            c.table.hash(hasher);
            c.name.hash(hasher);
        }
        Expr::RowIdentity => 2u8.hash(hasher),
        Expr::ExternParam(id) => {
            3u8.hash(hasher);
            id.hash(hasher);
            locations.highest_extern_param_id =
                locations.highest_extern_param_id.max(*id as i64);
        }
        Expr::Literal { span, .. } => {
            // The value is deliberately not hashed.
            4u8.hash(hasher);
            locations.push(span.position, span.length);
        }
        Expr::BinaryOp { op, left, right } => {
            5u8.hash(hasher);
            op.hash(hasher);
            jumble_expr(hasher, locations, left);
            jumble_expr(hasher, locations, right);
        }
        Expr::UnaryOp { op, operand } => {
            6u8.hash(hasher);
            op.hash(hasher);
            jumble_expr(hasher, locations, operand);
        }
        Expr::Function { name, args } => {
            7u8.hash(hasher);
            name.hash(hasher);
            for arg in args {
                jumble_expr(hasher, locations, arg);
            }
        }
        Expr::And(exprs) => {
            8u8.hash(hasher);
            exprs.len().hash(hasher);
            for e in exprs {
                jumble_expr(hasher, locations, e);
            }
        }
        Expr::Or(exprs) => {
            9u8.hash(hasher);
            exprs.len().hash(hasher);
            for e in exprs {
                jumble_expr(hasher, locations, e);
            }
        }
    }
}

/// Fetch and reconstruct the fingerprint metadata at a post-analysis stage.
fn reconstruct(meta: &MetaMap, stage: PipelineStage) -> Result<(u64, LocationList), ExtensionError> {
    let fingerprint = meta
        .lookup(META_QUERY_FINGERPRINT)
        .ok_or(ExtensionError::MetadataMissing {
            stage,
            key: META_QUERY_FINGERPRINT,
        })?
        .as_int()
        .ok_or(ExtensionError::MalformedMetadata {
            stage,
            key: META_QUERY_FINGERPRINT,
        })?;
    let spans = meta
        .lookup(META_LITERAL_SPANS)
        .ok_or(ExtensionError::MetadataMissing {
            stage,
            key: META_LITERAL_SPANS,
        })?;
    // Reconstruction from the flattened encoding is mandatory before use.
    let locations =
        LocationList::unflatten(spans).ok_or(ExtensionError::MalformedMetadata {
            stage,
            key: META_LITERAL_SPANS,
        })?;
    trace!(
        stage = %stage,
        fingerprint = fingerprint as u64,
        literal_spans = locations.count(),
        "fingerprint metadata reconstructed"
    );
    Ok((fingerprint as u64, locations))
}

struct FingerprintAnalyze {
    enabled: Arc<AtomicBool>,
    next: Arc<dyn AnalyzeHook>,
}

impl AnalyzeHook for FingerprintAnalyze {
    fn analyze(&self, query: &mut Query) -> Result<(), ExtensionError> {
        if self.enabled.load(Ordering::Relaxed)
            && query.meta.lookup(META_QUERY_FINGERPRINT).is_none()
        {
            let (fingerprint, locations) = compute_fingerprint(query);
            // A once-set fingerprint is never overwritten later in the chain.
            query
                .meta
                .attach(META_QUERY_FINGERPRINT, MetaValue::Int(fingerprint as i64), false);
            query.meta.attach(META_LITERAL_SPANS, locations.flatten(), false);
            debug!(
                fingerprint,
                literal_spans = locations.count(),
                "query fingerprinted"
            );
        }
        self.next.analyze(query)
    }
}

struct FingerprintPlan {
    enabled: Arc<AtomicBool>,
    next: Arc<dyn PlanHook>,
}

impl PlanHook for FingerprintPlan {
    fn plan(
        &self,
        query: &Query,
        ctx: &PlanContext<'_>,
    ) -> Result<PlannedStatement, ExtensionError> {
        let planned = self.next.plan(query, ctx)?;
        if self.enabled.load(Ordering::Relaxed) {
            reconstruct(&planned.meta, PipelineStage::Plan)?;
        }
        Ok(planned)
    }
}

struct FingerprintExecBegin {
    enabled: Arc<AtomicBool>,
    next: Arc<dyn ExecBeginHook>,
}

impl ExecBeginHook for FingerprintExecBegin {
    fn exec_begin(&self, desc: &mut ExecDesc) -> Result<(), ExtensionError> {
        if self.enabled.load(Ordering::Relaxed) {
            reconstruct(&desc.planned.meta, PipelineStage::ExecBegin)?;
        }
        self.next.exec_begin(desc)
    }
}

struct FingerprintExecStep {
    enabled: Arc<AtomicBool>,
    next: Arc<dyn ExecStepHook>,
}

impl ExecStepHook for FingerprintExecStep {
    fn exec_step(&self, desc: &mut ExecDesc, count: u64) -> Result<(), ExtensionError> {
        if self.enabled.load(Ordering::Relaxed) {
            reconstruct(&desc.planned.meta, PipelineStage::ExecStep)?;
        }
        self.next.exec_step(desc, count)
    }
}

struct FingerprintExecFinish {
    enabled: Arc<AtomicBool>,
    next: Arc<dyn ExecFinishHook>,
}

impl ExecFinishHook for FingerprintExecFinish {
    fn exec_finish(&self, desc: &mut ExecDesc) -> Result<(), ExtensionError> {
        if self.enabled.load(Ordering::Relaxed) {
            reconstruct(&desc.planned.meta, PipelineStage::ExecFinish)?;
        }
        self.next.exec_finish(desc)
    }
}

struct FingerprintExecEnd {
    enabled: Arc<AtomicBool>,
    next: Arc<dyn ExecEndHook>,
}

impl ExecEndHook for FingerprintExecEnd {
    fn exec_end(&self, desc: &mut ExecDesc) -> Result<(), ExtensionError> {
        if self.enabled.load(Ordering::Relaxed) {
            reconstruct(&desc.planned.meta, PipelineStage::ExecEnd)?;
        }
        self.next.exec_end(desc)
    }
}

/// Install the propagator on the analyze, plan, and execution stages.
pub fn install(builder: &mut PipelineBuilder, enabled: Arc<AtomicBool>) {
    let e = Arc::clone(&enabled);
    builder.install_analyze(move |next| Arc::new(FingerprintAnalyze { enabled: e, next }));
    let e = Arc::clone(&enabled);
    builder.install_plan(move |next| Arc::new(FingerprintPlan { enabled: e, next }));
    let e = Arc::clone(&enabled);
    builder.install_exec_begin(move |next| Arc::new(FingerprintExecBegin { enabled: e, next }));
    let e = Arc::clone(&enabled);
    builder.install_exec_step(move |next| Arc::new(FingerprintExecStep { enabled: e, next }));
    let e = Arc::clone(&enabled);
    builder.install_exec_finish(move |next| Arc::new(FingerprintExecFinish { enabled: e, next }));
    builder.install_exec_end(move |next| Arc::new(FingerprintExecEnd { enabled, next }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use qpx_core::expr::{BinaryOp, ScalarValue};
    use qpx_core::query::CommandKind;

    fn query_with_literal(value: i64, position: i32) -> Query {
        let mut query = Query::new(CommandKind::Select, format!("select * where a = {value}"));
        query.range_tables.push(qpx_core::expr::TableRef::parse("t"));
        query.quals = Some(Expr::BinaryOp {
            op: BinaryOp::Eq,
            left: Box::new(Expr::column("a")),
            right: Box::new(Expr::literal(
                ScalarValue::Int64(value),
                position,
                value.to_string().len() as i32,
            )),
        });
        query
    }

    #[test]
    fn test_same_shape_different_literals_fingerprint_equal() {
        let (fp1, loc1) = compute_fingerprint(&query_with_literal(1, 18));
        let (fp2, loc2) = compute_fingerprint(&query_with_literal(94507, 18));
        assert_eq!(fp1, fp2);
        assert_eq!(loc1.count(), 1);
        assert_eq!(loc2.count(), 1);
    }

    #[test]
    fn test_different_shape_fingerprints_differ() {
        let eq = query_with_literal(1, 18);
        let mut lt = query_with_literal(1, 18);
        lt.quals = Some(Expr::BinaryOp {
            op: BinaryOp::Lt,
            left: Box::new(Expr::column("a")),
            right: Box::new(Expr::literal(ScalarValue::Int64(1), 18, 1)),
        });
        assert_ne!(compute_fingerprint(&eq).0, compute_fingerprint(&lt).0);
    }

    #[test]
    fn test_extern_params_raise_leading_scalar() {
        let mut query = Query::new(CommandKind::Select, "select * where a = $3");
        query.quals = Some(Expr::BinaryOp {
            op: BinaryOp::Eq,
            left: Box::new(Expr::column("a")),
            right: Box::new(Expr::ExternParam(3)),
        });
        let (_, locations) = compute_fingerprint(&query);
        assert_eq!(locations.highest_extern_param_id, 3);
    }
}
