//! # Deferred Statistics Queue
//!
//! Statistics cannot be synthesized while the index that justifies them is
//! still being created -- the creating statement holds the catalog mid-change.
//! Instead, the creation is *observed* and the work deferred: an
//! object-creation hook collects candidate identifiers, and a statement
//! hook drains them once the enclosing statement has fully completed.
//!
//! The queue moves through `Idle -> Collecting -> Draining -> Idle` within
//! a single statement. It is session-scoped: collection and draining never
//! interleave, and only the draining pass removes entries -- unconditionally,
//! so the queue is empty after every drain.
//!
//! Draining revalidates each candidate against concurrent invalidation: an
//! identifier whose object vanished, or now names something other than an
//! index, is silently discarded. The worker is best-effort by design; no
//! candidate is mandatory and no failure aborts the pass.

use crate::stats_builder;
use qpx_core::catalog::{Catalog, ObjectId};
use qpx_core::error::ExtensionError;
use qpx_core::pipeline::{
    ObjectClass, ObjectCreated, ObjectCreatedHook, PipelineBuilder, ProcessingMode, StatementContext,
    StatementHook,
};
use qpx_core::query::Statement;
use std::sync::{Arc, Mutex};
use tracing::{debug, trace};

/// Session-scoped ordered set of candidate object identifiers.
pub struct DeferredStatsQueue {
    candidates: Mutex<Vec<ObjectId>>,
}

impl DeferredStatsQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            candidates: Mutex::new(Vec::new()),
        })
    }

    /// Append a candidate, keeping insertion order and uniqueness.
    fn remember(&self, id: ObjectId) {
        if let Ok(mut candidates) = self.candidates.lock() {
            if !candidates.contains(&id) {
                candidates.push(id);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.candidates.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Process and discard every collected candidate. The queue is empty
    /// when this returns, regardless of individual outcomes.
    pub fn drain(&self, catalog: &dyn Catalog) {
        let candidates = match self.candidates.lock() {
            Ok(mut c) => std::mem::take(&mut *c),
            Err(_) => return,
        };
        for id in candidates {
            // Revalidate: the object may have vanished since collection.
            let Some(rel) = catalog.try_open(id) else {
                trace!(%id, "deferred candidate vanished, skipping");
                continue;
            };
            if !rel.kind.is_index() {
                trace!(%id, kind = %rel.kind, "deferred candidate is not an index, skipping");
                continue;
            }
            // Best-effort: the synthesizer's outcome does not matter here.
            let created = stats_builder::synthesize(catalog, &rel);
            debug!(index = %rel.name, created, "deferred statistics pass");
        }
    }
}

/// Object-creation observer feeding the queue.
struct CollectCreatedRelations {
    queue: Arc<DeferredStatsQueue>,
    next: Arc<dyn ObjectCreatedHook>,
}

impl ObjectCreatedHook for CollectCreatedRelations {
    fn object_created(&self, event: &ObjectCreated, ctx: &StatementContext<'_>) {
        self.next.object_created(event, ctx);

        // Only top-level relation creations in normal interactive
        // processing qualify; sub-parts of composite creations carry a
        // non-zero sub identifier and are someone else's event.
        if ctx.mode != ProcessingMode::Normal
            || event.class != ObjectClass::Relation
            || event.sub_id != 0
        {
            return;
        }
        self.queue.remember(event.object);
    }
}

/// Statement-completion worker draining the queue.
struct DrainAfterStatement {
    queue: Arc<DeferredStatsQueue>,
    next: Arc<dyn StatementHook>,
}

impl StatementHook for DrainAfterStatement {
    fn process_statement(
        &self,
        stmt: &Statement,
        ctx: &StatementContext<'_>,
    ) -> Result<(), ExtensionError> {
        let result = self.next.process_statement(stmt, ctx);
        // Drain happens win or lose; a failed statement must not leave
        // candidates behind for the next one.
        self.queue.drain(ctx.catalog);
        result
    }
}

/// Install the collector and the drain worker. Returns the shared queue so
/// callers can inspect it.
pub fn install(builder: &mut PipelineBuilder) -> Arc<DeferredStatsQueue> {
    let queue = DeferredStatsQueue::new();
    let collector_queue = Arc::clone(&queue);
    builder.install_object_created(move |next| {
        Arc::new(CollectCreatedRelations {
            queue: collector_queue,
            next,
        })
    });
    let drain_queue = Arc::clone(&queue);
    builder.install_statement(move |next| {
        Arc::new(DrainAfterStatement {
            queue: drain_queue,
            next,
        })
    });
    queue
}

#[cfg(test)]
mod tests {
    use super::*;
    use qpx_core::catalog::{ColumnDef, IndexDef, IndexKeyDef, InMemoryCatalog, StorageKind};
    use qpx_core::expr::TableRef;

    fn seeded_catalog() -> (Arc<InMemoryCatalog>, ObjectId) {
        let catalog = Arc::new(InMemoryCatalog::new());
        let table = TableRef::parse("t");
        catalog
            .create_table(
                &table,
                &[ColumnDef::new("a"), ColumnDef::new("b")],
                StorageKind::Ordinary,
            )
            .unwrap();
        let index = catalog
            .create_index(&IndexDef {
                name: TableRef::parse("idx"),
                table,
                key_columns: vec![
                    IndexKeyDef::Column("a".into()),
                    IndexKeyDef::Column("b".into()),
                ],
                include: vec![],
                partitioned: false,
            })
            .unwrap();
        (catalog, index)
    }

    #[test]
    fn test_drain_synthesizes_and_empties_queue() {
        let (catalog, index) = seeded_catalog();
        let queue = DeferredStatsQueue::new();
        queue.remember(index);

        queue.drain(catalog.as_ref());
        assert!(queue.is_empty());
        assert_eq!(catalog.statistics_count(), 1);
    }

    #[test]
    fn test_vanished_candidate_is_skipped_silently() {
        let (catalog, index) = seeded_catalog();
        let queue = DeferredStatsQueue::new();
        queue.remember(index);
        queue.remember(ObjectId(9999));

        queue.drain(catalog.as_ref());
        assert!(queue.is_empty());
        assert_eq!(catalog.statistics_count(), 1);
    }

    #[test]
    fn test_non_index_candidate_is_skipped() {
        let (catalog, _) = seeded_catalog();
        let table_id = catalog.relation_id(&TableRef::parse("t")).unwrap();
        let queue = DeferredStatsQueue::new();
        queue.remember(table_id);

        queue.drain(catalog.as_ref());
        assert!(queue.is_empty());
        assert_eq!(catalog.statistics_count(), 0);
    }

    #[test]
    fn test_remember_deduplicates_but_keeps_order() {
        let queue = DeferredStatsQueue::new();
        queue.remember(ObjectId(5));
        queue.remember(ObjectId(3));
        queue.remember(ObjectId(5));
        assert_eq!(queue.len(), 2);
    }
}
