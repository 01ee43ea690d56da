//! # Statistics Synthesizer
//!
//! Derives a multivariate extended-statistics specification from a
//! multi-column index and registers it with the host catalog. A composite
//! index is strong evidence that its key columns are queried together, so
//! the columns are worth covering with ndistinct/dependencies/mcv
//! statistics -- something the host never does on its own.
//!
//! The synthesizer is invoked from two places with different precondition
//! handling: the deferred worker ([`crate::deferred`]) pre-filters
//! non-index candidates, while the direct entry point
//! [`build_extended_statistic`] raises a typed error for them.

use qpx_core::catalog::{Catalog, DependencyEdge, DependencyKind, Relation, RelationKind, StorageKind};
use qpx_core::error::ExtensionError;
use qpx_core::expr::TableRef;
use qpx_core::stats::{StatKind, StatisticsSpec, StatsTarget};
use tracing::debug;

/// Derive and register a statistics specification for `index`.
///
/// Returns `false` for every soft no-op condition -- fewer than two key
/// columns, non-ordinary owning storage, rejected specification -- and
/// `true` only when a statistics object was created and its dependency
/// edges recorded. The caller is responsible for `index` actually being an
/// index relation.
pub fn synthesize(catalog: &dyn Catalog, index: &Relation) -> bool {
    let Some(info) = &index.index else {
        return false;
    };

    // A statistics object is pointless on a single column. Included
    // (non-key) columns do not count.
    if info.num_key_columns < 2 {
        return false;
    }

    let source_table = {
        let Some(table) = catalog.try_open(info.table) else {
            return false;
        };
        // Conservative placeholder: only ordinary tables qualify.
        if table.kind != RelationKind::Table || table.storage != StorageKind::Ordinary {
            return false;
        }
        table.name.clone()
        // Table guard dropped here; the creation primitive takes its own locks.
    };

    // Enumerate the key columns in index key order. A zero attribute number
    // marks an expression position consuming the next expression-list entry;
    // the positional mirroring is load-bearing.
    let mut expressions = info.expressions.iter();
    let mut entries = Vec::with_capacity(info.num_key_columns);
    for position in 0..info.num_key_columns {
        if info.attrs.get(position).copied().unwrap_or(0) != 0 {
            let Some(column) = index.columns.get(position) else {
                return false;
            };
            entries.push(StatsTarget::Column(column.name.clone()));
        } else {
            let Some(expr) = expressions.next() else {
                return false;
            };
            entries.push(StatsTarget::Expression(expr.clone()));
        }
    }

    let spec = StatisticsSpec {
        source_table,
        entries,
        kinds: StatKind::all(),
    };

    let stat_id = match catalog.create_statistics(&spec) {
        Ok(id) => id,
        Err(err) => {
            debug!(index = %index.name, %err, "statistics creation rejected");
            return false;
        }
    };

    // Dropping the extension or the source index cascades the new object.
    catalog.record_dependency(DependencyEdge {
        dependent: stat_id,
        referenced: catalog.extension_object(),
        kind: DependencyKind::Auto,
    });
    catalog.record_dependency(DependencyEdge {
        dependent: stat_id,
        referenced: index.id,
        kind: DependencyKind::Auto,
    });

    debug!(index = %index.name, stat = %stat_id, "extended statistics created");
    true
}

/// Direct entry point: resolve a dot-qualified index name and synthesize
/// statistics for it synchronously.
///
/// Fails with [`ExtensionError::WrongObjectKind`] if the named relation is
/// not an index or partitioned index; resolution failures surface as
/// catalog errors. All soft no-op conditions come back as `Ok(false)`.
pub fn build_extended_statistic(
    catalog: &dyn Catalog,
    qualified_name: &str,
) -> Result<bool, ExtensionError> {
    let name = TableRef::parse(qualified_name);
    let rel = catalog.open_by_name(&name)?;
    if !rel.kind.is_index() {
        return Err(ExtensionError::WrongObjectKind {
            name: rel.name.to_string(),
            kind: rel.kind,
        });
    }
    Ok(synthesize(catalog, &rel))
}

#[cfg(test)]
mod tests {
    use super::*;
    use qpx_core::catalog::{ColumnDef, IndexDef, IndexKeyDef, InMemoryCatalog};
    use qpx_core::expr::Expr;

    fn seed_table(catalog: &InMemoryCatalog, name: &str, storage: StorageKind) -> TableRef {
        let table = TableRef::parse(name);
        catalog
            .create_table(
                &table,
                &[ColumnDef::new("a"), ColumnDef::new("b"), ColumnDef::new("c")],
                storage,
            )
            .unwrap();
        table
    }

    fn index_on(
        catalog: &InMemoryCatalog,
        table: &TableRef,
        name: &str,
        keys: Vec<IndexKeyDef>,
    ) -> TableRef {
        let index = TableRef::parse(name);
        catalog
            .create_index(&IndexDef {
                name: index.clone(),
                table: table.clone(),
                key_columns: keys,
                include: vec![],
                partitioned: false,
            })
            .unwrap();
        index
    }

    #[test]
    fn test_single_key_column_is_a_no_op() {
        let catalog = InMemoryCatalog::new();
        let table = seed_table(&catalog, "t", StorageKind::Ordinary);
        index_on(&catalog, &table, "idx1", vec![IndexKeyDef::Column("a".into())]);

        assert_eq!(build_extended_statistic(&catalog, "idx1").unwrap(), false);
        assert_eq!(catalog.statistics_count(), 0);
    }

    #[test]
    fn test_two_key_columns_create_one_object_with_two_dependencies() {
        let catalog = InMemoryCatalog::new();
        let table = seed_table(&catalog, "t", StorageKind::Ordinary);
        let index = index_on(
            &catalog,
            &table,
            "idx",
            vec![
                IndexKeyDef::Column("a".into()),
                IndexKeyDef::Column("b".into()),
            ],
        );

        assert!(build_extended_statistic(&catalog, "idx").unwrap());
        let stats = catalog.statistics_for_table(&table);
        assert_eq!(stats.len(), 1);
        assert_eq!(
            stats[0].spec.entries,
            vec![
                StatsTarget::Column("a".into()),
                StatsTarget::Column("b".into())
            ]
        );

        let deps = catalog.dependencies_of(stats[0].id);
        assert_eq!(deps.len(), 2);
        assert!(deps.contains(&catalog.extension_object()));
        assert!(deps.contains(&catalog.relation_id(&index).unwrap()));
    }

    #[test]
    fn test_expression_keys_consumed_in_index_order() {
        let catalog = InMemoryCatalog::new();
        let table = seed_table(&catalog, "t", StorageKind::Ordinary);
        let lower_a = Expr::Function {
            name: "lower".into(),
            args: vec![Expr::column("a")],
        };
        index_on(
            &catalog,
            &table,
            "fidx",
            vec![
                IndexKeyDef::Expression(lower_a.clone()),
                IndexKeyDef::Column("b".into()),
            ],
        );

        assert!(build_extended_statistic(&catalog, "fidx").unwrap());
        let stats = catalog.statistics_for_table(&table);
        assert_eq!(
            stats[0].spec.entries,
            vec![
                StatsTarget::Expression(lower_a),
                StatsTarget::Column("b".into())
            ]
        );
    }

    #[test]
    fn test_auxiliary_owning_table_is_a_no_op() {
        let catalog = InMemoryCatalog::new();
        let table = seed_table(&catalog, "side", StorageKind::Auxiliary);
        index_on(
            &catalog,
            &table,
            "sidx",
            vec![
                IndexKeyDef::Column("a".into()),
                IndexKeyDef::Column("b".into()),
            ],
        );

        assert_eq!(build_extended_statistic(&catalog, "sidx").unwrap(), false);
        assert_eq!(catalog.statistics_count(), 0);
    }

    #[test]
    fn test_non_index_target_raises_wrong_object_kind() {
        let catalog = InMemoryCatalog::new();
        seed_table(&catalog, "t", StorageKind::Ordinary);

        let err = build_extended_statistic(&catalog, "t").unwrap_err();
        assert!(matches!(err, ExtensionError::WrongObjectKind { .. }));
        assert_eq!(catalog.held_locks(), 0);
    }

    #[test]
    fn test_second_synthesize_is_rejected_as_duplicate() {
        let catalog = InMemoryCatalog::new();
        let table = seed_table(&catalog, "t", StorageKind::Ordinary);
        index_on(
            &catalog,
            &table,
            "idx",
            vec![
                IndexKeyDef::Column("a".into()),
                IndexKeyDef::Column("b".into()),
            ],
        );

        assert!(build_extended_statistic(&catalog, "idx").unwrap());
        // Re-attempting is allowed and expected to fail again, consistently.
        assert_eq!(build_extended_statistic(&catalog, "idx").unwrap(), false);
        assert_eq!(catalog.statistics_count(), 1);
    }
}
