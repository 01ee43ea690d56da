//! # Host Catalog Interface
//!
//! The catalog gives the interceptors access to the host engine's object
//! store: relations (tables and indexes), extended statistics objects, and
//! the dependency edges that tie them together.
//!
//! ## Trait Design
//!
//! The `Catalog` trait is intentionally minimal and behind a trait object
//! (`dyn Catalog`) so different hosts can supply it. Its primitives are
//! assumed atomic and correct -- "create a statistics object from a
//! specification" either fully succeeds or leaves no partial state behind.
//! For testing and development, `InMemoryCatalog` provides a HashMap-backed
//! implementation that can be populated programmatically.
//!
//! ## Lock Discipline
//!
//! Every open returns a [`RelationGuard`]: a scoped handle that registers a
//! shared lock on the relation and releases it on drop. Guards make the
//! release path unconditional -- an interceptor that errors out mid-statement
//! cannot leak a lock across the statement boundary. `InMemoryCatalog`
//! counts held locks so tests can assert that nothing leaked.

use crate::expr::{Expr, TableRef};
use crate::stats::StatisticsSpec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Mutex, RwLock};

/// Identifier of any catalog object: relation, statistics object, extension.
/// All classes share one id space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub u32);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationKind {
    Table,
    Index,
    PartitionedIndex,
    Sequence,
    View,
}

impl RelationKind {
    /// Whether this relation is an index the statistics synthesizer handles.
    pub fn is_index(self) -> bool {
        matches!(self, RelationKind::Index | RelationKind::PartitionedIndex)
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RelationKind::Table => "table",
            RelationKind::Index => "index",
            RelationKind::PartitionedIndex => "partitioned index",
            RelationKind::Sequence => "sequence",
            RelationKind::View => "view",
        };
        f.write_str(s)
    }
}

/// Storage classification of a table. Statistics are only synthesized for
/// ordinary storage; auxiliary objects (internal side tables) are skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageKind {
    Ordinary,
    Auxiliary,
}

/// Column definition, used both for table columns and for the per-position
/// row descriptor of an index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// One key position of an index definition: a plain column or an expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKeyDef {
    Column(String),
    Expression(Expr),
}

/// Definition of an index, as produced by DDL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: TableRef,
    pub table: TableRef,
    pub key_columns: Vec<IndexKeyDef>,
    /// Included (non-key) columns. Stored in the index row but never part of
    /// the key, and never counted toward statistics eligibility.
    pub include: Vec<String>,
    pub partitioned: bool,
}

/// Descriptor of an index relation, in index attribute order.
///
/// `attrs[i]` is the source-table attribute number of position `i`, with `0`
/// marking an expression position that consumes the next entry of
/// `expressions`. The first `num_key_columns` positions are key columns;
/// anything after is an included column. The positional correspondence
/// between zero entries in `attrs` and entries in `expressions` is
/// load-bearing for the statistics synthesizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub table: ObjectId,
    pub attrs: Vec<i16>,
    pub expressions: Vec<Expr>,
    pub num_key_columns: usize,
}

/// A catalog relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub id: ObjectId,
    pub name: TableRef,
    pub kind: RelationKind,
    pub storage: StorageKind,
    /// Row descriptor: table columns, or index positions (key + included).
    pub columns: Vec<ColumnDef>,
    /// Present iff `kind.is_index()`.
    pub index: Option<IndexInfo>,
}

/// Dependency edge classes, matching the host's cascade semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DependencyKind {
    /// Dropping the referenced object silently drops the dependent.
    Auto,
}

/// A recorded dependency: `dependent` relies on `referenced`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub dependent: ObjectId,
    pub referenced: ObjectId,
    pub kind: DependencyKind,
}

/// Errors surfaced by catalog primitives.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("relation \"{0}\" does not exist")]
    RelationNotFound(TableRef),
    #[error("relation \"{0}\" already exists")]
    RelationExists(TableRef),
    #[error("\"{0}\" is not a table")]
    NotATable(TableRef),
    #[error("column \"{column}\" of relation \"{table}\" does not exist")]
    ColumnNotFound { table: TableRef, column: String },
    #[error("invalid statistics specification: {0}")]
    InvalidStatisticsSpec(String),
    #[error("statistics object for {0} already exists")]
    DuplicateStatistics(String),
}

/// Scoped shared-lock handle on a relation. The lock registers on open and
/// releases on drop, so early returns and error paths cannot leak it.
pub struct RelationGuard {
    rel: Arc<Relation>,
    locks: Arc<Mutex<HashMap<ObjectId, usize>>>,
}

impl RelationGuard {
    fn acquire(rel: Arc<Relation>, locks: Arc<Mutex<HashMap<ObjectId, usize>>>) -> Self {
        if let Ok(mut held) = locks.lock() {
            *held.entry(rel.id).or_insert(0) += 1;
        }
        Self { rel, locks }
    }
}

impl Deref for RelationGuard {
    type Target = Relation;

    fn deref(&self) -> &Relation {
        &self.rel
    }
}

impl Drop for RelationGuard {
    fn drop(&mut self) {
        if let Ok(mut held) = self.locks.lock() {
            if let Some(count) = held.get_mut(&self.rel.id) {
                *count -= 1;
                if *count == 0 {
                    held.remove(&self.rel.id);
                }
            }
        }
    }
}

/// Catalog primitives supplied by the host engine.
pub trait Catalog: Send + Sync {
    /// Open a relation by id if it still exists. A vanished relation is a
    /// normal outcome for deferred work, not an error.
    fn try_open(&self, id: ObjectId) -> Option<RelationGuard>;

    /// Open a relation by qualified name under a shared lock.
    fn open_by_name(&self, name: &TableRef) -> Result<RelationGuard, CatalogError>;

    fn create_table(
        &self,
        name: &TableRef,
        columns: &[ColumnDef],
        storage: StorageKind,
    ) -> Result<ObjectId, CatalogError>;

    fn create_index(&self, def: &IndexDef) -> Result<ObjectId, CatalogError>;

    /// Drop a relation, cascading auto-dependent objects.
    fn drop_relation(&self, name: &TableRef) -> Result<(), CatalogError>;

    /// Create a statistics object from a specification. All-or-nothing: a
    /// rejected specification leaves no partial state behind.
    fn create_statistics(&self, spec: &StatisticsSpec) -> Result<ObjectId, CatalogError>;

    /// Record a dependency edge for cascade bookkeeping.
    fn record_dependency(&self, edge: DependencyEdge);

    /// The object id of the owning extension itself.
    fn extension_object(&self) -> ObjectId;
}

/// A registered extended-statistics object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedStatistics {
    pub id: ObjectId,
    pub spec: StatisticsSpec,
}

struct CatalogState {
    next_id: u32,
    relations: HashMap<ObjectId, Arc<Relation>>,
    names: HashMap<(String, String), ObjectId>,
    statistics: HashMap<ObjectId, ExtendedStatistics>,
    dependencies: Vec<DependencyEdge>,
    extension: ObjectId,
}

/// In-memory catalog for testing and development.
///
/// Mutating primitives take `&self`; the state lives behind an `RwLock` so
/// the catalog can sit behind `Arc<dyn Catalog>` the way the host's would.
pub struct InMemoryCatalog {
    state: RwLock<CatalogState>,
    locks: Arc<Mutex<HashMap<ObjectId, usize>>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(CatalogState {
                next_id: 2,
                relations: HashMap::new(),
                names: HashMap::new(),
                statistics: HashMap::new(),
                dependencies: Vec::new(),
                // Id 1 is reserved for the extension object itself.
                extension: ObjectId(1),
            }),
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn alloc_id(state: &mut CatalogState) -> ObjectId {
        let id = ObjectId(state.next_id);
        state.next_id += 1;
        id
    }

    fn name_key(name: &TableRef) -> (String, String) {
        (name.schema.clone(), name.name.clone())
    }

    /// Number of shared locks currently held via live guards.
    pub fn held_locks(&self) -> usize {
        self.locks
            .lock()
            .map(|held| held.values().sum())
            .unwrap_or(0)
    }

    pub fn statistics_count(&self) -> usize {
        self.state
            .read()
            .map(|s| s.statistics.len())
            .unwrap_or(0)
    }

    /// Statistics objects registered for a table, in creation order by id.
    pub fn statistics_for_table(&self, table: &TableRef) -> Vec<ExtendedStatistics> {
        let Ok(state) = self.state.read() else {
            return Vec::new();
        };
        let mut stats: Vec<_> = state
            .statistics
            .values()
            .filter(|s| &s.spec.source_table == table)
            .cloned()
            .collect();
        stats.sort_by_key(|s| s.id);
        stats
    }

    /// Objects the given object depends on, via recorded edges.
    pub fn dependencies_of(&self, dependent: ObjectId) -> Vec<ObjectId> {
        self.state
            .read()
            .map(|s| {
                s.dependencies
                    .iter()
                    .filter(|e| e.dependent == dependent)
                    .map(|e| e.referenced)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn relation_id(&self, name: &TableRef) -> Option<ObjectId> {
        self.state
            .read()
            .ok()
            .and_then(|s| s.names.get(&Self::name_key(name)).copied())
    }
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog for InMemoryCatalog {
    fn try_open(&self, id: ObjectId) -> Option<RelationGuard> {
        let state = self.state.read().ok()?;
        let rel = state.relations.get(&id)?.clone();
        Some(RelationGuard::acquire(rel, Arc::clone(&self.locks)))
    }

    fn open_by_name(&self, name: &TableRef) -> Result<RelationGuard, CatalogError> {
        let state = self
            .state
            .read()
            .map_err(|_| CatalogError::RelationNotFound(name.clone()))?;
        let id = state
            .names
            .get(&Self::name_key(name))
            .copied()
            .ok_or_else(|| CatalogError::RelationNotFound(name.clone()))?;
        let rel = state
            .relations
            .get(&id)
            .cloned()
            .ok_or_else(|| CatalogError::RelationNotFound(name.clone()))?;
        Ok(RelationGuard::acquire(rel, Arc::clone(&self.locks)))
    }

    fn create_table(
        &self,
        name: &TableRef,
        columns: &[ColumnDef],
        storage: StorageKind,
    ) -> Result<ObjectId, CatalogError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| CatalogError::RelationExists(name.clone()))?;
        if state.names.contains_key(&Self::name_key(name)) {
            return Err(CatalogError::RelationExists(name.clone()));
        }
        let id = Self::alloc_id(&mut state);
        let rel = Relation {
            id,
            name: name.clone(),
            kind: RelationKind::Table,
            storage,
            columns: columns.to_vec(),
            index: None,
        };
        state.relations.insert(id, Arc::new(rel));
        state.names.insert(Self::name_key(name), id);
        Ok(id)
    }

    fn create_index(&self, def: &IndexDef) -> Result<ObjectId, CatalogError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| CatalogError::RelationExists(def.name.clone()))?;
        if state.names.contains_key(&Self::name_key(&def.name)) {
            return Err(CatalogError::RelationExists(def.name.clone()));
        }
        let table_id = state
            .names
            .get(&Self::name_key(&def.table))
            .copied()
            .ok_or_else(|| CatalogError::RelationNotFound(def.table.clone()))?;
        let table = state
            .relations
            .get(&table_id)
            .cloned()
            .ok_or_else(|| CatalogError::RelationNotFound(def.table.clone()))?;
        if table.kind != RelationKind::Table {
            return Err(CatalogError::NotATable(def.table.clone()));
        }

        let attno = |column: &str| -> Result<i16, CatalogError> {
            table
                .columns
                .iter()
                .position(|c| c.name == column)
                .map(|p| (p + 1) as i16)
                .ok_or_else(|| CatalogError::ColumnNotFound {
                    table: def.table.clone(),
                    column: column.to_string(),
                })
        };

        // Build the index row descriptor in key order, then included columns.
        let mut attrs = Vec::new();
        let mut expressions = Vec::new();
        let mut columns = Vec::new();
        for (pos, key) in def.key_columns.iter().enumerate() {
            match key {
                IndexKeyDef::Column(column) => {
                    attrs.push(attno(column)?);
                    columns.push(ColumnDef::new(column.clone()));
                }
                IndexKeyDef::Expression(expr) => {
                    attrs.push(0);
                    expressions.push(expr.clone());
                    columns.push(ColumnDef::new(format!("expr{}", pos + 1)));
                }
            }
        }
        let num_key_columns = attrs.len();
        for column in &def.include {
            attrs.push(attno(column)?);
            columns.push(ColumnDef::new(column.clone()));
        }

        let id = Self::alloc_id(&mut state);
        let rel = Relation {
            id,
            name: def.name.clone(),
            kind: if def.partitioned {
                RelationKind::PartitionedIndex
            } else {
                RelationKind::Index
            },
            storage: StorageKind::Ordinary,
            columns,
            index: Some(IndexInfo {
                table: table_id,
                attrs,
                expressions,
                num_key_columns,
            }),
        };
        state.relations.insert(id, Arc::new(rel));
        state.names.insert(Self::name_key(&def.name), id);
        Ok(id)
    }

    fn drop_relation(&self, name: &TableRef) -> Result<(), CatalogError> {
        let mut state = self
            .state
            .write()
            .map_err(|_| CatalogError::RelationNotFound(name.clone()))?;
        let id = state
            .names
            .remove(&Self::name_key(name))
            .ok_or_else(|| CatalogError::RelationNotFound(name.clone()))?;
        state.relations.remove(&id);

        // Auto-cascade: drop dependents of the removed object, transitively.
        let mut doomed = vec![id];
        while let Some(gone) = doomed.pop() {
            let dependents: Vec<ObjectId> = state
                .dependencies
                .iter()
                .filter(|e| e.referenced == gone && e.kind == DependencyKind::Auto)
                .map(|e| e.dependent)
                .collect();
            state.dependencies.retain(|e| e.referenced != gone && e.dependent != gone);
            for dep in dependents {
                if state.statistics.remove(&dep).is_some() || state.relations.remove(&dep).is_some()
                {
                    doomed.push(dep);
                }
            }
        }
        Ok(())
    }

    fn create_statistics(&self, spec: &StatisticsSpec) -> Result<ObjectId, CatalogError> {
        if spec.entries.len() < 2 {
            return Err(CatalogError::InvalidStatisticsSpec(
                "extended statistics require at least two expressions".into(),
            ));
        }
        let mut state = self
            .state
            .write()
            .map_err(|_| CatalogError::InvalidStatisticsSpec("catalog unavailable".into()))?;
        if !state
            .names
            .contains_key(&Self::name_key(&spec.source_table))
        {
            return Err(CatalogError::RelationNotFound(spec.source_table.clone()));
        }
        // Host identity rule: one statistics object per (table, entry list).
        let identity = spec.identity();
        if state.statistics.values().any(|s| s.spec.identity() == identity) {
            return Err(CatalogError::DuplicateStatistics(identity));
        }
        let id = Self::alloc_id(&mut state);
        state.statistics.insert(
            id,
            ExtendedStatistics {
                id,
                spec: spec.clone(),
            },
        );
        Ok(id)
    }

    fn record_dependency(&self, edge: DependencyEdge) {
        if let Ok(mut state) = self.state.write() {
            state.dependencies.push(edge);
        }
    }

    fn extension_object(&self) -> ObjectId {
        self.state
            .read()
            .map(|s| s.extension)
            .unwrap_or(ObjectId(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{StatKind, StatsTarget};

    fn two_col_spec(table: &TableRef) -> StatisticsSpec {
        StatisticsSpec {
            source_table: table.clone(),
            entries: vec![
                StatsTarget::Column("a".into()),
                StatsTarget::Column("b".into()),
            ],
            kinds: StatKind::all(),
        }
    }

    fn seed(catalog: &InMemoryCatalog) -> (TableRef, TableRef) {
        let table = TableRef::parse("t");
        let index = TableRef::parse("idx");
        catalog
            .create_table(
                &table,
                &[ColumnDef::new("a"), ColumnDef::new("b")],
                StorageKind::Ordinary,
            )
            .unwrap();
        catalog
            .create_index(&IndexDef {
                name: index.clone(),
                table: table.clone(),
                key_columns: vec![
                    IndexKeyDef::Column("a".into()),
                    IndexKeyDef::Column("b".into()),
                ],
                include: vec![],
                partitioned: false,
            })
            .unwrap();
        (table, index)
    }

    #[test]
    fn test_guard_releases_lock_on_drop() {
        let catalog = InMemoryCatalog::new();
        let (table, _) = seed(&catalog);
        {
            let _guard = catalog.open_by_name(&table).unwrap();
            assert_eq!(catalog.held_locks(), 1);
        }
        assert_eq!(catalog.held_locks(), 0);
    }

    #[test]
    fn test_included_columns_do_not_count_as_keys() {
        let catalog = InMemoryCatalog::new();
        let table = TableRef::parse("t");
        catalog
            .create_table(
                &table,
                &[ColumnDef::new("a"), ColumnDef::new("b")],
                StorageKind::Ordinary,
            )
            .unwrap();
        let id = catalog
            .create_index(&IndexDef {
                name: TableRef::parse("covering"),
                table,
                key_columns: vec![IndexKeyDef::Column("a".into())],
                include: vec!["b".into()],
                partitioned: false,
            })
            .unwrap();
        let rel = catalog.try_open(id).unwrap();
        let info = rel.index.as_ref().unwrap();
        assert_eq!(info.num_key_columns, 1);
        assert_eq!(info.attrs, vec![1, 2]);
    }

    #[test]
    fn test_duplicate_statistics_rejected() {
        let catalog = InMemoryCatalog::new();
        let (table, _) = seed(&catalog);
        let spec = two_col_spec(&table);
        catalog.create_statistics(&spec).unwrap();
        assert!(matches!(
            catalog.create_statistics(&spec),
            Err(CatalogError::DuplicateStatistics(_))
        ));
        assert_eq!(catalog.statistics_count(), 1);
    }

    #[test]
    fn test_drop_cascades_auto_dependents() {
        let catalog = InMemoryCatalog::new();
        let (table, index) = seed(&catalog);
        let index_id = catalog.relation_id(&index).unwrap();
        let stat = catalog.create_statistics(&two_col_spec(&table)).unwrap();
        catalog.record_dependency(DependencyEdge {
            dependent: stat,
            referenced: index_id,
            kind: DependencyKind::Auto,
        });

        catalog.drop_relation(&index).unwrap();
        assert_eq!(catalog.statistics_count(), 0);
    }
}
