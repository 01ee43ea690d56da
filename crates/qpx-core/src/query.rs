//! # Analyzed Queries and Utility Statements
//!
//! The host's analyzer hands the pipeline a [`Query`]: the command kind, the
//! relations it ranges over, its predicate and target expressions (with
//! literal spans preserved from the source text), and a metadata sidecar.
//! This core never re-analyzes or re-parses; it only observes and annotates.
//!
//! Utility statements ([`Statement`]) are the DDL commands the statement
//! stage processes -- the ones whose created objects the deferred worker
//! collects.

use crate::catalog::{ColumnDef, IndexDef, StorageKind};
use crate::expr::{Expr, JoinType, TableRef};
use crate::meta::MetaMap;
use serde::{Deserialize, Serialize};

/// Top-level command classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    Select,
    Insert,
    Update,
    Delete,
    Utility,
}

/// An analyzed query flowing through the per-query pipeline stages.
#[derive(Debug, Clone)]
pub struct Query {
    pub command: CommandKind,
    /// Original source text.
    pub source: String,
    /// Relations referenced, in range-table order.
    pub range_tables: Vec<TableRef>,
    /// Join type between the first two range tables, if this is a join query.
    pub join_type: Option<JoinType>,
    /// WHERE/ON predicate.
    pub quals: Option<Expr>,
    /// Output target list.
    pub targets: Vec<Expr>,
    /// Highest `$n` external parameter id the analyzer saw, 0 if none.
    pub highest_extern_param_id: i64,
    /// Metadata sidecar, owned by this query object.
    pub meta: MetaMap,
}

impl Query {
    pub fn new(command: CommandKind, source: impl Into<String>) -> Self {
        Self {
            command,
            source: source.into(),
            range_tables: Vec::new(),
            join_type: None,
            quals: None,
            targets: Vec::new(),
            highest_extern_param_id: 0,
            meta: MetaMap::new(),
        }
    }
}

/// A utility (DDL) statement processed by the statement stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Statement {
    CreateTable {
        name: TableRef,
        columns: Vec<ColumnDef>,
        storage: StorageKind,
    },
    CreateIndex(IndexDef),
    DropRelation {
        name: TableRef,
    },
}
