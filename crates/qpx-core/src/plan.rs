//! # Candidate Plan Fragments
//!
//! During planning the host considers, for every relation and join under
//! optimization, a list of alternative physical plan fragments. Cost-based
//! selection picks one of them; everything else is discarded. Interceptors
//! on the join-candidate stage may edit the list before selection happens --
//! which is exactly how the transparent wrapper injects itself.
//!
//! A [`PathFragment`] is one such alternative: an operator kind plus the
//! estimates the host's selection compares (cost, row count) and the row
//! shape it advertises. Custom fragments carry an [`ExecFactory`] trait
//! object so an extension can supply execution behavior without the host's
//! operator enum knowing about it.

use crate::exec::{ExecFactory, ExecNode, Row};
use crate::expr::{ColumnRef, Expr, JoinType, TableRef};
use crate::error::ExtensionError;
use crate::meta::MetaMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Estimated expense of a plan fragment. A single comparable total; lower
/// wins. The wrapper copies this through unchanged -- it adds no cost.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Cost {
    pub total: f64,
}

impl Cost {
    pub fn zero() -> Self {
        Self { total: 0.0 }
    }

    pub fn new(total: f64) -> Self {
        Self { total }
    }
}

/// Physical operator kind of a candidate fragment.
#[derive(Clone)]
pub enum FragmentKind {
    /// Inline row source. The in-memory host's leaf fragment.
    Values { rows: Vec<Row> },
    /// Full scan of a base table.
    SeqScan { table: TableRef },
    /// Hash join: build side hashed, probe side streamed.
    HashJoin { condition: Option<Expr> },
    /// Nested loop join: universal fallback.
    NestedLoopJoin { condition: Option<Expr> },
    /// Extension-supplied fragment. The factory builds its executor.
    Custom {
        name: &'static str,
        factory: Arc<dyn ExecFactory>,
    },
}

impl fmt::Debug for FragmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FragmentKind::Values { rows } => {
                f.debug_struct("Values").field("rows", &rows.len()).finish()
            }
            FragmentKind::SeqScan { table } => {
                f.debug_struct("SeqScan").field("table", table).finish()
            }
            FragmentKind::HashJoin { condition } => f
                .debug_struct("HashJoin")
                .field("condition", condition)
                .finish(),
            FragmentKind::NestedLoopJoin { condition } => f
                .debug_struct("NestedLoopJoin")
                .field("condition", condition)
                .finish(),
            FragmentKind::Custom { name, .. } => {
                f.debug_struct("Custom").field("name", name).finish()
            }
        }
    }
}

/// One candidate physical plan fragment.
#[derive(Debug, Clone)]
pub struct PathFragment {
    pub kind: FragmentKind,
    pub cost: Cost,
    /// Estimated output row count.
    pub rows: f64,
    /// Whether this fragment depends on parameters from an outer relation.
    pub parameterized: bool,
    /// Advertised output row shape.
    pub output: Vec<ColumnRef>,
    pub children: Vec<PathFragment>,
}

impl PathFragment {
    pub fn is_hash_join(&self) -> bool {
        matches!(self.kind, FragmentKind::HashJoin { .. })
    }

    /// Build the executor tree for this fragment.
    pub fn create_exec(&self) -> Result<Box<dyn ExecNode>, ExtensionError> {
        use crate::exec::{JoinExec, ValuesExec};
        match &self.kind {
            FragmentKind::Values { rows } => Ok(Box::new(ValuesExec::new(rows.clone()))),
            // The in-memory host carries no row storage; scans yield nothing.
            FragmentKind::SeqScan { .. } => Ok(Box::new(ValuesExec::new(Vec::new()))),
            FragmentKind::HashJoin { .. } | FragmentKind::NestedLoopJoin { .. } => {
                let [outer, inner] = self.children.as_slice() else {
                    return Err(ExtensionError::PlanShape(
                        "join fragment requires exactly two children",
                    ));
                };
                Ok(Box::new(JoinExec::new(
                    outer.create_exec()?,
                    inner.create_exec()?,
                )))
            }
            FragmentKind::Custom { factory, .. } => factory.create_exec(self),
        }
    }
}

/// A join relation mid-optimization: the pair's join type, required output,
/// and the current list of candidate fragments.
#[derive(Debug, Clone)]
pub struct JoinRel {
    pub join_type: JoinType,
    /// The relation is provably empty/unsatisfiable.
    pub is_dummy: bool,
    /// Output expressions the join must produce.
    pub targets: Vec<Expr>,
    /// Required output row shape.
    pub output: Vec<ColumnRef>,
    pub candidates: Vec<PathFragment>,
}

/// The finished plan handed to execution, with its metadata sidecar.
#[derive(Debug, Clone)]
pub struct PlannedStatement {
    pub root: PathFragment,
    pub meta: MetaMap,
}

impl PlannedStatement {
    pub fn new(root: PathFragment) -> Self {
        Self {
            root,
            meta: MetaMap::new(),
        }
    }
}
