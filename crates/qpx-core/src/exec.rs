//! # Execution Protocol
//!
//! Execution state objects follow a narrow four-operation lifecycle:
//! `begin` (allocate state), `step` (produce the next row), `rescan`
//! (parameters changed, restart from the top), `end` (release resources).
//! The [`ExecNode`] trait captures exactly that protocol -- nothing else --
//! so a decorator can forward it without knowing the concrete node type.
//!
//! `end` must run on every exit path, including early termination; the
//! stage drivers in [`crate::pipeline`] guarantee it for the plan root, and
//! every composite node here guarantees it for its children.
//!
//! Two concrete nodes serve the in-memory host: [`ValuesExec`] (inline row
//! source) and [`JoinExec`] (equi-join on the leading column, standing in
//! for the host's join machinery).

use crate::error::ExtensionError;
use crate::expr::ScalarValue;
use crate::plan::{PathFragment, PlannedStatement};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};

/// A produced result row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row(pub Vec<ScalarValue>);

/// Set of parameter ids whose values changed since the last scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSet(BTreeSet<u32>);

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(param: u32) -> Self {
        let mut set = Self::new();
        set.insert(param);
        set
    }

    pub fn insert(&mut self, param: u32) {
        self.0.insert(param);
    }

    pub fn merge(&mut self, other: &ParamSet) {
        self.0.extend(other.0.iter().copied());
    }

    pub fn contains(&self, param: u32) -> bool {
        self.0.contains(&param)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// The execution-state protocol. One instance drives one plan fragment.
pub trait ExecNode: Send {
    /// Allocate execution state. Called once, before any other operation.
    fn begin(&mut self) -> Result<(), ExtensionError>;

    /// Produce the next result row, or `None` when exhausted.
    fn step(&mut self) -> Result<Option<Row>, ExtensionError>;

    /// Restart the scan because the given parameters changed.
    fn rescan(&mut self, changed: &ParamSet) -> Result<(), ExtensionError>;

    /// Release held resources. Must be called on every exit path.
    fn end(&mut self) -> Result<(), ExtensionError>;
}

/// Builds executors for extension-supplied plan fragments.
pub trait ExecFactory: Send + Sync {
    fn create_exec(&self, fragment: &PathFragment) -> Result<Box<dyn ExecNode>, ExtensionError>;
}

/// Inline row source.
pub struct ValuesExec {
    rows: Vec<Row>,
    cursor: usize,
}

impl ValuesExec {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows, cursor: 0 }
    }
}

impl ExecNode for ValuesExec {
    fn begin(&mut self) -> Result<(), ExtensionError> {
        self.cursor = 0;
        Ok(())
    }

    fn step(&mut self) -> Result<Option<Row>, ExtensionError> {
        let row = self.rows.get(self.cursor).cloned();
        if row.is_some() {
            self.cursor += 1;
        }
        Ok(row)
    }

    fn rescan(&mut self, _changed: &ParamSet) -> Result<(), ExtensionError> {
        self.cursor = 0;
        Ok(())
    }

    fn end(&mut self) -> Result<(), ExtensionError> {
        Ok(())
    }
}

/// Equi-join of two child nodes on their leading column.
///
/// Builds a hash table over the inner child on first step, then probes with
/// outer rows; matches emit the outer row concatenated with the inner row.
pub struct JoinExec {
    outer: Box<dyn ExecNode>,
    inner: Box<dyn ExecNode>,
    table: Option<HashMap<ScalarValue, Vec<Row>>>,
    pending: VecDeque<Row>,
}

impl JoinExec {
    pub fn new(outer: Box<dyn ExecNode>, inner: Box<dyn ExecNode>) -> Self {
        Self {
            outer,
            inner,
            table: None,
            pending: VecDeque::new(),
        }
    }

    fn build(&mut self) -> Result<(), ExtensionError> {
        if self.table.is_none() {
            let mut table: HashMap<ScalarValue, Vec<Row>> = HashMap::new();
            while let Some(row) = self.inner.step()? {
                if let Some(key) = row.0.first() {
                    table.entry(key.clone()).or_default().push(row.clone());
                }
            }
            self.table = Some(table);
        }
        Ok(())
    }
}

impl ExecNode for JoinExec {
    fn begin(&mut self) -> Result<(), ExtensionError> {
        self.outer.begin()?;
        self.inner.begin()
    }

    fn step(&mut self) -> Result<Option<Row>, ExtensionError> {
        self.build()?;
        loop {
            if let Some(row) = self.pending.pop_front() {
                return Ok(Some(row));
            }
            let Some(outer_row) = self.outer.step()? else {
                return Ok(None);
            };
            let Some(key) = outer_row.0.first() else {
                continue;
            };
            if let Some(matches) = self.table.as_ref().and_then(|t| t.get(key)) {
                for inner_row in matches {
                    let mut joined = outer_row.0.clone();
                    joined.extend(inner_row.0.iter().cloned());
                    self.pending.push_back(Row(joined));
                }
            }
        }
    }

    fn rescan(&mut self, changed: &ParamSet) -> Result<(), ExtensionError> {
        self.table = None;
        self.pending.clear();
        self.outer.rescan(changed)?;
        self.inner.rescan(changed)
    }

    fn end(&mut self) -> Result<(), ExtensionError> {
        // Both children must be released even if the first end fails.
        let outer = self.outer.end();
        let inner = self.inner.end();
        outer.and(inner)
    }
}

/// Execution descriptor for one statement: the plan, the live execution
/// state between begin and end, and the rows produced so far.
pub struct ExecDesc {
    pub planned: PlannedStatement,
    pub state: Option<Box<dyn ExecNode>>,
    pub output: Vec<Row>,
}

impl ExecDesc {
    pub fn new(planned: PlannedStatement) -> Self {
        Self {
            planned,
            state: None,
            output: Vec::new(),
        }
    }

    pub fn take_output(&mut self) -> Vec<Row> {
        std::mem::take(&mut self.output)
    }
}
