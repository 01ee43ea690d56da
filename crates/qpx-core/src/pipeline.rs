//! # Pipeline Registry and Hook Chains
//!
//! The host engine processes a query through fixed stages: analyze, plan,
//! then the four execution sub-stages (begin, step, finish, end). Alongside
//! the per-query stages sit two auxiliary interception points -- utility
//! statement processing and object-creation observation -- and one point
//! inside planning, join-candidate generation.
//!
//! Extensions do not replace stages; they *chain* onto them. Installing a
//! handler swaps it in front of whatever currently occupies the stage, and
//! the new handler receives the previous occupant. On every invocation the
//! handler must either call that previous handler or the stage's documented
//! default -- skipping both breaks the pipeline contract for every other
//! registered interceptor. There is no uninstall: installation is permanent
//! for the process lifetime.
//!
//! ## The registry
//!
//! Rather than bare mutable globals, the chains live in an explicit
//! [`Pipeline`] registry: built once by [`PipelineBuilder`] at
//! initialization time (where the stage defaults are bound to the host
//! catalog), immutable afterward, and shared read-only across every query
//! the session runs. Each installed handler closes over its captured
//! predecessor, so the chain is an explicit linked structure instead of
//! ambient state.
//!
//! The `Pipeline` also drives the stages (`run_*`); `execute_query` runs a
//! whole query through them with the execution-end stage guaranteed on
//! early termination.

use crate::catalog::{Catalog, ObjectId};
use crate::error::ExtensionError;
use crate::exec::{ExecDesc, Row};
use crate::expr::{ColumnRef, Expr, JoinType, TableRef};
use crate::plan::{Cost, FragmentKind, JoinRel, PathFragment, PlannedStatement};
use crate::query::{Query, Statement};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// The per-query pipeline stages, in processing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineStage {
    Analyze,
    Plan,
    ExecBegin,
    ExecStep,
    ExecFinish,
    ExecEnd,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineStage::Analyze => "analyze",
            PipelineStage::Plan => "plan",
            PipelineStage::ExecBegin => "executor begin",
            PipelineStage::ExecStep => "executor step",
            PipelineStage::ExecFinish => "executor finish",
            PipelineStage::ExecEnd => "executor end",
        };
        f.write_str(s)
    }
}

/// Session processing mode. Deferred collection only runs in `Normal`;
/// bulk/maintenance processing is excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessingMode {
    Normal,
    Bulk,
}

/// Object class of a creation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectClass {
    Relation,
    Other,
}

/// Fired once per newly created object, post-creation. `sub_id` is non-zero
/// when the event describes a sub-part of a composite creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectCreated {
    pub class: ObjectClass,
    pub object: ObjectId,
    pub sub_id: u32,
}

/// One stage's handler slot: the current head of the chain.
///
/// `install` atomically swaps the head, handing the previous occupant to
/// the wrapping closure -- the hook-chaining protocol. The same slot type is
/// instantiated once per stage.
pub struct HookChain<H: ?Sized> {
    current: Arc<H>,
}

impl<H: ?Sized> HookChain<H> {
    /// Create a chain whose initial occupant is the stage default.
    pub fn new(default_handler: Arc<H>) -> Self {
        Self {
            current: default_handler,
        }
    }

    /// Swap a new handler in front of the current one. The closure receives
    /// the previous occupant and must return the handler that wraps it.
    pub fn install<F>(&mut self, wrap: F)
    where
        F: FnOnce(Arc<H>) -> Arc<H>,
    {
        let previous = Arc::clone(&self.current);
        self.current = wrap(previous);
    }

    /// The current head of the chain.
    pub fn head(&self) -> &H {
        &self.current
    }
}

/// Context available to statement-stage and object-creation handlers.
pub struct StatementContext<'a> {
    pub catalog: &'a dyn Catalog,
    pub observers: &'a HookChain<dyn ObjectCreatedHook>,
    pub mode: ProcessingMode,
}

/// Context available during planning and candidate generation.
pub struct PlanContext<'a> {
    pub catalog: &'a dyn Catalog,
    pub join_hooks: &'a HookChain<dyn JoinCandidateHook>,
}

pub trait AnalyzeHook: Send + Sync {
    fn analyze(&self, query: &mut Query) -> Result<(), ExtensionError>;
}

pub trait PlanHook: Send + Sync {
    fn plan(&self, query: &Query, ctx: &PlanContext<'_>)
        -> Result<PlannedStatement, ExtensionError>;
}

pub trait ExecBeginHook: Send + Sync {
    fn exec_begin(&self, desc: &mut ExecDesc) -> Result<(), ExtensionError>;
}

pub trait ExecStepHook: Send + Sync {
    /// Produce up to `count` rows into `desc.output`; `0` means "run to
    /// completion".
    fn exec_step(&self, desc: &mut ExecDesc, count: u64) -> Result<(), ExtensionError>;
}

pub trait ExecFinishHook: Send + Sync {
    fn exec_finish(&self, desc: &mut ExecDesc) -> Result<(), ExtensionError>;
}

pub trait ExecEndHook: Send + Sync {
    fn exec_end(&self, desc: &mut ExecDesc) -> Result<(), ExtensionError>;
}

pub trait StatementHook: Send + Sync {
    fn process_statement(
        &self,
        stmt: &Statement,
        ctx: &StatementContext<'_>,
    ) -> Result<(), ExtensionError>;
}

pub trait ObjectCreatedHook: Send + Sync {
    fn object_created(&self, event: &ObjectCreated, ctx: &StatementContext<'_>);
}

/// Fired once per join-relation-pair evaluation during candidate
/// generation, after the host has populated the candidate list.
pub trait JoinCandidateHook: Send + Sync {
    fn join_candidates(&self, rel: &mut JoinRel, ctx: &PlanContext<'_>);
}

/// The host's documented default behavior for every stage.
///
/// This is the handler each chain starts from -- what an installed
/// interceptor reaches when it is the first to register.
struct HostDefaults;

impl AnalyzeHook for HostDefaults {
    fn analyze(&self, _query: &mut Query) -> Result<(), ExtensionError> {
        // Analysis itself already happened in the host; the stage exists for
        // observation and annotation.
        Ok(())
    }
}

impl PlanHook for HostDefaults {
    fn plan(
        &self,
        query: &Query,
        ctx: &PlanContext<'_>,
    ) -> Result<PlannedStatement, ExtensionError> {
        let root = if query.range_tables.len() == 2 {
            let mut rel = JoinRel {
                join_type: query.join_type.unwrap_or(JoinType::Inner),
                is_dummy: false,
                targets: query.targets.clone(),
                output: output_shape(&query.targets),
                candidates: default_join_candidates(query),
            };
            ctx.join_hooks.head().join_candidates(&mut rel, ctx);
            trace!(
                candidates = rel.candidates.len(),
                "join candidate generation finished"
            );
            cheapest(rel.candidates)
                .ok_or(ExtensionError::PlanShape("join produced no candidate fragments"))?
        } else {
            scan_fragment(query)
        };
        let mut planned = PlannedStatement::new(root);
        // The sidecar crosses the stage boundary with the plan.
        planned.meta = query.meta.clone();
        Ok(planned)
    }
}

impl ExecBeginHook for HostDefaults {
    fn exec_begin(&self, desc: &mut ExecDesc) -> Result<(), ExtensionError> {
        if desc.state.is_some() {
            return Err(ExtensionError::ExecProtocol("begin invoked twice"));
        }
        let mut node = desc.planned.root.create_exec()?;
        if let Err(err) = node.begin() {
            // Release whatever the failed begin acquired before surfacing.
            let _ = node.end();
            return Err(err);
        }
        desc.state = Some(node);
        Ok(())
    }
}

impl ExecStepHook for HostDefaults {
    fn exec_step(&self, desc: &mut ExecDesc, count: u64) -> Result<(), ExtensionError> {
        let Some(node) = desc.state.as_mut() else {
            return Err(ExtensionError::ExecProtocol("step before begin"));
        };
        let mut produced = 0;
        while count == 0 || produced < count {
            match node.step()? {
                Some(row) => {
                    desc.output.push(row);
                    produced += 1;
                }
                None => break,
            }
        }
        Ok(())
    }
}

impl ExecFinishHook for HostDefaults {
    fn exec_finish(&self, _desc: &mut ExecDesc) -> Result<(), ExtensionError> {
        Ok(())
    }
}

impl ExecEndHook for HostDefaults {
    fn exec_end(&self, desc: &mut ExecDesc) -> Result<(), ExtensionError> {
        if let Some(mut node) = desc.state.take() {
            node.end()?;
        }
        Ok(())
    }
}

impl StatementHook for HostDefaults {
    fn process_statement(
        &self,
        stmt: &Statement,
        ctx: &StatementContext<'_>,
    ) -> Result<(), ExtensionError> {
        let created: Vec<ObjectId> = match stmt {
            Statement::CreateTable {
                name,
                columns,
                storage,
            } => vec![ctx.catalog.create_table(name, columns, *storage)?],
            Statement::CreateIndex(def) => vec![ctx.catalog.create_index(def)?],
            Statement::DropRelation { name } => {
                ctx.catalog.drop_relation(name)?;
                Vec::new()
            }
        };
        for id in created {
            let event = ObjectCreated {
                class: ObjectClass::Relation,
                object: id,
                sub_id: 0,
            };
            ctx.observers.head().object_created(&event, ctx);
        }
        Ok(())
    }
}

impl ObjectCreatedHook for HostDefaults {
    fn object_created(&self, _event: &ObjectCreated, _ctx: &StatementContext<'_>) {}
}

impl JoinCandidateHook for HostDefaults {
    fn join_candidates(&self, _rel: &mut JoinRel, _ctx: &PlanContext<'_>) {}
}

fn output_shape(targets: &[Expr]) -> Vec<ColumnRef> {
    targets
        .iter()
        .enumerate()
        .map(|(i, expr)| match expr {
            Expr::Column(c) => c.clone(),
            _ => ColumnRef {
                table: None,
                name: format!("col{}", i + 1),
                index: i as u32,
            },
        })
        .collect()
}

fn scan_of(table: &TableRef) -> PathFragment {
    PathFragment {
        kind: FragmentKind::SeqScan {
            table: table.clone(),
        },
        cost: Cost::new(100.0),
        rows: 1000.0,
        parameterized: false,
        output: Vec::new(),
        children: Vec::new(),
    }
}

fn scan_fragment(query: &Query) -> PathFragment {
    match query.range_tables.first() {
        Some(table) => scan_of(table),
        None => PathFragment {
            kind: FragmentKind::Values { rows: Vec::new() },
            cost: Cost::zero(),
            rows: 0.0,
            parameterized: false,
            output: Vec::new(),
            children: Vec::new(),
        },
    }
}

/// The host's candidate set for a two-relation join: a hash join and the
/// nested-loop fallback.
fn default_join_candidates(query: &Query) -> Vec<PathFragment> {
    let outer = scan_of(&query.range_tables[0]);
    let inner = scan_of(&query.range_tables[1]);
    let output = output_shape(&query.targets);
    vec![
        PathFragment {
            kind: FragmentKind::HashJoin {
                condition: query.quals.clone(),
            },
            cost: Cost::new(250.0),
            rows: 1000.0,
            parameterized: false,
            output: output.clone(),
            children: vec![outer.clone(), inner.clone()],
        },
        PathFragment {
            kind: FragmentKind::NestedLoopJoin {
                condition: query.quals.clone(),
            },
            cost: Cost::new(900.0),
            rows: 1000.0,
            parameterized: false,
            output,
            children: vec![outer, inner],
        },
    ]
}

fn cheapest(candidates: Vec<PathFragment>) -> Option<PathFragment> {
    candidates.into_iter().min_by(|a, b| {
        a.cost
            .total
            .partial_cmp(&b.cost.total)
            .unwrap_or(std::cmp::Ordering::Equal)
    })
}

/// Builds the pipeline registry. Interceptors install themselves here at
/// extension-initialization time; `build` freezes the result.
pub struct PipelineBuilder {
    catalog: Arc<dyn Catalog>,
    mode: ProcessingMode,
    analyze: HookChain<dyn AnalyzeHook>,
    plan: HookChain<dyn PlanHook>,
    exec_begin: HookChain<dyn ExecBeginHook>,
    exec_step: HookChain<dyn ExecStepHook>,
    exec_finish: HookChain<dyn ExecFinishHook>,
    exec_end: HookChain<dyn ExecEndHook>,
    statement: HookChain<dyn StatementHook>,
    object_created: HookChain<dyn ObjectCreatedHook>,
    join_candidates: HookChain<dyn JoinCandidateHook>,
}

impl PipelineBuilder {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self {
            catalog,
            mode: ProcessingMode::Normal,
            analyze: HookChain::new(Arc::new(HostDefaults) as Arc<dyn AnalyzeHook>),
            plan: HookChain::new(Arc::new(HostDefaults) as Arc<dyn PlanHook>),
            exec_begin: HookChain::new(Arc::new(HostDefaults) as Arc<dyn ExecBeginHook>),
            exec_step: HookChain::new(Arc::new(HostDefaults) as Arc<dyn ExecStepHook>),
            exec_finish: HookChain::new(Arc::new(HostDefaults) as Arc<dyn ExecFinishHook>),
            exec_end: HookChain::new(Arc::new(HostDefaults) as Arc<dyn ExecEndHook>),
            statement: HookChain::new(Arc::new(HostDefaults) as Arc<dyn StatementHook>),
            object_created: HookChain::new(Arc::new(HostDefaults) as Arc<dyn ObjectCreatedHook>),
            join_candidates: HookChain::new(Arc::new(HostDefaults) as Arc<dyn JoinCandidateHook>),
        }
    }

    pub fn with_mode(mut self, mode: ProcessingMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn install_analyze<F>(&mut self, wrap: F) -> &mut Self
    where
        F: FnOnce(Arc<dyn AnalyzeHook>) -> Arc<dyn AnalyzeHook>,
    {
        self.analyze.install(wrap);
        self
    }

    pub fn install_plan<F>(&mut self, wrap: F) -> &mut Self
    where
        F: FnOnce(Arc<dyn PlanHook>) -> Arc<dyn PlanHook>,
    {
        self.plan.install(wrap);
        self
    }

    pub fn install_exec_begin<F>(&mut self, wrap: F) -> &mut Self
    where
        F: FnOnce(Arc<dyn ExecBeginHook>) -> Arc<dyn ExecBeginHook>,
    {
        self.exec_begin.install(wrap);
        self
    }

    pub fn install_exec_step<F>(&mut self, wrap: F) -> &mut Self
    where
        F: FnOnce(Arc<dyn ExecStepHook>) -> Arc<dyn ExecStepHook>,
    {
        self.exec_step.install(wrap);
        self
    }

    pub fn install_exec_finish<F>(&mut self, wrap: F) -> &mut Self
    where
        F: FnOnce(Arc<dyn ExecFinishHook>) -> Arc<dyn ExecFinishHook>,
    {
        self.exec_finish.install(wrap);
        self
    }

    pub fn install_exec_end<F>(&mut self, wrap: F) -> &mut Self
    where
        F: FnOnce(Arc<dyn ExecEndHook>) -> Arc<dyn ExecEndHook>,
    {
        self.exec_end.install(wrap);
        self
    }

    pub fn install_statement<F>(&mut self, wrap: F) -> &mut Self
    where
        F: FnOnce(Arc<dyn StatementHook>) -> Arc<dyn StatementHook>,
    {
        self.statement.install(wrap);
        self
    }

    pub fn install_object_created<F>(&mut self, wrap: F) -> &mut Self
    where
        F: FnOnce(Arc<dyn ObjectCreatedHook>) -> Arc<dyn ObjectCreatedHook>,
    {
        self.object_created.install(wrap);
        self
    }

    pub fn install_join_candidates<F>(&mut self, wrap: F) -> &mut Self
    where
        F: FnOnce(Arc<dyn JoinCandidateHook>) -> Arc<dyn JoinCandidateHook>,
    {
        self.join_candidates.install(wrap);
        self
    }

    /// Freeze the registry. No further installation is possible.
    pub fn build(self) -> Pipeline {
        Pipeline {
            catalog: self.catalog,
            mode: self.mode,
            analyze: self.analyze,
            plan: self.plan,
            exec_begin: self.exec_begin,
            exec_step: self.exec_step,
            exec_finish: self.exec_finish,
            exec_end: self.exec_end,
            statement: self.statement,
            object_created: self.object_created,
            join_candidates: self.join_candidates,
        }
    }
}

/// The frozen pipeline registry: one handler chain per stage, shared
/// read-only across every query a session runs.
pub struct Pipeline {
    catalog: Arc<dyn Catalog>,
    mode: ProcessingMode,
    analyze: HookChain<dyn AnalyzeHook>,
    plan: HookChain<dyn PlanHook>,
    exec_begin: HookChain<dyn ExecBeginHook>,
    exec_step: HookChain<dyn ExecStepHook>,
    exec_finish: HookChain<dyn ExecFinishHook>,
    exec_end: HookChain<dyn ExecEndHook>,
    statement: HookChain<dyn StatementHook>,
    object_created: HookChain<dyn ObjectCreatedHook>,
    join_candidates: HookChain<dyn JoinCandidateHook>,
}

impl Pipeline {
    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    pub fn run_analyze(&self, query: &mut Query) -> Result<(), ExtensionError> {
        self.analyze.head().analyze(query)
    }

    pub fn run_plan(&self, query: &Query) -> Result<PlannedStatement, ExtensionError> {
        let ctx = PlanContext {
            catalog: self.catalog.as_ref(),
            join_hooks: &self.join_candidates,
        };
        self.plan.head().plan(query, &ctx)
    }

    pub fn run_exec_begin(&self, desc: &mut ExecDesc) -> Result<(), ExtensionError> {
        self.exec_begin.head().exec_begin(desc)
    }

    pub fn run_exec_step(&self, desc: &mut ExecDesc, count: u64) -> Result<(), ExtensionError> {
        self.exec_step.head().exec_step(desc, count)
    }

    pub fn run_exec_finish(&self, desc: &mut ExecDesc) -> Result<(), ExtensionError> {
        self.exec_finish.head().exec_finish(desc)
    }

    pub fn run_exec_end(&self, desc: &mut ExecDesc) -> Result<(), ExtensionError> {
        self.exec_end.head().exec_end(desc)
    }

    pub fn run_statement(&self, stmt: &Statement) -> Result<(), ExtensionError> {
        let ctx = StatementContext {
            catalog: self.catalog.as_ref(),
            observers: &self.object_created,
            mode: self.mode,
        };
        self.statement.head().process_statement(stmt, &ctx)
    }

    pub fn run_join_candidates(&self, rel: &mut JoinRel) {
        let ctx = PlanContext {
            catalog: self.catalog.as_ref(),
            join_hooks: &self.join_candidates,
        };
        self.join_candidates.head().join_candidates(rel, &ctx);
    }

    /// Run a query through analyze, plan, and the four execution stages.
    /// The end stage runs even when step or finish fails.
    pub fn execute_query(&self, query: &mut Query, count: u64) -> Result<Vec<Row>, ExtensionError> {
        self.run_analyze(query)?;
        let planned = self.run_plan(query)?;
        let mut desc = ExecDesc::new(planned);
        self.run_exec_begin(&mut desc)?;
        let run = self
            .run_exec_step(&mut desc, count)
            .and_then(|()| self.run_exec_finish(&mut desc));
        let end = self.run_exec_end(&mut desc);
        run?;
        end?;
        debug!(rows = desc.output.len(), "query executed");
        Ok(desc.take_output())
    }
}
