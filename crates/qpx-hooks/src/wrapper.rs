//! # Transparent Plan-Fragment Wrapper
//!
//! Intercepts join-candidate generation, picks one qualifying candidate
//! fragment, and substitutes a wrapper fragment in its place. The wrapper
//! advertises the chosen fragment's cost and row count unchanged and
//! forwards the entire execution protocol to it -- a strict pass-through
//! node. The host's cost-based selection among the remaining candidates is
//! otherwise undisturbed; when the wrapper wins, execution flows through
//! [`WrapperExec`] into the wrapped fragment's own executor.
//!
//! ## Qualification
//!
//! A join relation is skipped entirely when it is not an inner join, when
//! it is provably empty, or when any output expression references the
//! row-identity pseudo-variable (wrapping would break per-row identity
//! tracking). Among the candidates, the first unparameterized hash-join
//! fragment is chosen; if none exists, the hook is a no-op.
//!
//! ## Forwarding state machine
//!
//! `Uninitialized -> Active -> Ended`. Begin creates exactly one child
//! execution state. Step delegates directly -- the wrapper produces no rows
//! of its own. Rescan hands the changed-parameter set down before
//! restarting the child, because the custom-node framework does not
//! auto-propagate parameter changes below one level of children. End clears
//! the held output buffer and ends the child; it runs on every exit path,
//! including early termination.

use qpx_core::error::ExtensionError;
use qpx_core::exec::{ExecFactory, ExecNode, ParamSet, Row};
use qpx_core::expr::{ColumnRef, JoinType};
use qpx_core::pipeline::{JoinCandidateHook, PipelineBuilder, PlanContext};
use qpx_core::plan::{FragmentKind, JoinRel, PathFragment};
use std::sync::Arc;
use tracing::debug;

/// Display name of the substituted fragment.
pub const WRAPPER_FRAGMENT_NAME: &str = "transparent-wrapper";

/// Whether a fragment is one of our wrappers.
pub fn is_wrapper(fragment: &PathFragment) -> bool {
    matches!(
        &fragment.kind,
        FragmentKind::Custom { name, .. } if *name == WRAPPER_FRAGMENT_NAME
    )
}

/// Build a wrapper fragment around `child`.
///
/// Cost and row count are copied through unchanged -- the wrapper adds no
/// cost of its own -- and the output shape is the join relation's required
/// shape. The wrapper has exactly one child, always.
pub fn wrap_fragment(child: PathFragment, output: &[ColumnRef]) -> PathFragment {
    PathFragment {
        kind: FragmentKind::Custom {
            name: WRAPPER_FRAGMENT_NAME,
            factory: Arc::new(WrapperExecFactory),
        },
        cost: child.cost,
        rows: child.rows,
        parameterized: child.parameterized,
        output: output.to_vec(),
        children: vec![child],
    }
}

struct WrapJoinCandidates {
    next: Arc<dyn JoinCandidateHook>,
}

impl JoinCandidateHook for WrapJoinCandidates {
    fn join_candidates(&self, rel: &mut JoinRel, ctx: &PlanContext<'_>) {
        // Earlier-registered extensions see the unmodified candidate set.
        self.next.join_candidates(rel, ctx);

        if rel.join_type != JoinType::Inner || rel.is_dummy {
            return;
        }
        if rel.targets.iter().any(|t| t.references_row_identity()) {
            return;
        }
        let Some(position) = rel
            .candidates
            .iter()
            .position(|c| c.is_hash_join() && !c.parameterized)
        else {
            return;
        };

        // One-for-one substitution, not an addition.
        let chosen = rel.candidates.remove(position);
        debug!(
            cost = chosen.cost.total,
            rows = chosen.rows,
            "substituting wrapper for hash-join candidate"
        );
        let wrapper = wrap_fragment(chosen, &rel.output);
        rel.candidates.insert(position, wrapper);
    }
}

struct WrapperExecFactory;

impl ExecFactory for WrapperExecFactory {
    fn create_exec(&self, fragment: &PathFragment) -> Result<Box<dyn ExecNode>, ExtensionError> {
        let [child] = fragment.children.as_slice() else {
            return Err(ExtensionError::PlanShape(
                "wrapper fragment requires exactly one child",
            ));
        };
        Ok(Box::new(WrapperExec::new(child.clone())))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WrapperState {
    Uninitialized,
    Active,
    Ended,
}

/// Pass-through execution state over one wrapped fragment.
pub struct WrapperExec {
    child_fragment: PathFragment,
    child: Option<Box<dyn ExecNode>>,
    state: WrapperState,
    chgparam: ParamSet,
    /// The wrapper's output slot: mirrors the child's most recent row.
    buffer: Option<Row>,
}

impl WrapperExec {
    pub fn new(child_fragment: PathFragment) -> Self {
        Self {
            child_fragment,
            child: None,
            state: WrapperState::Uninitialized,
            chgparam: ParamSet::new(),
            buffer: None,
        }
    }
}

impl ExecNode for WrapperExec {
    fn begin(&mut self) -> Result<(), ExtensionError> {
        if self.state != WrapperState::Uninitialized {
            return Err(ExtensionError::ExecProtocol("wrapper begin invoked twice"));
        }
        let mut child = self.child_fragment.create_exec()?;
        if let Err(err) = child.begin() {
            let _ = child.end();
            return Err(err);
        }
        self.child = Some(child);
        self.state = WrapperState::Active;
        Ok(())
    }

    fn step(&mut self) -> Result<Option<Row>, ExtensionError> {
        if self.state != WrapperState::Active {
            return Err(ExtensionError::ExecProtocol("wrapper step outside active state"));
        }
        let Some(child) = self.child.as_mut() else {
            return Err(ExtensionError::ExecProtocol("wrapper active without child"));
        };
        // Strictly pass-through: no rows of our own, no transformation.
        let row = child.step()?;
        self.buffer = row.clone();
        Ok(row)
    }

    fn rescan(&mut self, changed: &ParamSet) -> Result<(), ExtensionError> {
        if self.state != WrapperState::Active {
            return Err(ExtensionError::ExecProtocol("wrapper rescan outside active state"));
        }
        let Some(child) = self.child.as_mut() else {
            return Err(ExtensionError::ExecProtocol("wrapper active without child"));
        };
        self.buffer = None;
        // Hand accumulated parameter changes down with the restart; the
        // framework stops auto-propagation one level below this node.
        self.chgparam.merge(changed);
        let propagate = std::mem::take(&mut self.chgparam);
        child.rescan(&propagate)
    }

    fn end(&mut self) -> Result<(), ExtensionError> {
        // Clear the held output buffer before releasing the child.
        self.buffer = None;
        self.state = WrapperState::Ended;
        if let Some(mut child) = self.child.take() {
            child.end()?;
        }
        Ok(())
    }
}

/// Install the wrapper on the join-candidate stage.
pub fn install(builder: &mut PipelineBuilder) {
    builder.install_join_candidates(|next| Arc::new(WrapJoinCandidates { next }));
}
