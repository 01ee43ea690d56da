//! # qpx-hooks: The Shipped Pipeline Interceptors
//!
//! This crate provides the interceptors that ship with the extension,
//! built on the chains and types of `qpx-core`:
//!
//! - **`fingerprint`**: Computes a structural query fingerprint and literal
//!   location list at analysis time and verifies their propagation at every
//!   later stage.
//! - **`deferred`**: Collects relations created during a statement and
//!   reprocesses them after the statement completes, with revalidation
//!   against concurrent invalidation.
//! - **`stats_builder`**: Synthesizes multivariate statistics
//!   specifications from multi-column indexes; also exposed as the direct
//!   entry point `build_extended_statistic`.
//! - **`wrapper`**: Substitutes a transparent pass-through node for a
//!   qualifying join candidate and forwards the execution protocol to it.
//!
//! Each module has an `install` function that chains its handlers onto a
//! [`PipelineBuilder`]; [`install_default_hooks`] installs the full set.

pub mod deferred;
pub mod fingerprint;
pub mod stats_builder;
pub mod wrapper;

use qpx_core::pipeline::PipelineBuilder;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

pub use deferred::DeferredStatsQueue;
pub use stats_builder::build_extended_statistic;

/// Install every shipped interceptor.
///
/// `fingerprinting` is the process-wide enablement switch for the
/// fingerprint propagator, read once per stage invocation; the host's
/// configuration layer owns the toggle. Returns the deferred statistics
/// queue so callers can inspect it.
pub fn install_default_hooks(
    builder: &mut PipelineBuilder,
    fingerprinting: Arc<AtomicBool>,
) -> Arc<DeferredStatsQueue> {
    fingerprint::install(builder, fingerprinting);
    wrapper::install(builder);
    deferred::install(builder)
}
