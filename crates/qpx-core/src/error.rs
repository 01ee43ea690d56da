//! # Error Taxonomy
//!
//! Extension-level errors split into three families:
//!
//! - **Precondition violations** (`WrongObjectKind`): surfaced to the caller
//!   of a direct entry point, no partial state.
//! - **Consistency violations** (`MetadataMissing`, `MalformedMetadata`):
//!   the pipeline guarantee that metadata set at analysis survives to every
//!   later stage was broken by some interceptor in the chain. These are
//!   fatal for the statement -- proceeding with undefined state is worse
//!   than aborting.
//! - **Host failures** wrapped from [`CatalogError`].
//!
//! Soft no-op conditions (too few key columns, no qualifying candidate, a
//! vanished deferred candidate) are deliberately *not* errors anywhere in
//! this workspace; they are boolean-false results.

use crate::catalog::{CatalogError, RelationKind};
use crate::pipeline::PipelineStage;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtensionError {
    /// A direct entry point was handed an object of the wrong kind.
    #[error("\"{name}\" is not an index (found {kind})")]
    WrongObjectKind { name: String, kind: RelationKind },

    /// Metadata expected at this stage was never propagated to it.
    #[error("metadata key {key:?} missing at {stage} stage")]
    MetadataMissing {
        stage: PipelineStage,
        key: &'static str,
    },

    /// Metadata was present but not decodable as the expected encoding.
    #[error("metadata key {key:?} malformed at {stage} stage")]
    MalformedMetadata {
        stage: PipelineStage,
        key: &'static str,
    },

    /// A plan fragment violated a structural invariant (e.g. a join fragment
    /// without two children).
    #[error("malformed plan fragment: {0}")]
    PlanShape(&'static str),

    /// The execution protocol was driven out of order.
    #[error("execution protocol violation: {0}")]
    ExecProtocol(&'static str),

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}
