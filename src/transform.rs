// src/transform.rs

//! The pluggable computation carried by a connector.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::context::Context;
use crate::payload::Payload;
use crate::progress::Progress;

/// Error raised by a transform's `compute`.
#[derive(Error, Debug)]
pub enum TransformError {
    /// The transform observed a cancellation request on its progress handle
    /// and bailed out. The engine maps this to a benign restart when it was
    /// the one asking, and to a hard failure otherwise.
    #[error("computation cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(String),
}

impl From<anyhow::Error> for TransformError {
    fn from(err: anyhow::Error) -> Self {
        TransformError::Failed(format!("{err:#}"))
    }
}

/// An applicability-gated computation producing one payload from another.
///
/// Implementations are the actual phylogenetic algorithms (distance
/// estimation, split decomposition, network construction, ...); the engine
/// treats them as opaque. `compute` runs on a blocking thread and must poll
/// `progress.check_cancelled()` at reasonable intervals.
pub trait Transform: fmt::Debug + Send + Sync {
    /// Display name, also used when surfacing errors.
    fn name(&self) -> &str;

    /// Whether this transform can run against the given parent payload.
    /// Re-evaluated whenever the transform is bound or the parent data node
    /// becomes valid.
    fn is_applicable(&self, ctx: &Context, parent: &dyn Payload) -> bool;

    /// Compute the child payload from the parent payload. The child has been
    /// cleared before this is called.
    fn compute(
        &self,
        progress: &Progress,
        ctx: &Context,
        parent: &dyn Payload,
        child: &mut dyn Payload,
    ) -> Result<(), TransformError>;

    /// A fresh instance with the same configuration, for duplicating a
    /// workflow slice. The clone must be independent of `self`.
    fn duplicate(&self) -> Arc<dyn Transform>;
}
