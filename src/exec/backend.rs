// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The runtime talks to an `ExecutorBackend` instead of a raw mpsc sender.
//! This makes it easy to swap in a fake executor in tests while keeping the
//! production executor implementation in [`executor_loop`].
//!
//! - [`RealExecutorBackend`] is the default implementation. It wraps the
//!   dispatch loop and just forwards execution requests over an mpsc
//!   channel.
//! - Tests can provide their own `ExecutorBackend` that, for example,
//!   records which executions were requested and directly emits
//!   `ExecutionFinished` events.
//!
//! [`executor_loop`]: crate::exec::executor_loop

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

use crate::engine::WorkflowEvent;
use crate::errors::{Result, WorkflowError};
use crate::graph::node::ExecutionRequest;

use super::executor_loop::spawn_executor;

/// Trait abstracting how execution requests are run.
///
/// Production code uses [`RealExecutorBackend`]; tests can provide their own
/// implementation that doesn't run real transforms.
pub trait ExecutorBackend: Send {
    /// Dispatch the given execution requests.
    ///
    /// The implementation is free to:
    /// - spawn background tasks running the transforms (production)
    /// - simulate completion and emit `WorkflowEvent`s (tests)
    fn dispatch(
        &mut self,
        requests: Vec<ExecutionRequest>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Real executor backend used in production.
///
/// Internally, this just wraps the dispatch loop in [`spawn_executor`]. The
/// runtime calls `dispatch`, which forwards the requests to the background
/// executor via an mpsc channel.
pub struct RealExecutorBackend {
    tx: mpsc::Sender<ExecutionRequest>,
}

impl RealExecutorBackend {
    /// Create a new real executor backend, wiring it to the given engine
    /// event sender.
    ///
    /// This spawns the background dispatch loop immediately.
    pub fn new(events_tx: mpsc::Sender<WorkflowEvent>) -> Self {
        let tx = spawn_executor(events_tx);
        Self { tx }
    }
}

impl ExecutorBackend for RealExecutorBackend {
    fn dispatch(
        &mut self,
        requests: Vec<ExecutionRequest>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        // Clone the sender so the future doesn't borrow `self` across `await`.
        let tx = self.tx.clone();

        Box::pin(async move {
            for request in requests {
                tx.send(request)
                    .await
                    .map_err(|_| WorkflowError::ExecutorClosed)?;
            }
            Ok(())
        })
    }
}
