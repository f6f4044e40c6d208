// src/exec/execution.rs

//! A single transform invocation.
//!
//! One execution:
//! 1. takes a read lock on the parent payload and the exclusive write lock
//!    on the child payload (parent before child; executions lock along
//!    descending depth, so the ordering is deadlock-free),
//! 2. clears the child payload so the transform never sees stale partial
//!    output,
//! 3. runs `Transform::compute` on a blocking thread with the progress
//!    handle,
//! 4. maps the result to an [`ExecOutcome`] and reports it to the engine.
//!
//! Cancellation is cooperative: the engine cancels the request's token and
//! the transform is expected to notice via its progress handle. A transform
//! that reports cancellation the engine did not request is treated as a hard
//! failure.

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::engine::WorkflowEvent;
use crate::graph::node::ExecutionRequest;
use crate::transform::TransformError;
use crate::types::ExecOutcome;

/// Run a single execution and emit the `ExecutionFinished` event.
pub async fn run_execution(request: ExecutionRequest, events_tx: mpsc::Sender<WorkflowEvent>) {
    let connector = request.connector;
    let exec_id = request.exec_id;

    let outcome = run_execution_inner(request).await;

    match &outcome {
        ExecOutcome::Success => debug!(%connector, %exec_id, "execution succeeded"),
        ExecOutcome::RestartRequested => {
            debug!(%connector, %exec_id, "execution cancelled by engine")
        }
        ExecOutcome::Failed(message) => {
            warn!(%connector, %exec_id, error = %message, "execution failed")
        }
    }

    if events_tx
        .send(WorkflowEvent::ExecutionFinished {
            connector,
            exec_id,
            outcome,
        })
        .await
        .is_err()
    {
        // Engine gone (shutdown); nothing left to notify.
        debug!(%connector, %exec_id, "engine channel closed; dropping outcome");
    }
}

async fn run_execution_inner(request: ExecutionRequest) -> ExecOutcome {
    let ExecutionRequest {
        connector,
        exec_id,
        token,
        progress,
        transform,
        ctx,
        parent_payload,
        child_payload,
        transform_name,
    } = request;

    info!(%connector, %exec_id, transform = %transform_name, "starting execution");

    // Parent read lock first, then the exclusive child write lock. A second
    // execution targeting the same child blocks here until we are done.
    let parent_guard = parent_payload.read_owned().await;
    let mut child_guard = child_payload.write_owned().await;

    // Superseded while waiting for the locks?
    if token.is_cancelled() {
        return ExecOutcome::RestartRequested;
    }

    // Fresh-start semantics.
    child_guard.clear();

    let result = tokio::task::spawn_blocking(move || {
        let result = transform.compute(&progress, &ctx, &**parent_guard, &mut **child_guard);
        // Guards drop here, releasing the payload locks with the thread.
        result
    })
    .await;

    match result {
        Ok(Ok(())) => ExecOutcome::Success,
        Ok(Err(TransformError::Cancelled)) => {
            if token.is_cancelled() {
                ExecOutcome::RestartRequested
            } else {
                // The transform claims cancellation nobody asked for.
                ExecOutcome::Failed(format!(
                    "{transform_name}: reported cancellation without a cancel request"
                ))
            }
        }
        Ok(Err(TransformError::Failed(message))) => {
            ExecOutcome::Failed(format!("{transform_name}: {message}"))
        }
        Err(join_err) => {
            let message = if join_err.is_panic() {
                match join_err.into_panic().downcast::<String>() {
                    Ok(s) => *s,
                    Err(payload) => match payload.downcast::<&'static str>() {
                        Ok(s) => (*s).to_string(),
                        Err(_) => "panicked".to_string(),
                    },
                }
            } else {
                "execution task aborted".to_string()
            };
            error!(%connector, %exec_id, transform = %transform_name, %message, "transform panicked");
            ExecOutcome::Failed(format!("{transform_name}: {message}"))
        }
    }
}
