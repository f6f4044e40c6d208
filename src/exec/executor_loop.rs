// src/exec/executor_loop.rs

//! Background dispatch loop for executions.

use tokio::sync::mpsc;
use tracing::info;

use crate::engine::WorkflowEvent;
use crate::graph::node::ExecutionRequest;

use super::execution::run_execution;

/// Spawn the background executor loop.
///
/// The returned `mpsc::Sender<ExecutionRequest>` is what
/// [`RealExecutorBackend`] forwards requests to. Each execution runs in its
/// own Tokio task, so executions of unrelated connectors proceed in
/// parallel; executions targeting the same payload serialize on its write
/// lock.
///
/// [`RealExecutorBackend`]: crate::exec::RealExecutorBackend
pub fn spawn_executor(events_tx: mpsc::Sender<WorkflowEvent>) -> mpsc::Sender<ExecutionRequest> {
    let (tx, mut rx) = mpsc::channel::<ExecutionRequest>(32);

    tokio::spawn(async move {
        info!("executor loop started");
        while let Some(request) = rx.recv().await {
            let events_tx = events_tx.clone();
            tokio::spawn(async move {
                run_execution(request, events_tx).await;
            });
        }
        info!("executor loop finished (channel closed)");
    });

    tx
}
