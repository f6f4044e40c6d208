//! A fake executor backend for runtime tests.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use phyloflow::engine::WorkflowEvent;
use phyloflow::errors::Result;
use phyloflow::exec::ExecutorBackend;
use phyloflow::graph::node::ExecutionRequest;
use phyloflow::types::{ExecOutcome, NodeId};

/// An executor that never runs a transform:
/// - records which connectors were dispatched
/// - immediately reports `ExecutionFinished(Success)` for each request.
pub struct FakeExecutor {
    events_tx: mpsc::Sender<WorkflowEvent>,
    executed: Arc<Mutex<Vec<NodeId>>>,
}

impl FakeExecutor {
    pub fn new(events_tx: mpsc::Sender<WorkflowEvent>) -> Self {
        Self {
            events_tx,
            executed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shared record of dispatched connectors, in dispatch order.
    pub fn executed(&self) -> Arc<Mutex<Vec<NodeId>>> {
        self.executed.clone()
    }
}

impl ExecutorBackend for FakeExecutor {
    fn dispatch(
        &mut self,
        requests: Vec<ExecutionRequest>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.events_tx.clone();
        let executed = Arc::clone(&self.executed);

        Box::pin(async move {
            for request in requests {
                {
                    let mut guard = executed.lock().unwrap();
                    guard.push(request.connector);
                }

                tx.send(WorkflowEvent::ExecutionFinished {
                    connector: request.connector,
                    exec_id: request.exec_id,
                    outcome: ExecOutcome::Success,
                })
                .await
                .map_err(anyhow::Error::from)?;
            }
            Ok(())
        })
    }
}
