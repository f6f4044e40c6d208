// src/engine/runtime.rs

use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::errors::Result;
use crate::exec::ExecutorBackend;
use crate::graph::node::ExecutionRequest;

use super::core::CoreEngine;
use super::{CoreCommand, WorkflowEvent};

/// Drives the workflow state machine in response to [`WorkflowEvent`]s,
/// and delegates actual execution dispatch to an [`ExecutorBackend`].
///
/// This is a pure IO shell around [`CoreEngine`], which contains all the
/// engine semantics. This struct handles async IO: reading events from the
/// channel and dispatching execution requests to the executor.
pub struct EngineRuntime<E: ExecutorBackend> {
    core: CoreEngine,
    event_rx: mpsc::Receiver<WorkflowEvent>,
    executor: E,
}

impl<E: ExecutorBackend> fmt::Debug for EngineRuntime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineRuntime")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl<E: ExecutorBackend> EngineRuntime<E> {
    pub fn new(core: CoreEngine, event_rx: mpsc::Receiver<WorkflowEvent>, executor: E) -> Self {
        Self {
            core,
            event_rx,
            executor,
        }
    }

    /// Main event loop.
    ///
    /// - Consumes [`WorkflowEvent`]s from `event_rx`.
    /// - Feeds them into the pure core.
    /// - Executes commands returned by the core (dispatch executions, exit).
    pub async fn run(mut self) -> Result<CoreEngine> {
        info!("workflow engine runtime started");

        loop {
            let event = match self.event_rx.recv().await {
                Some(e) => e,
                None => {
                    info!("engine event channel closed; exiting");
                    break;
                }
            };

            debug!(?event, "engine received event");

            // Feed the event into the pure core and get commands back.
            let step = self.core.step(event);

            // Execute the commands.
            for command in step.commands {
                self.execute_command(command).await?;
            }

            // If the core says to stop, break out of the loop.
            if !step.keep_running {
                info!("core requested exit; stopping runtime");
                break;
            }
        }

        info!("engine runtime exiting");
        Ok(self.core)
    }

    /// Execute a single command from the core.
    async fn execute_command(&mut self, command: CoreCommand) -> Result<()> {
        match command {
            CoreCommand::Dispatch(requests) => {
                self.dispatch(requests).await?;
            }
            CoreCommand::RequestExit => {
                // The core already returns keep_running=false alongside this
                // command; nothing extra to do here.
                info!("core issued RequestExit command");
            }
        }
        Ok(())
    }

    async fn dispatch(&mut self, requests: Vec<ExecutionRequest>) -> Result<()> {
        if requests.is_empty() {
            return Ok(());
        }

        let connectors: Vec<_> = requests.iter().map(|r| r.connector).collect();
        let exec_ids: Vec<_> = requests.iter().map(|r| r.exec_id).collect();
        debug!(?connectors, ?exec_ids, "dispatching executions");

        self.executor.dispatch(requests).await
    }
}
