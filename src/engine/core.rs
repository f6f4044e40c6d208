// src/engine/core.rs

//! Pure core engine state machine.
//!
//! This module contains a synchronous, deterministic "core engine" that
//! consumes [`WorkflowEvent`]s and produces:
//! - an updated workflow state
//! - a list of "commands" describing what the IO shell should do next
//!
//! The async/IO-heavy shell (`engine::runtime::EngineRuntime`) is
//! responsible for:
//! - reading events from channels
//! - handing execution requests to the executor backend
//! - shutdown handling
//!
//! The core is intended to be extensively unit tested without any Tokio,
//! channels, or background threads.

use crate::engine::event_handlers::{
    handle_data_edited, handle_data_loaded, handle_execution_finished, handle_force_recompute,
    CoreStep,
};
use crate::engine::{EngineOptions, WorkflowEvent};
use crate::graph::Workflow;

/// Pure core engine state.
///
/// This owns the workflow registry and the engine options. It has **no**
/// channels, no Tokio types, and does not perform any IO. It is the
/// single-threaded coordinator: all state transitions and topology edits go
/// through its owner.
#[derive(Debug)]
pub struct CoreEngine {
    workflow: Workflow,
    options: EngineOptions,
}

impl CoreEngine {
    pub fn new(workflow: Workflow, options: EngineOptions) -> Self {
        Self { workflow, options }
    }

    /// Direct access to the workflow for topology edits and inspection.
    /// Only the coordinator that owns this engine may call this.
    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn workflow_mut(&mut self) -> &mut Workflow {
        &mut self.workflow
    }

    /// Expose the aggregate settled flag (for tests and embedders).
    pub fn is_settled(&self) -> bool {
        self.workflow.is_settled()
    }

    /// Handle a single workflow event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: WorkflowEvent) -> CoreStep {
        match event {
            WorkflowEvent::ExecutionFinished {
                connector,
                exec_id,
                outcome,
            } => handle_execution_finished(
                &mut self.workflow,
                &self.options,
                connector,
                exec_id,
                outcome,
            ),
            WorkflowEvent::DataEdited { node } => handle_data_edited(&mut self.workflow, node),
            WorkflowEvent::DataLoaded { node } => {
                handle_data_loaded(&mut self.workflow, &self.options, node)
            }
            WorkflowEvent::ForceRecompute { node } => {
                handle_force_recompute(&mut self.workflow, node)
            }
            WorkflowEvent::ShutdownRequested => CoreStep {
                commands: Vec::new(),
                keep_running: false,
            },
        }
    }
}
