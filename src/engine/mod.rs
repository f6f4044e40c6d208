// src/engine/mod.rs

//! Orchestration engine for the workflow graph.
//!
//! This module ties together:
//! - the workflow registry and its state machine
//! - the main event loop that reacts to:
//!   - execution completion events
//!   - external data edits/loads
//!   - force-recompute requests
//!   - shutdown signals
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

use crate::types::{ExecId, ExecOutcome, NodeId};

/// Runtime options used by both the core and the async shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineOptions {
    /// If true, exit the runtime once every node is settled (used by tests
    /// and one-shot embedders).
    pub exit_when_settled: bool,
}

/// Events flowing into the engine from executions and the embedding
/// application.
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    /// An execution reached a terminal outcome.
    ExecutionFinished {
        connector: NodeId,
        exec_id: ExecId,
        outcome: ExecOutcome,
    },
    /// A data node's payload was edited in place; descendants must
    /// recompute against the new content.
    DataEdited { node: NodeId },
    /// A data node's payload was filled externally (loader); the node
    /// becomes valid and waiting consumers may start.
    DataLoaded { node: NodeId },
    /// Recompute a connector regardless of its current state.
    ForceRecompute { node: NodeId },
    /// Graceful shutdown requested.
    ShutdownRequested,
}

pub mod core;
pub mod event_handlers;
pub mod runtime;

pub use self::core::CoreEngine;
pub use event_handlers::{CoreCommand, CoreStep};
pub use runtime::EngineRuntime;
