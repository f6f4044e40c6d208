// src/lib.rs

//! phyloflow: the workflow engine of a phylogenetics workbench.
//!
//! A workflow is a directed graph of typed data containers ([`graph::DataNode`])
//! and transform edges ([`graph::Connector`]), each carrying a lifecycle
//! state. The engine keeps the graph consistent while payloads are edited,
//! transforms are (re)run asynchronously, and the topology itself is edited
//! concurrently with background computation.
//!
//! Architecture: a pure core state machine ([`engine::CoreEngine`]) owned by
//! a single coordinator, an async IO shell ([`engine::EngineRuntime`]) that
//! feeds it events from an mpsc channel, and an executor backend
//! ([`exec::ExecutorBackend`]) that runs transforms on background tasks and
//! reports terminal outcomes back as events.

pub mod context;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod graph;
pub mod logging;
pub mod payload;
pub mod progress;
pub mod transform;
pub mod types;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::engine::{CoreEngine, EngineRuntime, WorkflowEvent};
use crate::errors::Result;
use crate::exec::RealExecutorBackend;

/// High-level entry point for embedders.
///
/// Wires together the engine runtime and the real executor backend, spawns
/// the event loop, and returns the event sender plus the join handle (which
/// yields the final core when the loop exits).
///
/// Must be called from within a Tokio runtime.
pub fn start_engine(core: CoreEngine) -> (mpsc::Sender<WorkflowEvent>, JoinHandle<Result<CoreEngine>>) {
    let (tx, rx) = mpsc::channel::<WorkflowEvent>(64);

    let executor = RealExecutorBackend::new(tx.clone());
    let runtime = EngineRuntime::new(core, rx, executor);
    let handle = tokio::spawn(runtime.run());

    (tx, handle)
}
