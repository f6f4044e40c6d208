// src/graph/node.rs

//! Node records owned by the workflow registry.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::context::Context;
use crate::payload::{Payload, SharedPayload};
use crate::progress::Progress;
use crate::transform::Transform;
use crate::types::{ExecId, NodeId, NodeState};

/// A data node: owns exactly one payload, has at most one parent connector
/// and an ordered list of child connectors.
///
/// The payload handle is created with the node and never reassigned; recompute
/// replaces its content in place. Insertion order of `children` is the stable
/// display/iteration order used for duplication and printing.
#[derive(Debug)]
pub struct DataNode {
    pub id: NodeId,
    pub title: String,
    state: NodeState,
    pub path_id: u32,
    pub payload: SharedPayload,
    /// Blank payload of the same concrete type, kept so duplication can mint
    /// fresh empty payloads without having to lock `payload`.
    pub(crate) prototype: Box<dyn Payload>,
    /// Owning connector, `None` for workflow roots.
    pub parent: Option<NodeId>,
    /// Child connectors, in insertion order.
    pub children: Vec<NodeId>,
}

impl DataNode {
    pub(crate) fn new(title: String, payload: Box<dyn Payload>) -> Self {
        let prototype = payload.new_empty();
        Self {
            id: crate::types::next_node_id(),
            title,
            state: NodeState::Invalid,
            path_id: 0,
            payload: crate::payload::share(payload),
            prototype,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    /// Raw state write. Only `graph::state` calls this; everything else goes
    /// through the state-machine entry point so the transition side effects
    /// (cancellation, cascading invalidation) cannot be skipped.
    pub(crate) fn set_state_raw(&mut self, state: NodeState) {
        self.state = state;
    }
}

/// Handle to a connector's in-flight execution.
#[derive(Debug, Clone)]
pub struct ExecHandle {
    pub exec_id: ExecId,
    pub token: CancellationToken,
    pub progress: Progress,
}

/// A connector: the edge binding a transform between one parent data node
/// and one child data node, and driving its execution.
#[derive(Debug)]
pub struct Connector {
    pub id: NodeId,
    pub title: String,
    state: NodeState,
    pub path_id: u32,
    /// Parent data node.
    pub parent: NodeId,
    /// Child data node.
    pub child: NodeId,
    pub transform: Option<Arc<dyn Transform>>,
    /// Derived: transform present and applicable to the parent payload.
    /// Refreshed when the transform is bound or the parent becomes valid.
    pub applicable: bool,
    /// In-flight execution, if any. Cleared by the terminal event.
    pub current_exec: Option<ExecHandle>,
    /// A superseding edit arrived while an execution was in flight; the
    /// replacement starts once the old execution's terminal event arrives.
    pub restart_pending: bool,
    /// Message of the last hard failure, for the UI.
    pub last_error: Option<String>,
}

impl Connector {
    pub(crate) fn new(parent: NodeId, child: NodeId, transform: Option<Arc<dyn Transform>>) -> Self {
        let title = transform
            .as_ref()
            .map(|t| t.name().to_string())
            .unwrap_or_else(|| "unconnected".to_string());
        Self {
            id: crate::types::next_node_id(),
            title,
            state: NodeState::Invalid,
            path_id: 0,
            parent,
            child,
            transform,
            applicable: false,
            current_exec: None,
            restart_pending: false,
            last_error: None,
        }
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub(crate) fn set_state_raw(&mut self, state: NodeState) {
        self.state = state;
    }

    /// Progress of the in-flight execution, if one is running.
    pub fn progress(&self) -> Option<&Progress> {
        self.current_exec.as_ref().map(|h| &h.progress)
    }
}

/// Everything an executor needs to run one transform invocation.
///
/// Produced by the workflow when a connector is promoted to `Computing` and
/// handed to the executor backend by the engine.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub connector: NodeId,
    pub exec_id: ExecId,
    pub token: CancellationToken,
    pub progress: Progress,
    pub transform: Arc<dyn Transform>,
    pub ctx: Arc<Context>,
    pub parent_payload: SharedPayload,
    pub child_payload: SharedPayload,
    /// Transform display name, for logging and error messages.
    pub transform_name: String,
}

/// A node removed by `Workflow::delete`, returned so callers can implement
/// undo via `Workflow::reconnect`.
#[derive(Debug)]
pub enum RemovedNode {
    Data(DataNode),
    Connector(Connector),
}

impl RemovedNode {
    pub fn id(&self) -> NodeId {
        match self {
            RemovedNode::Data(n) => n.id,
            RemovedNode::Connector(c) => c.id,
        }
    }
}
