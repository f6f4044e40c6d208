// src/types.rs

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Process-unique identifier of a workflow node (data node or connector).
///
/// Ids are handed out by a global atomic sequence so that nodes created from
/// any thread (e.g. loaders running off the coordinator) can never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

static NODE_SEQ: AtomicU64 = AtomicU64::new(1);

/// Allocate the next process-unique node id.
pub fn next_node_id() -> NodeId {
    NodeId(NODE_SEQ.fetch_add(1, Ordering::Relaxed))
}

/// Identifier of one execution attempt of a connector.
///
/// The workflow hands out a fresh `ExecId` every time a connector starts
/// computing. Completion events carry the id back, which lets the engine
/// drop events from executions that have since been superseded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ExecId(pub u64);

impl fmt::Display for ExecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// Lifecycle state of a workflow node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeState {
    /// The node's payload reflects its inputs.
    Valid,
    /// The node's payload is stale; a connector in this state is waiting for
    /// its parent data node to become valid.
    Invalid,
    /// A connector in this state has an execution in flight (or a restart
    /// pending). Data nodes never compute.
    Computing,
    /// The transform raised a hard error; stays failed until an explicit
    /// force-recompute.
    Failed,
    /// The transform declined the current input. Terminal until the
    /// transform or the parent payload changes.
    NotApplicable,
}

impl NodeState {
    /// Whether the node counts as settled for the workflow's aggregate
    /// "anything still settling" flag. Deliberately `{Valid, Failed}` only:
    /// a not-applicable connector stays tracked so callers can see it.
    pub fn is_settled(self) -> bool {
        matches!(self, NodeState::Valid | NodeState::Failed)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeState::Valid => "valid",
            NodeState::Invalid => "invalid",
            NodeState::Computing => "computing",
            NodeState::Failed => "failed",
            NodeState::NotApplicable => "not-applicable",
        };
        f.write_str(s)
    }
}

/// Terminal outcome of one execution, reported back to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    /// The transform completed and the child payload holds its output.
    Success,
    /// The engine cancelled this execution (superseding edit, deletion);
    /// benign, the connector retries instead of failing.
    RestartRequested,
    /// The transform raised a hard error; carries the surfaced message.
    Failed(String),
}
