// src/graph/state.rs

//! State-machine transitions and invalidation propagation.
//!
//! Every state change goes through [`request_state`]; transitions have side
//! effects (cancellation, cascading invalidation, execution scheduling) that
//! must never be skipped, so the state fields themselves are private to the
//! graph module. All functions here are synchronous and complete without
//! yielding; they are only ever called by the coordinator that owns the
//! [`Workflow`].

use tracing::{debug, error, warn};

use crate::graph::node::ExecHandle;
use crate::graph::workflow::Workflow;
use crate::progress::Progress;
use crate::types::{ExecId, ExecOutcome, NodeId, NodeState};

use tokio_util::sync::CancellationToken;

/// State-machine entry point for both data nodes and connectors.
pub(crate) fn request_state(wf: &mut Workflow, node: NodeId, target: NodeState) {
    if wf.connectors.contains_key(&node) {
        request_connector_state(wf, node, target);
    } else if wf.data_nodes.contains_key(&node) {
        request_data_state(wf, node, target);
    } else {
        debug!(%node, ?target, "state request for unknown node; ignoring");
    }
}

/// Apply a requested state to a data node.
///
/// Non-terminal targets cascade `Invalid` into every child connector
/// synchronously, so the whole subtree sees the invalidation before any
/// descendant gets a chance to start a new execution. A data node never
/// computes by itself.
fn request_data_state(wf: &mut Workflow, node: NodeId, target: NodeState) {
    match target {
        NodeState::Invalid | NodeState::Computing => {
            set_data_state(wf, node, target);

            let children = match wf.data_nodes.get(&node) {
                Some(n) => n.children.clone(),
                None => return,
            };
            for conn in children {
                request_connector_state(wf, conn, NodeState::Invalid);
            }
        }
        NodeState::Valid => {
            set_data_state(wf, node, NodeState::Valid);

            let children = match wf.data_nodes.get(&node) {
                Some(n) => n.children.clone(),
                None => return,
            };
            let force_all = wf.working == Some(node);
            for conn in children {
                if force_all {
                    // The working node feeds every attached consumer; all of
                    // them recompute when it changes, not just the invalid
                    // ones.
                    connector_invalid_handler(wf, conn);
                    continue;
                }
                // Parent-became-valid notification: waiting connectors
                // promote themselves, and not-applicable ones re-probe
                // against the fresh parent payload.
                let state = wf.connectors.get(&conn).map(|c| c.state());
                if matches!(
                    state,
                    Some(NodeState::Invalid) | Some(NodeState::NotApplicable)
                ) {
                    connector_invalid_handler(wf, conn);
                }
            }
        }
        NodeState::Failed => {
            set_data_state(wf, node, NodeState::Failed);
        }
        NodeState::NotApplicable => {
            warn!(%node, "not-applicable is a connector state; ignoring request on data node");
        }
    }
}

/// Apply a requested state to a connector.
fn request_connector_state(wf: &mut Workflow, conn: NodeId, target: NodeState) {
    match target {
        NodeState::Invalid => connector_invalid_handler(wf, conn),
        NodeState::Valid => set_connector_state(wf, conn, NodeState::Valid),
        NodeState::Computing => {
            // Only the invalid handler may promote a connector to computing.
            panic!("Computing must not be requested directly on {conn}");
        }
        NodeState::Failed => set_connector_state(wf, conn, NodeState::Failed),
        NodeState::NotApplicable => set_connector_state(wf, conn, NodeState::NotApplicable),
    }
}

/// The `Invalid` handler: the one place where a connector decides between
/// `NotApplicable`, `Invalid` (wait for parent) and `Computing` (schedule an
/// execution). `force_recompute` is this handler, applied regardless of the
/// connector's current state.
pub(crate) fn connector_invalid_handler(wf: &mut Workflow, conn: NodeId) {
    let (parent, child) = match wf.connectors.get(&conn) {
        Some(c) => (c.parent, c.child),
        None => {
            debug!(%conn, "invalid handler for unknown connector; ignoring");
            return;
        }
    };

    let parent_valid = wf.data_nodes.get(&parent).map(|n| n.state()) == Some(NodeState::Valid);

    refresh_applicability(wf, conn, parent_valid);

    let Some(c) = wf.connectors.get_mut(&conn) else {
        return;
    };

    if !c.applicable {
        // Cancel whatever is in flight; its terminal event will be dropped
        // as stale once the handle is replaced on the next start.
        cancel_in_flight(c);
        c.restart_pending = false;
        set_connector_state(wf, conn, NodeState::NotApplicable);
        request_data_state(wf, child, NodeState::Invalid);
        return;
    }

    let had_exec = cancel_in_flight(c);

    // Invalidate the subtree before anything new may start.
    request_data_state(wf, child, NodeState::Invalid);

    if parent_valid {
        set_connector_state(wf, conn, NodeState::Computing);
        if had_exec {
            // Wait for the cancelled execution's terminal event before
            // starting the replacement; two executions of one connector must
            // never run concurrently.
            if let Some(c) = wf.connectors.get_mut(&conn) {
                c.restart_pending = true;
            }
            debug!(%conn, "restart pending until in-flight execution terminates");
        } else {
            start_execution(wf, conn);
        }
    } else {
        if let Some(c) = wf.connectors.get_mut(&conn) {
            c.restart_pending = false;
        }
        set_connector_state(wf, conn, NodeState::Invalid);
        debug!(%conn, "parent not valid; connector waiting");
    }
}

/// Handle the terminal event of an execution.
///
/// Events for deleted connectors or superseded executions are dropped; the
/// `ExecId` comparison is what makes "cancel, then replace" race-free.
pub(crate) fn on_execution_finished(
    wf: &mut Workflow,
    conn: NodeId,
    exec_id: ExecId,
    outcome: ExecOutcome,
) {
    let Some(c) = wf.connectors.get_mut(&conn) else {
        debug!(%conn, %exec_id, "execution finished for deleted connector; dropping");
        return;
    };
    match &c.current_exec {
        Some(h) if h.exec_id == exec_id => {}
        _ => {
            debug!(%conn, %exec_id, "stale execution event; dropping");
            return;
        }
    }
    c.current_exec = None;

    let restart = c.restart_pending;
    c.restart_pending = false;
    if restart {
        debug!(%conn, %exec_id, ?outcome, "superseded execution terminated; restarting");
        connector_invalid_handler(wf, conn);
        return;
    }

    match outcome {
        ExecOutcome::Success => {
            let child = c.child;
            set_connector_state(wf, conn, NodeState::Valid);
            request_data_state(wf, child, NodeState::Valid);
        }
        ExecOutcome::RestartRequested => {
            // Benign cancellation; retry from the invalid handler.
            connector_invalid_handler(wf, conn);
        }
        ExecOutcome::Failed(message) => {
            let name = c
                .transform
                .as_ref()
                .map(|t| t.name().to_string())
                .unwrap_or_else(|| c.title.clone());
            c.last_error = Some(message.clone());
            error!(%conn, transform = %name, error = %message, "transform failed");
            set_connector_state(wf, conn, NodeState::Failed);
        }
    }
}

/// Re-derive the `applicable` flag.
///
/// Probing calls into the transform with the parent payload, which is only
/// meaningful while the parent is valid; before that we stay optimistic so a
/// freshly wired connector waits in `Invalid` instead of settling in
/// `NotApplicable` on stale data.
pub(crate) fn refresh_applicability(wf: &mut Workflow, conn: NodeId, parent_valid: bool) {
    let (transform, parent) = match wf.connectors.get(&conn) {
        Some(c) => (c.transform.clone(), c.parent),
        None => return,
    };

    let applicable = match transform {
        None => false,
        Some(t) => {
            if !parent_valid {
                true
            } else {
                let Some(payload) = wf.data_nodes.get(&parent).map(|n| n.payload.clone()) else {
                    return;
                };
                match payload.try_read() {
                    Ok(guard) => t.is_applicable(&wf.ctx, &**guard),
                    Err(_) => {
                        // A writer holds the parent payload; keep the cached
                        // value, the next parent-valid notification re-probes.
                        debug!(%conn, "parent payload locked; keeping cached applicability");
                        return;
                    }
                }
            }
        }
    };

    if let Some(c) = wf.connectors.get_mut(&conn) {
        if c.applicable != applicable {
            debug!(%conn, applicable, "applicability changed");
        }
        c.applicable = applicable;
    }
}

/// Allocate a fresh execution id and enqueue an execution request for the
/// engine to dispatch. Caller has already set the connector to `Computing`.
fn start_execution(wf: &mut Workflow, conn: NodeId) {
    let (parent, child, transform) = match wf.connectors.get(&conn) {
        Some(c) => (c.parent, c.child, c.transform.clone()),
        None => return,
    };
    let Some(transform) = transform else {
        // Applicability implies a bound transform; reaching this means the
        // transform was unbound mid-transition.
        warn!(%conn, "no transform bound; cannot start execution");
        set_connector_state(wf, conn, NodeState::Invalid);
        return;
    };
    let (Some(parent_payload), Some(child_payload)) = (
        wf.data_nodes.get(&parent).map(|n| n.payload.clone()),
        wf.data_nodes.get(&child).map(|n| n.payload.clone()),
    ) else {
        warn!(%conn, "parent or child data node missing; cannot start execution");
        set_connector_state(wf, conn, NodeState::Invalid);
        return;
    };

    wf.exec_seq += 1;
    let exec_id = ExecId(wf.exec_seq);
    let token = CancellationToken::new();
    let progress = Progress::new(token.clone());

    let transform_name = transform.name().to_string();
    let request = crate::graph::node::ExecutionRequest {
        connector: conn,
        exec_id,
        token: token.clone(),
        progress: progress.clone(),
        transform,
        ctx: wf.ctx.clone(),
        parent_payload,
        child_payload,
        transform_name,
    };

    if let Some(c) = wf.connectors.get_mut(&conn) {
        c.current_exec = Some(ExecHandle {
            exec_id,
            token,
            progress,
        });
        c.restart_pending = false;
    }

    debug!(%conn, %exec_id, "execution scheduled");
    wf.ready.push(request);
}

/// Cancel the in-flight execution, if any. The handle stays on the connector
/// so the terminal event can be matched; returns whether one was in flight.
fn cancel_in_flight(c: &mut crate::graph::node::Connector) -> bool {
    match &c.current_exec {
        Some(h) => {
            h.token.cancel();
            true
        }
        None => false,
    }
}

fn set_data_state(wf: &mut Workflow, node: NodeId, state: NodeState) {
    if let Some(n) = wf.data_nodes.get_mut(&node) {
        let old = n.state();
        n.set_state_raw(state);
        note_state(wf, node, state);
        if old != state {
            debug!(%node, %old, %state, "data node state");
        }
    }
}

fn set_connector_state(wf: &mut Workflow, conn: NodeId, state: NodeState) {
    if let Some(c) = wf.connectors.get_mut(&conn) {
        let old = c.state();
        c.set_state_raw(state);
        note_state(wf, conn, state);
        if old != state {
            debug!(%conn, %old, %state, "connector state");
        }
    }
}

/// Keep the workflow's aggregate unsettled set in sync with a transition.
fn note_state(wf: &mut Workflow, node: NodeId, state: NodeState) {
    if state.is_settled() {
        wf.unsettled.remove(&node);
    } else {
        wf.unsettled.insert(node);
    }
}
