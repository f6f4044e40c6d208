// src/engine/event_handlers.rs

//! Event handling logic for the core engine.

use crate::engine::EngineOptions;
use crate::graph::node::ExecutionRequest;
use crate::graph::Workflow;
use crate::types::{ExecId, ExecOutcome, NodeId, NodeState};

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug)]
pub enum CoreCommand {
    /// Hand these execution requests to the executor backend.
    Dispatch(Vec<ExecutionRequest>),
    /// Request that the embedding loop exits (used with `exit_when_settled`).
    RequestExit,
}

/// Decision returned by the core after handling a single [`WorkflowEvent`].
#[derive(Debug)]
pub struct CoreStep {
    /// Commands the IO shell should execute.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

impl CoreStep {
    fn running(commands: Vec<CoreCommand>) -> Self {
        Self {
            commands,
            keep_running: true,
        }
    }
}

/// Handle an execution's terminal outcome.
///
/// Success drives the connector valid and promotes waiting consumers;
/// restart-requested retries; failure surfaces the error. Stale events are
/// dropped inside the workflow.
pub fn handle_execution_finished(
    wf: &mut Workflow,
    options: &EngineOptions,
    connector: NodeId,
    exec_id: ExecId,
    outcome: ExecOutcome,
) -> CoreStep {
    wf.on_execution_finished(connector, exec_id, outcome);
    let mut step = CoreStep::running(drain_into_commands(wf));
    maybe_request_exit(wf, options, &mut step);
    step
}

/// Handle an in-place payload edit: the node's descendants are invalidated
/// and then notified that the (freshly edited) content is valid again.
pub fn handle_data_edited(wf: &mut Workflow, node: NodeId) -> CoreStep {
    wf.request_state(node, NodeState::Invalid);
    wf.request_state(node, NodeState::Valid);
    CoreStep::running(drain_into_commands(wf))
}

/// Handle completion of an external load: the node becomes valid and any
/// waiting consumers are promoted.
pub fn handle_data_loaded(wf: &mut Workflow, options: &EngineOptions, node: NodeId) -> CoreStep {
    wf.request_state(node, NodeState::Valid);
    let mut step = CoreStep::running(drain_into_commands(wf));
    maybe_request_exit(wf, options, &mut step);
    step
}

/// Handle a force-recompute request.
pub fn handle_force_recompute(wf: &mut Workflow, node: NodeId) -> CoreStep {
    wf.force_recompute(node);
    CoreStep::running(drain_into_commands(wf))
}

fn drain_into_commands(wf: &mut Workflow) -> Vec<CoreCommand> {
    let ready = wf.drain_ready();
    if ready.is_empty() {
        Vec::new()
    } else {
        vec![CoreCommand::Dispatch(ready)]
    }
}

/// With `exit_when_settled`, stop the loop once nothing is settling and no
/// work was produced.
fn maybe_request_exit(wf: &Workflow, options: &EngineOptions, step: &mut CoreStep) {
    if options.exit_when_settled && wf.is_settled() && step.commands.is_empty() {
        step.commands.push(CoreCommand::RequestExit);
        step.keep_running = false;
    }
}
