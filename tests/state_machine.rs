// tests/state_machine.rs

//! Pure state-machine tests: no Tokio runtime, no channels. The test acts as
//! the coordinator, draining execution requests and feeding outcomes back.

use std::error::Error;
use std::sync::Arc;

use phyloflow::context::Context;
use phyloflow::engine::{CoreCommand, CoreEngine, EngineOptions, WorkflowEvent};
use phyloflow::graph::Workflow;
use phyloflow::payload::PayloadKind;
use phyloflow::types::{ExecOutcome, NodeState};
use phyloflow_test_utils::builders::{build_chain, AppendTransform, TestPayload};
use phyloflow_test_utils::init_tracing;

type TestResult = Result<(), Box<dyn Error>>;

fn new_workflow() -> Workflow {
    let ctx = Arc::new(Context::new(vec![
        "a".to_string(),
        "b".to_string(),
        "c".to_string(),
    ]));
    Workflow::new(ctx)
}

#[test]
fn chain_drains_top_down_exactly_once() -> TestResult {
    init_tracing();
    let mut wf = new_workflow();
    let chain = build_chain(
        &mut wf,
        Arc::new(AppendTransform::new("t1", "dist")),
        Arc::new(AppendTransform::new("t2", "split")),
    );

    // Nothing runs before the root is valid.
    assert!(wf.drain_ready().is_empty());
    assert_eq!(wf.state_of(chain.c1), Some(NodeState::Invalid));

    // Root becomes valid: C1 is promoted, C2 still waits on Y.
    wf.request_state(chain.x, NodeState::Valid);
    let ready = wf.drain_ready();
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].connector, chain.c1);
    assert_eq!(wf.state_of(chain.c1), Some(NodeState::Computing));
    assert_eq!(wf.state_of(chain.c2), Some(NodeState::Invalid));

    // C1 succeeds: Y becomes valid, which promotes C2.
    wf.on_execution_finished(chain.c1, ready[0].exec_id, ExecOutcome::Success);
    assert_eq!(wf.state_of(chain.c1), Some(NodeState::Valid));
    assert_eq!(wf.state_of(chain.y), Some(NodeState::Valid));
    let ready = wf.drain_ready();
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].connector, chain.c2);

    wf.on_execution_finished(chain.c2, ready[0].exec_id, ExecOutcome::Success);
    assert_eq!(wf.state_of(chain.c2), Some(NodeState::Valid));
    assert_eq!(wf.state_of(chain.z), Some(NodeState::Valid));
    assert!(wf.drain_ready().is_empty());
    assert!(wf.is_settled());
    Ok(())
}

#[test]
fn invalidation_is_transitive() -> TestResult {
    init_tracing();
    let mut wf = new_workflow();
    let chain = build_chain(
        &mut wf,
        Arc::new(AppendTransform::new("t1", "dist")),
        Arc::new(AppendTransform::new("t2", "split")),
    );
    settle(&mut wf);

    // Invalidate the root: the whole chain goes invalid, nobody skips
    // straight back to valid.
    wf.request_state(chain.x, NodeState::Invalid);
    assert_eq!(wf.state_of(chain.c1), Some(NodeState::Invalid));
    assert_eq!(wf.state_of(chain.y), Some(NodeState::Invalid));
    assert_eq!(wf.state_of(chain.c2), Some(NodeState::Invalid));
    assert_eq!(wf.state_of(chain.z), Some(NodeState::Invalid));
    assert!(wf.drain_ready().is_empty());

    // Root valid again: the chain recomputes top-down, one execution each.
    wf.request_state(chain.x, NodeState::Valid);
    let ready = wf.drain_ready();
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].connector, chain.c1);
    assert_eq!(wf.state_of(chain.c1), Some(NodeState::Computing));
    // C2 must not compute while Y is invalid.
    assert_eq!(wf.state_of(chain.c2), Some(NodeState::Invalid));

    wf.on_execution_finished(chain.c1, ready[0].exec_id, ExecOutcome::Success);
    let ready = wf.drain_ready();
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].connector, chain.c2);
    wf.on_execution_finished(chain.c2, ready[0].exec_id, ExecOutcome::Success);

    assert!(wf.is_settled());
    Ok(())
}

#[test]
fn no_compute_before_parent_valid() -> TestResult {
    init_tracing();
    let mut wf = new_workflow();
    let chain = build_chain(
        &mut wf,
        Arc::new(AppendTransform::new("t1", "dist")),
        Arc::new(AppendTransform::new("t2", "split")),
    );

    // X is still invalid; forcing C2 must leave it waiting, not computing.
    wf.force_recompute(chain.c2);
    assert_eq!(wf.state_of(chain.c2), Some(NodeState::Invalid));
    assert!(wf.drain_ready().is_empty());

    wf.force_recompute(chain.c1);
    assert_eq!(wf.state_of(chain.c1), Some(NodeState::Invalid));
    assert!(wf.drain_ready().is_empty());
    Ok(())
}

#[test]
fn applicability_short_circuits_without_execution() -> TestResult {
    init_tracing();
    let mut wf = new_workflow();
    let chain = build_chain(
        &mut wf,
        Arc::new(AppendTransform::new("t1", "dist")),
        Arc::new(AppendTransform::new("t2", "split").not_applicable()),
    );

    wf.request_state(chain.x, NodeState::Valid);
    let ready = wf.drain_ready();
    assert_eq!(ready.len(), 1);
    wf.on_execution_finished(chain.c1, ready[0].exec_id, ExecOutcome::Success);

    // Y became valid, C2 was probed and declined: no execution, terminal
    // not-applicable state.
    assert_eq!(wf.state_of(chain.c2), Some(NodeState::NotApplicable));
    assert!(wf.drain_ready().is_empty());
    Ok(())
}

#[test]
fn replacing_transform_reevaluates_applicability() -> TestResult {
    init_tracing();
    let mut wf = new_workflow();
    let chain = build_chain(
        &mut wf,
        Arc::new(AppendTransform::new("t1", "dist")),
        Arc::new(AppendTransform::new("t2", "split").not_applicable()),
    );
    wf.request_state(chain.x, NodeState::Valid);
    let ready = wf.drain_ready();
    wf.on_execution_finished(chain.c1, ready[0].exec_id, ExecOutcome::Success);
    wf.drain_ready();
    assert_eq!(wf.state_of(chain.c2), Some(NodeState::NotApplicable));

    // Bind an applicable transform and force a recompute: C2 runs now.
    wf.set_transform(chain.c2, Arc::new(AppendTransform::new("t2b", "split")))?;
    wf.force_recompute(chain.c2);
    assert_eq!(wf.state_of(chain.c2), Some(NodeState::Computing));
    let ready = wf.drain_ready();
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].connector, chain.c2);
    Ok(())
}

#[test]
fn failure_is_terminal_until_forced() -> TestResult {
    init_tracing();
    let mut wf = new_workflow();
    let chain = build_chain(
        &mut wf,
        Arc::new(AppendTransform::new("t1", "dist")),
        Arc::new(AppendTransform::new("t2", "split")),
    );

    wf.request_state(chain.x, NodeState::Valid);
    let ready = wf.drain_ready();
    wf.on_execution_finished(
        chain.c1,
        ready[0].exec_id,
        ExecOutcome::Failed("t1: bad input".to_string()),
    );

    assert_eq!(wf.state_of(chain.c1), Some(NodeState::Failed));
    let conn = wf.connector(chain.c1).unwrap();
    assert_eq!(conn.last_error.as_deref(), Some("t1: bad input"));
    // No automatic retry, child stays invalid.
    assert!(wf.drain_ready().is_empty());
    assert_eq!(wf.state_of(chain.y), Some(NodeState::Invalid));

    // Explicit force-recompute retries.
    wf.force_recompute(chain.c1);
    assert_eq!(wf.state_of(chain.c1), Some(NodeState::Computing));
    assert_eq!(wf.drain_ready().len(), 1);
    Ok(())
}

#[test]
#[should_panic(expected = "Computing must not be requested directly")]
fn external_computing_request_panics() {
    init_tracing();
    let mut wf = new_workflow();
    let chain = build_chain(
        &mut wf,
        Arc::new(AppendTransform::new("t1", "dist")),
        Arc::new(AppendTransform::new("t2", "split")),
    );
    wf.request_state(chain.c1, NodeState::Computing);
}

#[test]
fn connector_without_transform_settles_not_applicable() -> TestResult {
    init_tracing();
    let mut wf = new_workflow();
    let x = wf.create_data_node(
        "taxa",
        Box::new(TestPayload::with_rows(PayloadKind::Taxa, "taxa", &["a"])),
    );
    let y = wf.create_data_node(
        "trees",
        Box::new(TestPayload::new(PayloadKind::Trees, "trees")),
    );
    let c = wf.create_connector(x, y, None)?;

    wf.request_state(x, NodeState::Valid);
    assert_eq!(wf.state_of(c), Some(NodeState::NotApplicable));
    assert!(wf.drain_ready().is_empty());
    Ok(())
}

#[test]
fn core_engine_steps_through_load_and_edit() -> TestResult {
    init_tracing();
    let mut wf = new_workflow();
    let chain = build_chain(
        &mut wf,
        Arc::new(AppendTransform::new("t1", "dist")),
        Arc::new(AppendTransform::new("t2", "split")),
    );
    let mut core = CoreEngine::new(
        wf,
        EngineOptions {
            exit_when_settled: true,
        },
    );

    let step = core.step(WorkflowEvent::DataLoaded { node: chain.x });
    assert!(step.keep_running);
    let first = match &step.commands[..] {
        [CoreCommand::Dispatch(requests)] => requests[0].clone(),
        other => panic!("expected a dispatch command, got {other:?}"),
    };
    assert_eq!(first.connector, chain.c1);

    let step = core.step(WorkflowEvent::ExecutionFinished {
        connector: chain.c1,
        exec_id: first.exec_id,
        outcome: ExecOutcome::Success,
    });
    let second = match &step.commands[..] {
        [CoreCommand::Dispatch(requests)] => requests[0].clone(),
        other => panic!("expected a dispatch command, got {other:?}"),
    };
    assert_eq!(second.connector, chain.c2);

    // The last completion settles the workflow; the core asks the shell to
    // exit.
    let step = core.step(WorkflowEvent::ExecutionFinished {
        connector: chain.c2,
        exec_id: second.exec_id,
        outcome: ExecOutcome::Success,
    });
    assert!(!step.keep_running);
    assert!(matches!(step.commands[..], [CoreCommand::RequestExit]));
    assert!(core.is_settled());

    // Editing the root payload in place kicks off a fresh cascade.
    let step = core.step(WorkflowEvent::DataEdited { node: chain.x });
    assert!(step.keep_running);
    let redo = match &step.commands[..] {
        [CoreCommand::Dispatch(requests)] => requests[0].clone(),
        other => panic!("expected a dispatch command, got {other:?}"),
    };
    assert_eq!(redo.connector, chain.c1);
    assert_eq!(
        core.workflow().state_of(chain.c2),
        Some(NodeState::Invalid)
    );
    Ok(())
}

/// Run the chain to completion by feeding success outcomes.
fn settle(wf: &mut Workflow) {
    let tops: Vec<_> = wf
        .data_node_ids()
        .filter(|id| wf.data_node(*id).is_some_and(|n| n.parent.is_none()))
        .collect();
    for top in tops {
        wf.request_state(top, NodeState::Valid);
    }
    loop {
        let ready = wf.drain_ready();
        if ready.is_empty() {
            break;
        }
        for req in ready {
            wf.on_execution_finished(req.connector, req.exec_id, ExecOutcome::Success);
        }
    }
}
