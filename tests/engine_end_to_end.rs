// tests/engine_end_to_end.rs

//! End-to-end tests with the real executor: transforms actually run on
//! background tasks, payloads are locked, cleared and written.

use std::error::Error;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use phyloflow::context::Context;
use phyloflow::engine::{CoreEngine, EngineOptions, WorkflowEvent};
use phyloflow::graph::Workflow;
use phyloflow::payload::{Payload, PayloadKind};
use phyloflow::progress::Progress;
use phyloflow::start_engine;
use phyloflow::transform::{Transform, TransformError};
use phyloflow::types::NodeState;
use phyloflow_test_utils::builders::{build_chain, rows_of, AppendTransform, TestPayload};
use phyloflow_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

fn new_workflow() -> Workflow {
    Workflow::new(Arc::new(Context::new(vec![
        "a".into(),
        "b".into(),
        "c".into(),
    ])))
}

#[tokio::test]
async fn chain_computes_real_payloads() -> TestResult {
    init_tracing();

    let mut wf = new_workflow();
    let chain = build_chain(
        &mut wf,
        Arc::new(AppendTransform::new("t1", "dist")),
        Arc::new(AppendTransform::new("t2", "split")),
    );

    let core = CoreEngine::new(
        wf,
        EngineOptions {
            exit_when_settled: true,
        },
    );
    let (tx, handle) = start_engine(core);

    tx.send(WorkflowEvent::DataLoaded { node: chain.x }).await?;

    let core = with_timeout(handle).await??;
    let wf = core.workflow();

    assert_eq!(wf.state_of(chain.c1), Some(NodeState::Valid));
    assert_eq!(wf.state_of(chain.c2), Some(NodeState::Valid));
    assert_eq!(
        rows_of(&wf.data_node(chain.y).unwrap().payload),
        vec!["a/dist", "b/dist", "c/dist"]
    );
    assert_eq!(
        rows_of(&wf.data_node(chain.z).unwrap().payload),
        vec!["a/dist/split", "b/dist/split", "c/dist/split"]
    );
    Ok(())
}

/// Blocks until cancelled on its first run, completes instantly afterwards.
/// Lets the test deterministically interleave a force-recompute with a run
/// that is already inside `compute`.
#[derive(Debug)]
struct CancelFirstRun {
    entered: Arc<AtomicBool>,
    attempts: Arc<AtomicUsize>,
    completions: Arc<AtomicUsize>,
}

impl CancelFirstRun {
    fn new() -> Self {
        Self {
            entered: Arc::new(AtomicBool::new(false)),
            attempts: Arc::new(AtomicUsize::new(0)),
            completions: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Transform for CancelFirstRun {
    fn name(&self) -> &str {
        "cancel-first-run"
    }

    fn is_applicable(&self, _ctx: &Context, _parent: &dyn Payload) -> bool {
        true
    }

    fn compute(
        &self,
        progress: &Progress,
        _ctx: &Context,
        parent: &dyn Payload,
        child: &mut dyn Payload,
    ) -> Result<(), TransformError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        self.entered.store(true, Ordering::SeqCst);

        if attempt == 0 {
            loop {
                progress.check_cancelled()?;
                std::thread::sleep(Duration::from_millis(2));
            }
        }

        let parent = parent
            .as_any()
            .downcast_ref::<TestPayload>()
            .ok_or_else(|| TransformError::Failed("unexpected parent payload type".into()))?;
        let child = child
            .as_any_mut()
            .downcast_mut::<TestPayload>()
            .ok_or_else(|| TransformError::Failed("unexpected child payload type".into()))?;
        child.rows.extend(parent.rows.iter().cloned());

        self.completions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn duplicate(&self) -> Arc<dyn Transform> {
        Arc::new(Self::new())
    }
}

#[tokio::test]
async fn force_recompute_cancels_running_execution() -> TestResult {
    init_tracing();

    let mut wf = new_workflow();
    let t1 = Arc::new(CancelFirstRun::new());
    let entered = t1.entered.clone();
    let completions = t1.completions.clone();

    let x = wf.create_data_node(
        "taxa",
        Box::new(TestPayload::with_rows(
            PayloadKind::Taxa,
            "taxa",
            &["a", "b", "c"],
        )),
    );
    let y = wf.create_data_node(
        "distances",
        Box::new(TestPayload::new(PayloadKind::Distances, "distances")),
    );
    let c1 = wf.create_connector(x, y, Some(t1))?;

    let core = CoreEngine::new(
        wf,
        EngineOptions {
            exit_when_settled: true,
        },
    );
    let (tx, handle) = start_engine(core);

    tx.send(WorkflowEvent::DataLoaded { node: x }).await?;

    // Wait until the first run is demonstrably inside compute, then
    // supersede it.
    with_timeout(async {
        while !entered.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await;
    tx.send(WorkflowEvent::ForceRecompute { node: c1 }).await?;

    let core = with_timeout(handle).await??;
    let wf = core.workflow();

    // The first run was cancelled; exactly one run completed and its output
    // is in place.
    assert_eq!(completions.load(Ordering::SeqCst), 1);
    assert_eq!(wf.state_of(c1), Some(NodeState::Valid));
    assert_eq!(
        rows_of(&wf.data_node(y).unwrap().payload),
        vec!["a", "b", "c"]
    );
    Ok(())
}

#[tokio::test]
async fn not_applicable_leaves_child_payload_untouched() -> TestResult {
    init_tracing();

    let mut wf = new_workflow();
    let x = wf.create_data_node(
        "taxa",
        Box::new(TestPayload::with_rows(PayloadKind::Taxa, "taxa", &["a"])),
    );
    let y = wf.create_data_node(
        "distances",
        Box::new(TestPayload::new(PayloadKind::Distances, "distances")),
    );
    let z = wf.create_data_node(
        "splits",
        Box::new(TestPayload::with_rows(
            PayloadKind::Splits,
            "splits",
            &["stale"],
        )),
    );
    let c1 = wf.create_connector(x, y, Some(Arc::new(AppendTransform::new("t1", "dist"))))?;
    let c2 = wf.create_connector(
        y,
        z,
        Some(Arc::new(AppendTransform::new("t2", "split").not_applicable())),
    )?;

    // A not-applicable connector never settles in {Valid, Failed}, so the
    // test drives the loop itself instead of using exit_when_settled.
    let mut core = CoreEngine::new(wf, EngineOptions::default());
    let (events_tx, mut events_rx) = mpsc::channel::<WorkflowEvent>(16);
    let mut executor = phyloflow::exec::RealExecutorBackend::new(events_tx.clone());

    events_tx.send(WorkflowEvent::DataLoaded { node: x }).await?;

    // Pump events until the engine goes quiet.
    loop {
        let event = match timeout(Duration::from_millis(300), events_rx.recv()).await {
            Ok(Some(event)) => event,
            _ => break,
        };
        let step = core.step(event);
        for command in step.commands {
            if let phyloflow::engine::CoreCommand::Dispatch(requests) = command {
                use phyloflow::exec::ExecutorBackend;
                executor.dispatch(requests).await?;
            }
        }
    }

    let wf = core.workflow();
    assert_eq!(wf.state_of(c1), Some(NodeState::Valid));
    assert_eq!(wf.state_of(c2), Some(NodeState::NotApplicable));
    // Z was neither cleared nor computed.
    assert_eq!(rows_of(&wf.data_node(z).unwrap().payload), vec!["stale"]);
    Ok(())
}

#[tokio::test]
async fn hard_failure_surfaces_transform_name_and_message() -> TestResult {
    init_tracing();

    let mut wf = new_workflow();
    let chain = build_chain(
        &mut wf,
        Arc::new(AppendTransform::new("t1", "dist").failing("matrix is singular")),
        Arc::new(AppendTransform::new("t2", "split")),
    );

    // A failed branch leaves its child data nodes invalid, so again the
    // test pumps the loop manually.
    let mut core = CoreEngine::new(wf, EngineOptions::default());
    let (events_tx, mut events_rx) = mpsc::channel::<WorkflowEvent>(16);
    let mut executor = phyloflow::exec::RealExecutorBackend::new(events_tx.clone());

    events_tx
        .send(WorkflowEvent::DataLoaded { node: chain.x })
        .await?;

    loop {
        let event = match timeout(Duration::from_millis(300), events_rx.recv()).await {
            Ok(Some(event)) => event,
            _ => break,
        };
        let step = core.step(event);
        for command in step.commands {
            if let phyloflow::engine::CoreCommand::Dispatch(requests) = command {
                use phyloflow::exec::ExecutorBackend;
                executor.dispatch(requests).await?;
            }
        }
    }

    let wf = core.workflow();
    assert_eq!(wf.state_of(chain.c1), Some(NodeState::Failed));
    let error = wf.connector(chain.c1).unwrap().last_error.clone().unwrap();
    assert!(error.contains("t1"));
    assert!(error.contains("matrix is singular"));
    // No automatic retry; the rest of the chain never ran.
    assert_eq!(wf.state_of(chain.c2), Some(NodeState::Invalid));
    assert!(rows_of(&wf.data_node(chain.z).unwrap().payload).is_empty());
    Ok(())
}

#[tokio::test]
async fn working_node_revalidation_recomputes_all_consumers() -> TestResult {
    init_tracing();

    let mut wf = new_workflow();
    let x = wf.create_data_node(
        "taxa",
        Box::new(TestPayload::with_rows(PayloadKind::Taxa, "taxa", &["a", "b"])),
    );
    let y = wf.create_data_node(
        "working-taxa",
        Box::new(TestPayload::new(PayloadKind::Taxa, "working-taxa")),
    );
    let d = wf.create_data_node(
        "distances",
        Box::new(TestPayload::new(PayloadKind::Distances, "distances")),
    );
    let t = wf.create_data_node(
        "trees",
        Box::new(TestPayload::new(PayloadKind::Trees, "trees")),
    );
    let filter = wf.create_connector(x, y, Some(Arc::new(AppendTransform::new("filter", "w"))))?;
    let to_dist = wf.create_connector(y, d, Some(Arc::new(AppendTransform::new("dist", "d"))))?;
    let to_trees = wf.create_connector(y, t, Some(Arc::new(AppendTransform::new("tree", "t"))))?;
    wf.set_working(y);

    let core = CoreEngine::new(
        wf,
        EngineOptions {
            exit_when_settled: true,
        },
    );
    let (tx, handle) = start_engine(core);
    tx.send(WorkflowEvent::DataLoaded { node: x }).await?;
    let core = with_timeout(handle).await??;

    let wf = core.workflow();
    for conn in [filter, to_dist, to_trees] {
        assert_eq!(wf.state_of(conn), Some(NodeState::Valid));
    }
    assert_eq!(
        rows_of(&wf.data_node(d).unwrap().payload),
        vec!["a/w/d", "b/w/d"]
    );
    assert_eq!(
        rows_of(&wf.data_node(t).unwrap().payload),
        vec!["a/w/t", "b/w/t"]
    );
    Ok(())
}
