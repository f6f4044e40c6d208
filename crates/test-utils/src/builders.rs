//! Payloads, transforms and graph shapes for tests.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use phyloflow::context::Context;
use phyloflow::graph::Workflow;
use phyloflow::payload::{Payload, PayloadKind, SharedPayload};
use phyloflow::progress::Progress;
use phyloflow::transform::{Transform, TransformError};
use phyloflow::types::NodeId;

/// Simple line-based payload: each row is one record (a taxon, a split, ...).
#[derive(Debug, Clone)]
pub struct TestPayload {
    kind: PayloadKind,
    name: String,
    pub rows: Vec<String>,
}

impl TestPayload {
    pub fn new(kind: PayloadKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            rows: Vec::new(),
        }
    }

    pub fn with_rows(kind: PayloadKind, name: impl Into<String>, rows: &[&str]) -> Self {
        Self {
            kind,
            name: name.into(),
            rows: rows.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Payload for TestPayload {
    fn kind(&self) -> PayloadKind {
        self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn set_name(&mut self, name: String) {
        self.name = name;
    }

    fn size(&self) -> usize {
        self.rows.len()
    }

    fn clear(&mut self) {
        self.rows.clear();
    }

    fn new_empty(&self) -> Box<dyn Payload> {
        Box::new(Self {
            kind: self.kind,
            name: self.name.clone(),
            rows: Vec::new(),
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Read the rows of a shared payload. Panics if a writer holds the lock;
/// only call once the workflow has settled.
pub fn rows_of(payload: &SharedPayload) -> Vec<String> {
    let guard = payload.try_read().expect("payload locked by a writer");
    guard
        .as_any()
        .downcast_ref::<TestPayload>()
        .expect("not a TestPayload")
        .rows
        .clone()
}

/// Transform that copies every parent row and appends `/suffix`.
///
/// Knobs: artificial per-row delay, forced failure, forced inapplicability,
/// and a counter of completed runs.
#[derive(Debug)]
pub struct AppendTransform {
    name: String,
    suffix: String,
    applicable: bool,
    fail_with: Option<String>,
    row_delay: Duration,
    completions: Arc<AtomicUsize>,
}

impl AppendTransform {
    pub fn new(name: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            suffix: suffix.into(),
            applicable: true,
            fail_with: None,
            row_delay: Duration::ZERO,
            completions: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn not_applicable(mut self) -> Self {
        self.applicable = false;
        self
    }

    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.fail_with = Some(message.into());
        self
    }

    pub fn with_row_delay(mut self, delay: Duration) -> Self {
        self.row_delay = delay;
        self
    }

    /// Number of successful `compute` runs of this instance (not its
    /// duplicates: each duplicate counts separately).
    pub fn completions(&self) -> Arc<AtomicUsize> {
        self.completions.clone()
    }
}

impl Transform for AppendTransform {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_applicable(&self, _ctx: &Context, _parent: &dyn Payload) -> bool {
        self.applicable
    }

    fn compute(
        &self,
        progress: &Progress,
        _ctx: &Context,
        parent: &dyn Payload,
        child: &mut dyn Payload,
    ) -> Result<(), TransformError> {
        if let Some(message) = &self.fail_with {
            return Err(TransformError::Failed(message.clone()));
        }

        let parent = parent
            .as_any()
            .downcast_ref::<TestPayload>()
            .ok_or_else(|| TransformError::Failed("unexpected parent payload type".into()))?;
        let child = child
            .as_any_mut()
            .downcast_mut::<TestPayload>()
            .ok_or_else(|| TransformError::Failed("unexpected child payload type".into()))?;

        progress.set_tasks(parent.rows.len() as u64);
        for row in &parent.rows {
            progress.check_cancelled()?;
            if !self.row_delay.is_zero() {
                std::thread::sleep(self.row_delay);
            }
            child.rows.push(format!("{row}/{}", self.suffix));
            progress.increment_progress();
        }

        self.completions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn duplicate(&self) -> Arc<dyn Transform> {
        Arc::new(Self {
            name: self.name.clone(),
            suffix: self.suffix.clone(),
            applicable: self.applicable,
            fail_with: self.fail_with.clone(),
            row_delay: self.row_delay,
            completions: Arc::new(AtomicUsize::new(0)),
        })
    }
}

/// Transform that spins until released (or cancelled), for exercising
/// in-flight cancellation and restart.
#[derive(Debug)]
pub struct GateTransform {
    name: String,
    release: Arc<AtomicBool>,
    completions: Arc<AtomicUsize>,
}

impl GateTransform {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            release: Arc::new(AtomicBool::new(false)),
            completions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Handle that lets the test release every (current and future) run.
    pub fn release_handle(&self) -> Arc<AtomicBool> {
        self.release.clone()
    }

    pub fn completions(&self) -> Arc<AtomicUsize> {
        self.completions.clone()
    }
}

impl Transform for GateTransform {
    fn name(&self) -> &str {
        &self.name
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
        while !self.release.load(Ordering::SeqCst) {
            progress.check_cancelled()?;
            std::thread::sleep(Duration::from_millis(2));
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
        Arc::new(Self {
            name: self.name.clone(),
            release: self.release.clone(),
            completions: Arc::new(AtomicUsize::new(0)),
        })
    }
}

/// The canonical chain fixture: X --C1--> Y --C2--> Z.
pub struct Chain {
    pub x: NodeId,
    pub c1: NodeId,
    pub y: NodeId,
    pub c2: NodeId,
    pub z: NodeId,
}

/// Build the chain with the given transforms. X holds three taxa rows and is
/// still `Invalid`; mark it loaded to start the cascade.
pub fn build_chain(
    wf: &mut Workflow,
    t1: Arc<dyn Transform>,
    t2: Arc<dyn Transform>,
) -> Chain {
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
    let z = wf.create_data_node(
        "splits",
        Box::new(TestPayload::new(PayloadKind::Splits, "splits")),
    );
    let c1 = wf.create_connector(x, y, Some(t1)).expect("wiring C1");
    let c2 = wf.create_connector(y, z, Some(t2)).expect("wiring C2");
    Chain { x, c1, y, c2, z }
}
