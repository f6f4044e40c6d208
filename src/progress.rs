// src/progress.rs

//! Progress reporting and cooperative cancellation for transforms.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::transform::TransformError;

/// Handle given to a running transform for progress reporting and
/// cancellation polling.
///
/// Cancellation is cooperative: the engine cancels the token, and the
/// transform is expected to call [`Progress::check_cancelled`] periodically
/// and bail out with the returned error. A transform that never polls keeps
/// running (and keeps its payload lock) until it finishes on its own.
#[derive(Debug, Clone)]
pub struct Progress {
    token: CancellationToken,
    tasks: Arc<AtomicU64>,
    progress: Arc<AtomicU64>,
}

impl Progress {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            tasks: Arc::new(AtomicU64::new(0)),
            progress: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Total number of work units the transform expects to perform.
    pub fn set_tasks(&self, tasks: u64) {
        self.tasks.store(tasks, Ordering::Relaxed);
    }

    pub fn set_progress(&self, progress: u64) {
        self.progress.store(progress, Ordering::Relaxed);
    }

    pub fn increment_progress(&self) {
        self.progress.fetch_add(1, Ordering::Relaxed);
    }

    /// Completed fraction in `[0, 1]`, or 0 when no task count was set.
    pub fn fraction(&self) -> f64 {
        let tasks = self.tasks.load(Ordering::Relaxed);
        if tasks == 0 {
            return 0.0;
        }
        let progress = self.progress.load(Ordering::Relaxed);
        (progress as f64 / tasks as f64).min(1.0)
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Returns `Err(TransformError::Cancelled)` once cancellation has been
    /// requested. Transforms propagate this with `?`.
    pub fn check_cancelled(&self) -> Result<(), TransformError> {
        if self.token.is_cancelled() {
            Err(TransformError::Cancelled)
        } else {
            Ok(())
        }
    }
}
