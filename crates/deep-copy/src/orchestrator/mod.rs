//! Copy orchestrators.
//!
//! Each orchestrator runs a plan's steps in dependency order through one
//! [`StepEngine`] and defines the transactional and resume contract around
//! them:
//!
//! - [`LocalCopy`]: one store, one transaction, all or nothing.
//! - [`ConnectedCopy`]: live source and destination, per-row progress kept in
//!   a durable key map so an interrupted run can resume.
//! - [`StagedCopy`]: stage source rows into a bridge store now, commit them
//!   to the destination later.

mod connected;
mod local;
mod staged;

pub use connected::{ConnectedCopy, ConnectedPlan, ConnectedRun};
pub use local::{LocalCopy, LocalPlan, LocalRun};
pub use staged::{CommitRun, StageRun, StageSummary, StagedCopy, StagedPlan};

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{CopyConfig, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_ERRORS};
use crate::error::{CopyError, Result};
use crate::keymap::{CopyKey, KeyMap};
use crate::report::{
    ErrorReporter, MetricsSink, StepMetrics, TracingErrorReporter, TracingMetricsSink,
};
use crate::step::{FailurePolicy, StepEngine};

/// Settings shared by every orchestrator.
#[derive(Clone)]
pub struct CopyOptions {
    /// Default error threshold per step.
    pub max_errors: usize,
    /// Default staged chunk size.
    pub chunk_size: usize,
    pub metrics: Arc<dyn MetricsSink>,
    pub reporter: Arc<dyn ErrorReporter>,
    pub cancel: CancellationToken,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            max_errors: DEFAULT_MAX_ERRORS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            metrics: Arc::new(TracingMetricsSink),
            reporter: Arc::new(TracingErrorReporter),
            cancel: CancellationToken::new(),
        }
    }
}

impl CopyOptions {
    /// Options with thresholds from the `copy` config section.
    pub fn from_config(config: &CopyConfig) -> Self {
        Self {
            max_errors: config.max_errors,
            chunk_size: config.chunk_size,
            ..Default::default()
        }
    }

    pub fn with_metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = sink;
        self
    }

    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_max_errors(mut self, max_errors: usize) -> Self {
        self.max_errors = max_errors;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub(crate) fn engine<K: CopyKey>(&self, key_map: KeyMap<K>, policy: FailurePolicy) -> StepEngine<K> {
        StepEngine::new(key_map)
            .with_metrics_sink(self.metrics.clone())
            .with_error_reporter(self.reporter.clone())
            .with_cancellation(self.cancel.clone())
            .with_policy(policy)
            .with_max_errors(self.max_errors)
    }
}

impl fmt::Debug for CopyOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CopyOptions")
            .field("max_errors", &self.max_errors)
            .field("chunk_size", &self.chunk_size)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// Final status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every step ran to the end without failures.
    Completed,
    /// The run finished, but at least one step failed or left rows behind.
    Failed,
    /// Cancellation stopped the run early.
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Result of a copy run.
#[derive(Debug, Clone, Serialize)]
pub struct CopyResult<O, S = StepMetrics> {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status.
    pub status: RunStatus,

    /// What the plan returned, usually the root's destination key.
    pub output: O,

    /// Per-step records, in execution order.
    pub steps: Vec<S>,

    /// Steps that failed or left rows uncopied.
    pub failed_steps: Vec<String>,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,
}

impl<O: Serialize, S: Serialize> CopyResult<O, S> {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl<O, S> CopyResult<O, S> {
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

/// Start time and identity of a run in progress.
pub(crate) struct RunClock {
    run_id: String,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl RunClock {
    pub(crate) fn start(kind: &str) -> Self {
        let run_id = uuid::Uuid::new_v4().to_string();
        info!("Starting {} copy run: {}", kind, run_id);
        Self {
            run_id,
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub(crate) fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Build the result of a plan that returned, or propagate its error.
    ///
    /// After cancellation, a missing parent key is reported as
    /// [`CopyError::Cancelled`]: it is a row the cancelled run never got to
    /// copy. Any other error, such as a key map that could not record an
    /// inserted row, is returned as is.
    pub(crate) fn finish<O, S>(
        self,
        cancel: &CancellationToken,
        output: Result<O>,
        steps: Vec<S>,
        failed_steps: Vec<String>,
    ) -> Result<CopyResult<O, S>> {
        let output = match output {
            Ok(output) => output,
            Err(e) if cancel.is_cancelled() && is_cancellation_fallout(&e) => {
                info!("Run {} cancelled ({})", self.run_id, e);
                return Err(CopyError::Cancelled);
            }
            Err(e) => return Err(e),
        };

        let status = if cancel.is_cancelled() {
            RunStatus::Cancelled
        } else if !failed_steps.is_empty() {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };

        let completed_at = Utc::now();
        let duration_seconds = self.started.elapsed().as_secs_f64();
        info!(
            "Copy run {} {}: {} steps in {:.1}s",
            self.run_id,
            status,
            steps.len(),
            duration_seconds
        );

        Ok(CopyResult {
            run_id: self.run_id,
            status,
            output,
            steps,
            failed_steps,
            started_at: self.started_at,
            completed_at,
            duration_seconds,
        })
    }
}

fn is_cancellation_fallout(err: &CopyError) -> bool {
    matches!(
        err.root_cause(),
        CopyError::KeyNotFound { .. } | CopyError::Cancelled
    )
}
