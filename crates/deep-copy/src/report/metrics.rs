//! Step counters and the sinks that receive them.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Serialize, Serializer};
use tracing::info;

use crate::error::{CopyError, Result};

/// Counters for one step invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StepMetrics {
    /// Step name.
    pub step: String,

    /// Rows inserted and mapped.
    pub success_rows: usize,

    /// Rows whose destination write failed.
    pub insert_errors: usize,

    /// Rows whose transformation failed.
    pub create_errors: usize,

    /// Rows already present in the key map.
    pub skipped_rows: usize,

    /// Wall time of the step.
    #[serde(rename = "duration_seconds", serialize_with = "as_seconds")]
    pub duration: Duration,
}

impl StepMetrics {
    /// Empty counters for `step`.
    pub fn new(step: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            ..Default::default()
        }
    }

    /// Row-level failures counted against the error threshold.
    pub fn row_errors(&self) -> usize {
        self.insert_errors + self.create_errors
    }

    /// Rows visited by the loop.
    pub fn rows_seen(&self) -> usize {
        self.success_rows + self.row_errors() + self.skipped_rows
    }
}

fn as_seconds<S: Serializer>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Receives the counters of every step exactly once.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn log(&self, metrics: &StepMetrics) -> Result<()>;
}

/// Logs step counters through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetricsSink;

#[async_trait]
impl MetricsSink for TracingMetricsSink {
    async fn log(&self, m: &StepMetrics) -> Result<()> {
        info!(
            step = %m.step,
            success_rows = m.success_rows,
            insert_errors = m.insert_errors,
            create_errors = m.create_errors,
            skipped_rows = m.skipped_rows,
            duration_ms = m.duration.as_millis() as u64,
            "{}: {} copied, {} skipped, {} create errors, {} insert errors in {:.1}s",
            m.step,
            m.success_rows,
            m.skipped_rows,
            m.create_errors,
            m.insert_errors,
            m.duration.as_secs_f64()
        );
        Ok(())
    }
}

/// Collects step counters in memory.
#[derive(Debug, Default)]
pub struct MemoryMetricsSink {
    entries: Mutex<Vec<StepMetrics>>,
}

impl MemoryMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything logged so far, in order.
    pub fn snapshot(&self) -> Vec<StepMetrics> {
        self.entries
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MetricsSink for MemoryMetricsSink {
    async fn log(&self, metrics: &StepMetrics) -> Result<()> {
        self.entries
            .lock()
            .map_err(|_| CopyError::store("metrics sink lock poisoned"))?
            .push(metrics.clone());
        Ok(())
    }
}
