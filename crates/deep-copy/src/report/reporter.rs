//! Structured failure callbacks.
//!
//! Every error handed to a reporter is already classified
//! ([`CopyError::Step`]), so the step name, [`ErrorLocation`] and, for row
//! failures, the source key are available from the error itself. Rows are
//! passed as JSON.

use std::sync::Mutex;

use serde_json::Value;
use tracing::error;

use crate::error::{CopyError, ErrorLocation};

/// Receives classified step failures.
///
/// Reporters observe failures; they cannot change how the engine handles
/// them.
pub trait ErrorReporter: Send + Sync {
    /// The source query failed; the step processed no rows.
    fn on_query_failure(&self, step: &str, err: &CopyError);

    /// The row loop failed outside any single row.
    fn on_loop_failure(&self, step: &str, err: &CopyError);

    /// Transforming `source_row` failed.
    fn on_create_failure(&self, step: &str, err: &CopyError, source_row: &Value);

    /// Writing `new_row`, built from `source_row`, failed.
    fn on_insert_failure(&self, step: &str, err: &CopyError, source_row: &Value, new_row: &Value);
}

/// Logs every failure at `error` level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorReporter;

impl ErrorReporter for TracingErrorReporter {
    fn on_query_failure(&self, step: &str, err: &CopyError) {
        error!(step = %step, location = "querying", "{}", err.root_cause());
    }

    fn on_loop_failure(&self, step: &str, err: &CopyError) {
        error!(step = %step, location = "looping", "{}", err.root_cause());
    }

    fn on_create_failure(&self, step: &str, err: &CopyError, source_row: &Value) {
        error!(
            step = %step,
            location = "creating",
            source_key = source_key(err).unwrap_or("-"),
            source_row = %source_row,
            "{}",
            err.root_cause()
        );
    }

    fn on_insert_failure(&self, step: &str, err: &CopyError, source_row: &Value, new_row: &Value) {
        error!(
            step = %step,
            location = "inserting",
            source_key = source_key(err).unwrap_or("-"),
            source_row = %source_row,
            new_row = %new_row,
            "{}",
            err.root_cause()
        );
    }
}

fn source_key(err: &CopyError) -> Option<&str> {
    match err {
        CopyError::Step { key, .. } => key.as_deref(),
        _ => None,
    }
}

/// One failure captured by [`MemoryErrorReporter`].
#[derive(Debug, Clone, PartialEq)]
pub struct ReportedFailure {
    pub step: String,
    pub location: ErrorLocation,
    pub key: Option<String>,
    pub message: String,
    pub source_row: Option<Value>,
    pub new_row: Option<Value>,
}

/// Collects failures in memory.
#[derive(Debug, Default)]
pub struct MemoryErrorReporter {
    failures: Mutex<Vec<ReportedFailure>>,
}

impl MemoryErrorReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything reported so far, in order.
    pub fn snapshot(&self) -> Vec<ReportedFailure> {
        self.failures
            .lock()
            .map(|f| f.clone())
            .unwrap_or_default()
    }

    fn push(
        &self,
        step: &str,
        fallback: ErrorLocation,
        err: &CopyError,
        source_row: Option<&Value>,
        new_row: Option<&Value>,
    ) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.push(ReportedFailure {
                step: step.to_string(),
                location: err.location().unwrap_or(fallback),
                key: source_key(err).map(str::to_string),
                message: err.root_cause().to_string(),
                source_row: source_row.cloned(),
                new_row: new_row.cloned(),
            });
        }
    }
}

impl ErrorReporter for MemoryErrorReporter {
    fn on_query_failure(&self, step: &str, err: &CopyError) {
        self.push(step, ErrorLocation::Querying, err, None, None);
    }

    fn on_loop_failure(&self, step: &str, err: &CopyError) {
        self.push(step, ErrorLocation::Looping, err, None, None);
    }

    fn on_create_failure(&self, step: &str, err: &CopyError, source_row: &Value) {
        self.push(step, ErrorLocation::Creating, err, Some(source_row), None);
    }

    fn on_insert_failure(&self, step: &str, err: &CopyError, source_row: &Value, new_row: &Value) {
        self.push(step, ErrorLocation::Inserting, err, Some(source_row), Some(new_row));
    }
}
