//! Per-step metrics and failure reporting.

mod metrics;
mod reporter;

pub use metrics::{MemoryMetricsSink, MetricsSink, StepMetrics, TracingMetricsSink};
pub use reporter::{
    ErrorReporter, MemoryErrorReporter, ReportedFailure, TracingErrorReporter,
};
