//! Observability: runtime telemetry (metrics) and sink abstractions.
//!
//! This module does not access storage. Index code reports what happened
//! through `sink::record`; nothing else in the crate touches metrics state.

pub(crate) mod metrics;
pub(crate) mod sink;

// re-exports
pub use metrics::{EventReport, TreeCounters};
pub use sink::{MetricsEvent, MetricsSink, metrics_report, metrics_reset_all, with_metrics_sink};
