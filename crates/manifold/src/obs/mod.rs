//! Observability boundary.
//!
//! Core store/index/cache logic never touches counter state directly; all
//! instrumentation flows through [`sink::MetricsEvent`] and
//! [`sink::MetricsSink`].

pub mod metrics;
pub mod sink;

pub use metrics::OpCounters;
pub use sink::{MetricsEvent, MetricsSink, metrics_report, metrics_reset_all, with_metrics_sink};
