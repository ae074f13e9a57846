//! Observability module
//!
//! Structured logging setup and Prometheus metrics for job execution.

pub mod metrics_collector;
pub mod structured_logger;

pub use metrics_collector::{init_metrics, MetricsCollector};
pub use structured_logger::{init_logging, LogFormat, StructuredLogger};
