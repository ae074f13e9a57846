//! Metrics collector for job execution
//!
//! Handles are resolved against whatever global recorder is installed; without
//! [`init_metrics`] every call is a no-op.

use anyhow::Result;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Install the Prometheus exporter with an HTTP listener on `bind_address`
pub fn init_metrics(bind_address: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(bind_address)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    info!("Prometheus metrics exporter listening on {}", bind_address);
    Ok(())
}

/// Metrics collector for workers and beat
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record a finished handler invocation, `status` is the resulting job status
    pub fn record_job_execution(&self, task_name: &str, status: &'static str, duration_seconds: f64) {
        counter!(
            "jobcast_job_executions_total",
            "task" => task_name.to_string(),
            "status" => status
        )
        .increment(1);
        histogram!("jobcast_job_execution_duration_seconds", "task" => task_name.to_string())
            .record(duration_seconds);
    }

    pub fn record_job_retry(&self, task_name: &str) {
        counter!("jobcast_job_retries_total", "task" => task_name.to_string()).increment(1);
    }

    pub fn record_unknown_task(&self, task_name: &str) {
        counter!("jobcast_unknown_tasks_total", "task" => task_name.to_string()).increment(1);
    }

    pub fn record_job_submitted(&self, task_name: &str, source: &'static str) {
        counter!(
            "jobcast_jobs_submitted_total",
            "task" => task_name.to_string(),
            "source" => source
        )
        .increment(1);
    }

    pub fn record_schedule_error(&self, entry_name: &str) {
        counter!("jobcast_beat_errors_total", "entry" => entry_name.to_string()).increment(1);
    }

    pub fn update_busy_workers(&self, worker_id: &str, busy: usize) {
        gauge!("jobcast_worker_busy", "worker" => worker_id.to_string()).set(busy as f64);
    }
}
