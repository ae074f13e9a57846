//! Structured logging utilities
//!
//! Subscriber setup plus helpers that emit the job lifecycle events with a
//! stable set of fields, so log pipelines can index on `event`.

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            other => Err(anyhow::anyhow!("不支持的日志格式: {other}")),
        }
    }
}

/// 初始化全局日志订阅器，`RUST_LOG` 优先于 `log_level`
pub fn init_logging(log_level: &str, log_format: LogFormat) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .context("初始化JSON日志格式失败")?,
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
            .context("初始化Pretty日志格式失败")?,
    }

    Ok(())
}

/// Structured logging utilities
pub struct StructuredLogger;

impl StructuredLogger {
    pub fn log_job_started(job_id: Uuid, task_name: &str, attempt: u32, worker_id: &str) {
        info!(
            event = "job_started",
            job.id = %job_id,
            task.name = task_name,
            job.attempt = attempt,
            worker.id = worker_id,
            "Job execution started"
        );
    }

    pub fn log_job_succeeded(job_id: Uuid, task_name: &str, worker_id: &str, duration_ms: u64) {
        info!(
            event = "job_succeeded",
            job.id = %job_id,
            task.name = task_name,
            worker.id = worker_id,
            job.duration_ms = duration_ms,
            "Job execution completed successfully"
        );
    }

    pub fn log_job_retry(
        job_id: Uuid,
        task_name: &str,
        attempt: u32,
        max_attempts: u32,
        delay_ms: u64,
        error_message: &str,
    ) {
        warn!(
            event = "job_retry",
            job.id = %job_id,
            task.name = task_name,
            job.attempt = attempt,
            job.max_attempts = max_attempts,
            job.retry_delay_ms = delay_ms,
            job.error = error_message,
            "Job failed, retry scheduled"
        );
    }

    pub fn log_job_failed(
        job_id: Uuid,
        task_name: &str,
        attempt: u32,
        error_kind: &str,
        error_message: &str,
    ) {
        error!(
            event = "job_failed",
            job.id = %job_id,
            task.name = task_name,
            job.attempt = attempt,
            job.error_kind = error_kind,
            job.error = error_message,
            "Job execution failed permanently"
        );
    }

    pub fn log_schedule_fired(entry_name: &str, task_name: &str, job_id: Uuid, queue: &str) {
        info!(
            event = "schedule_fired",
            schedule.name = entry_name,
            task.name = task_name,
            job.id = %job_id,
            queue = queue,
            "Scheduled job submitted"
        );
    }
}
