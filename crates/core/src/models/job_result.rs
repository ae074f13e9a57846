use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::TaskEnvelope;
use crate::errors::SchedulerError;

/// 任务执行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Started,
    Success,
    Failure,
    Retry,
}

impl JobStatus {
    /// 终态：不会再有执行器写入
    pub fn is_ready(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failure)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Started => "STARTED",
            JobStatus::Success => "SUCCESS",
            JobStatus::Failure => "FAILURE",
            JobStatus::Retry => "RETRY",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 捕获到的任务错误
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: String,
    pub message: String,
}

impl JobError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl From<&SchedulerError> for JobError {
    fn from(err: &SchedulerError) -> Self {
        let message = match err {
            SchedulerError::HandlerExecution { kind, message } => format!("{kind}: {message}"),
            other => other.to_string(),
        };
        JobError::new(err.kind(), message)
    }
}

/// 任务结果
///
/// 入队时创建为 `PENDING`，之后只由当前持有该信封的执行器改写。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: Uuid,
    pub task_name: String,
    pub status: JobStatus,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub error: Option<JobError>,
    pub attempt: u32,
    pub updated_at: DateTime<Utc>,
}

impl JobResult {
    fn from_envelope(envelope: &TaskEnvelope, status: JobStatus) -> Self {
        Self {
            job_id: envelope.job_id,
            task_name: envelope.task_name.clone(),
            status,
            value: None,
            error: None,
            attempt: envelope.attempt,
            updated_at: Utc::now(),
        }
    }

    pub fn pending(envelope: &TaskEnvelope) -> Self {
        Self::from_envelope(envelope, JobStatus::Pending)
    }

    pub fn started(envelope: &TaskEnvelope) -> Self {
        Self::from_envelope(envelope, JobStatus::Started)
    }

    pub fn success(envelope: &TaskEnvelope, value: Value) -> Self {
        let mut result = Self::from_envelope(envelope, JobStatus::Success);
        result.value = Some(value);
        result
    }

    pub fn retry(envelope: &TaskEnvelope, error: JobError) -> Self {
        let mut result = Self::from_envelope(envelope, JobStatus::Retry);
        result.error = Some(error);
        result
    }

    pub fn failure(envelope: &TaskEnvelope, error: JobError) -> Self {
        let mut result = Self::from_envelope(envelope, JobStatus::Failure);
        result.error = Some(error);
        result
    }

    pub fn is_ready(&self) -> bool {
        self.status.is_ready()
    }
}
