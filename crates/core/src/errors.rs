use thiserror::Error;

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("任务已注册: {name}")]
    DuplicateTask { name: String },

    #[error("任务未注册: {name}")]
    UnknownTask { name: String },

    #[error("消息代理不可用: {0}")]
    BrokerUnavailable(String),

    #[error("消息投递错误: {0}")]
    Delivery(String),

    #[error("任务执行错误: {kind}: {message}")]
    HandlerExecution { kind: String, message: String },

    #[error("结果存储错误: {0}")]
    ResultStore(String),

    #[error("任务结果未找到: {job_id}")]
    JobNotFound { job_id: String },

    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },

    #[error("无效的调度条目: {0}")]
    InvalidSchedule(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl SchedulerError {
    /// 错误种类名称，写入任务结果的 `error.kind`
    pub fn kind(&self) -> &'static str {
        match self {
            SchedulerError::DuplicateTask { .. } => "DuplicateTaskError",
            SchedulerError::UnknownTask { .. } => "UnknownTaskError",
            SchedulerError::BrokerUnavailable(_) => "BrokerUnavailableError",
            SchedulerError::Delivery(_) => "DeliveryError",
            SchedulerError::HandlerExecution { .. } => "HandlerExecutionError",
            SchedulerError::ResultStore(_) => "ResultStoreError",
            SchedulerError::JobNotFound { .. } => "JobNotFoundError",
            SchedulerError::InvalidCron { .. } => "InvalidCronError",
            SchedulerError::InvalidSchedule(_) => "InvalidScheduleError",
            SchedulerError::Configuration(_) => "ConfigurationError",
            SchedulerError::Serialization(_) => "SerializationError",
            SchedulerError::Internal(_) => "InternalError",
        }
    }

    /// 传输层错误（代理不可用或投递失败）
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SchedulerError::BrokerUnavailable(_) | SchedulerError::Delivery(_)
        )
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(e: serde_json::Error) -> Self {
        SchedulerError::Serialization(e.to_string())
    }
}

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let err = SchedulerError::DuplicateTask {
            name: "echo".to_string(),
        };
        assert_eq!(err.kind(), "DuplicateTaskError");
        assert!(err.to_string().contains("echo"));

        let err = SchedulerError::HandlerExecution {
            kind: "ValueError".to_string(),
            message: "bad input".to_string(),
        };
        assert_eq!(err.kind(), "HandlerExecutionError");
        assert_eq!(err.to_string(), "任务执行错误: ValueError: bad input");
    }

    #[test]
    fn test_transport_errors() {
        assert!(SchedulerError::BrokerUnavailable("down".into()).is_transport());
        assert!(SchedulerError::Delivery("lost".into()).is_transport());
        assert!(!SchedulerError::ResultStore("timeout".into()).is_transport());
    }

    #[test]
    fn test_serde_error_conversion() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: SchedulerError = parse_err.into();
        assert_eq!(err.kind(), "SerializationError");
    }
}
