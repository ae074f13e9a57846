//! 任务调度核心：任务模型、注册表、生产者以及代理与结果存储的抽象接口

pub mod config;
pub mod errors;
pub mod models;
pub mod producer;
pub mod registry;
pub mod traits;

pub use config::AppConfig;
pub use errors::{SchedulerError, SchedulerResult};
pub use models::{
    BackoffPolicy, CrontabSpec, JobError, JobResult, JobStatus, RetryPolicy, ScheduleEntryConfig,
    TaskArgs, TaskDefinition, TaskEnvelope, TaskKwargs, Trigger,
};
pub use producer::{SubmitOptions, TaskProducer};
pub use registry::{TaskRegistry, DEFAULT_QUEUE};
pub use traits::{
    handler_fn, Broker, Delivery, HandlerError, HandlerResult, ResultStore, TaskContext,
    TaskHandler,
};
