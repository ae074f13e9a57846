//! 任务执行：从代理取消息、调用处理函数、记录结果并确认

pub mod executor;
pub mod service;

pub use executor::{ExecutionOutcome, TaskExecutor};
pub use service::{WorkerService, WorkerServiceBuilder};
