//! 任务处理函数接口定义
//!
//! 任务按名称注册到 [`TaskRegistry`](crate::registry::TaskRegistry)，
//! 执行器根据信封中的任务名找到对应的处理函数并调用。
//!
//! ## 使用示例
//!
//! ```rust
//! use jobcast_core::traits::{handler_fn, HandlerError};
//!
//! let echo = handler_fn(|_ctx, args, _kwargs| async move {
//!     args.into_iter()
//!         .next()
//!         .ok_or_else(|| HandlerError::new("TypeError", "echo 需要一个参数"))
//! });
//! # let _ = echo;
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::models::{TaskArgs, TaskKwargs};

/// 任务处理函数抛出的错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    pub kind: String,
    pub message: String,
}

impl HandlerError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for HandlerError {}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        HandlerError::new("Error", format!("{err:#}"))
    }
}

pub type HandlerResult = Result<Value, HandlerError>;

/// 任务执行上下文
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub job_id: Uuid,
    pub task_name: String,
    pub attempt: u32,
    pub queue: String,
}

/// 任务处理函数接口
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn call(&self, ctx: &TaskContext, args: &[Value], kwargs: &TaskKwargs) -> HandlerResult;
}

/// 闭包形式的任务处理函数
pub struct FnHandler<F> {
    func: F,
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(TaskContext, TaskArgs, TaskKwargs) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    async fn call(&self, ctx: &TaskContext, args: &[Value], kwargs: &TaskKwargs) -> HandlerResult {
        (self.func)(ctx.clone(), args.to_vec(), kwargs.clone()).await
    }
}

/// 把异步闭包包装为任务处理函数
pub fn handler_fn<F, Fut>(func: F) -> Arc<dyn TaskHandler>
where
    F: Fn(TaskContext, TaskArgs, TaskKwargs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(FnHandler { func })
}
