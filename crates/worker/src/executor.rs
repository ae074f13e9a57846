use chrono::{DateTime, Utc};
use futures::FutureExt;
use jobcast_core::{
    models::{JobError, JobResult},
    traits::{Broker, Delivery, HandlerError, ResultStore, TaskContext},
    SchedulerError, TaskRegistry,
};
use jobcast_infrastructure::observability::{MetricsCollector, StructuredLogger};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, warn};

/// 单次投递的处理结果
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Succeeded,
    /// 已重新入队，`delay` 后可再次执行
    Retrying { delay: Duration },
    /// 重试次数用尽
    Failed,
    /// 任务未注册，消息进入死信
    UnknownTask,
}

/// 任务执行器：解析任务、调用处理函数、记录状态并确认消息
///
/// 结果存储的写入失败只记录日志，不影响消息的确认。
pub struct TaskExecutor {
    registry: Arc<TaskRegistry>,
    broker: Arc<dyn Broker>,
    result_store: Arc<dyn ResultStore>,
    worker_id: String,
    metrics: MetricsCollector,
}

impl TaskExecutor {
    pub fn new(
        registry: Arc<TaskRegistry>,
        broker: Arc<dyn Broker>,
        result_store: Arc<dyn ResultStore>,
        worker_id: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            broker,
            result_store,
            worker_id: worker_id.into(),
            metrics: MetricsCollector::new(),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub async fn process(&self, mut delivery: Delivery) -> ExecutionOutcome {
        let envelope = delivery.envelope.clone();

        let definition = match self.registry.resolve(&envelope.task_name) {
            Ok(definition) => definition,
            Err(e) => {
                error!(
                    job_id = %envelope.job_id,
                    task_name = %envelope.task_name,
                    "收到未注册的任务: {}", e
                );
                self.metrics.record_unknown_task(&envelope.task_name);
                self.store(JobResult::failure(&envelope, JobError::from(&e))).await;
                self.settle(&delivery, Some(false)).await;
                return ExecutionOutcome::UnknownTask;
            }
        };

        self.store(JobResult::started(&envelope)).await;
        StructuredLogger::log_job_started(
            envelope.job_id,
            &envelope.task_name,
            envelope.attempt,
            &self.worker_id,
        );

        let ctx = TaskContext {
            job_id: envelope.job_id,
            task_name: envelope.task_name.clone(),
            attempt: envelope.attempt,
            queue: delivery.queue.clone(),
        };

        let started = Instant::now();
        let result = AssertUnwindSafe(definition.handler.call(&ctx, &envelope.args, &envelope.kwargs))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(HandlerError::new("Panic", panic_message(&*panic))));
        let elapsed = started.elapsed();

        match result {
            Ok(value) => {
                self.metrics
                    .record_job_execution(&envelope.task_name, "SUCCESS", elapsed.as_secs_f64());
                StructuredLogger::log_job_succeeded(
                    envelope.job_id,
                    &envelope.task_name,
                    &self.worker_id,
                    elapsed.as_millis() as u64,
                );
                self.store(JobResult::success(&envelope, value)).await;
                self.settle(&delivery, None).await;
                ExecutionOutcome::Succeeded
            }
            Err(handler_error) => {
                let job_error = JobError::from(&SchedulerError::HandlerExecution {
                    kind: handler_error.kind.clone(),
                    message: handler_error.message.clone(),
                });
                let policy = &definition.retry_policy;

                if policy.should_retry(envelope.attempt) {
                    let delay = policy.backoff.delay_for(envelope.attempt);
                    self.metrics
                        .record_job_execution(&envelope.task_name, "RETRY", elapsed.as_secs_f64());
                    self.metrics.record_job_retry(&envelope.task_name);
                    StructuredLogger::log_job_retry(
                        envelope.job_id,
                        &envelope.task_name,
                        envelope.attempt,
                        policy.max_attempts,
                        delay.as_millis() as u64,
                        &handler_error.to_string(),
                    );

                    self.store(JobResult::retry(&envelope, job_error)).await;
                    let now = Utc::now();
                    let eta = chrono::Duration::from_std(delay)
                        .ok()
                        .and_then(|delay| now.checked_add_signed(delay))
                        .unwrap_or(DateTime::<Utc>::MAX_UTC);
                    delivery.defer_until(eta);
                    self.settle(&delivery, Some(true)).await;
                    ExecutionOutcome::Retrying { delay }
                } else {
                    self.metrics
                        .record_job_execution(&envelope.task_name, "FAILURE", elapsed.as_secs_f64());
                    StructuredLogger::log_job_failed(
                        envelope.job_id,
                        &envelope.task_name,
                        envelope.attempt,
                        &job_error.kind,
                        &job_error.message,
                    );
                    self.store(JobResult::failure(&envelope, job_error)).await;
                    self.settle(&delivery, Some(false)).await;
                    ExecutionOutcome::Failed
                }
            }
        }
    }

    async fn store(&self, result: JobResult) {
        if let Err(e) = self.result_store.put(result.job_id, &result).await {
            warn!(
                job_id = %result.job_id,
                status = %result.status,
                "写入任务状态失败: {}", e
            );
        }
    }

    /// `None` 为确认，`Some(requeue)` 为拒绝
    async fn settle(&self, delivery: &Delivery, nack: Option<bool>) {
        let result = match nack {
            None => self.broker.ack(delivery).await,
            Some(requeue) => self.broker.nack(delivery, requeue).await,
        };
        if let Err(e) = result {
            error!(
                job_id = %delivery.envelope.job_id,
                receipt = %delivery.receipt,
                "消息确认失败，可能被重复投递: {}", e
            );
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "任务处理函数发生panic".to_string()
    }
}
