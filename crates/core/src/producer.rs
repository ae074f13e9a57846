use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    models::{JobError, JobResult, TaskArgs, TaskEnvelope, TaskKwargs},
    registry::TaskRegistry,
    traits::{Broker, ResultStore},
    SchedulerError, SchedulerResult,
};

/// 提交选项
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// 覆盖任务的默认队列
    pub queue: Option<String>,
    /// 最早执行时间
    pub eta: Option<DateTime<Utc>>,
    /// 相对当前时间的延迟，与 `eta` 同时设置时以较晚者为准
    pub countdown: Option<Duration>,
}

impl SubmitOptions {
    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn eta(mut self, eta: DateTime<Utc>) -> Self {
        self.eta = Some(eta);
        self
    }

    pub fn countdown(mut self, countdown: Duration) -> Self {
        self.countdown = Some(countdown);
        self
    }

    fn resolve_eta(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let from_countdown = self
            .countdown
            .and_then(|countdown| chrono::Duration::from_std(countdown).ok())
            .map(|countdown| now + countdown);
        match (self.eta, from_countdown) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }
}

/// 任务生产者：提交任务与查询任务状态的入口
///
/// HTTP 层和调度器都通过它把信封送入消息代理。
#[derive(Clone)]
pub struct TaskProducer {
    registry: Arc<TaskRegistry>,
    broker: Arc<dyn Broker>,
    result_store: Arc<dyn ResultStore>,
}

impl TaskProducer {
    pub fn new(
        registry: Arc<TaskRegistry>,
        broker: Arc<dyn Broker>,
        result_store: Arc<dyn ResultStore>,
    ) -> Self {
        Self {
            registry,
            broker,
            result_store,
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// 按名称提交任务，返回 job_id
    pub async fn submit(
        &self,
        task_name: &str,
        args: TaskArgs,
        kwargs: TaskKwargs,
        queue: Option<&str>,
    ) -> SchedulerResult<Uuid> {
        let options = SubmitOptions {
            queue: queue.map(str::to_string),
            ..SubmitOptions::default()
        };
        self.submit_with_options(task_name, args, kwargs, options)
            .await
    }

    pub async fn submit_with_options(
        &self,
        task_name: &str,
        args: TaskArgs,
        kwargs: TaskKwargs,
        options: SubmitOptions,
    ) -> SchedulerResult<Uuid> {
        let definition = self.registry.resolve(task_name)?;
        let queue = options
            .queue
            .clone()
            .unwrap_or_else(|| definition.default_queue.clone());

        let now = Utc::now();
        let mut envelope = TaskEnvelope::new(task_name, args, kwargs).with_enqueued_at(now);
        envelope.eta = options.resolve_eta(now);

        self.publish(&queue, &envelope).await?;
        Ok(envelope.job_id)
    }

    /// 记录 PENDING 状态并把信封发布到指定队列
    ///
    /// 结果写入失败只记录日志；发布失败会返回给调用方，由调用方决定是否重试。
    pub async fn publish(&self, queue: &str, envelope: &TaskEnvelope) -> SchedulerResult<()> {
        if let Err(e) = self
            .result_store
            .put(envelope.job_id, &JobResult::pending(envelope))
            .await
        {
            warn!(
                job_id = %envelope.job_id,
                task_name = %envelope.task_name,
                "写入PENDING状态失败: {}", e
            );
        }

        if let Err(e) = self.broker.enqueue(queue, envelope).await {
            let failure = JobResult::failure(envelope, JobError::from(&e));
            if let Err(store_err) = self.result_store.put(envelope.job_id, &failure).await {
                debug!(job_id = %envelope.job_id, "记录入队失败状态失败: {}", store_err);
            }
            return Err(e);
        }

        info!(
            job_id = %envelope.job_id,
            task_name = %envelope.task_name,
            queue = queue,
            eta = ?envelope.eta,
            "任务已入队"
        );
        Ok(())
    }

    /// 查询任务状态
    pub async fn get_status(&self, job_id: Uuid) -> SchedulerResult<JobResult> {
        self.result_store
            .get(job_id)
            .await?
            .ok_or_else(|| SchedulerError::JobNotFound {
                job_id: job_id.to_string(),
            })
    }
}
