use chrono::{DateTime, FixedOffset, Utc};
use jobcast_core::{
    models::{ScheduleEntryConfig, TaskEnvelope},
    SchedulerError, SchedulerResult, TaskProducer,
};
use jobcast_infrastructure::observability::{MetricsCollector, StructuredLogger};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::schedule::ScheduleEntry;

/// 运行中的调度器接收的命令
#[derive(Debug)]
enum BeatCommand {
    Add(ScheduleEntryConfig),
    Remove(String),
}

/// 一次触发的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiredJob {
    pub entry: String,
    pub task: String,
    pub job_id: Uuid,
    pub queue: String,
}

/// 周期任务调度器
///
/// 单实例运行。每次 `tick` 找出所有到期条目，生成新的 job_id 提交到消息代理，
/// 再计算各条目的下一次触发时间。提交失败只记录日志，条目照常推进。
pub struct Beat {
    producer: TaskProducer,
    entries: Vec<ScheduleEntry>,
    clock: Arc<dyn Clock>,
    timezone: FixedOffset,
    max_poll_interval: Duration,
    metrics: MetricsCollector,
    command_tx: mpsc::UnboundedSender<BeatCommand>,
    command_rx: mpsc::UnboundedReceiver<BeatCommand>,
}

/// 调度器句柄，可在调度器运行时增删条目
#[derive(Debug, Clone)]
pub struct BeatHandle {
    command_tx: mpsc::UnboundedSender<BeatCommand>,
}

impl BeatHandle {
    pub fn add_entry(&self, config: ScheduleEntryConfig) -> SchedulerResult<()> {
        self.command_tx
            .send(BeatCommand::Add(config))
            .map_err(|_| SchedulerError::Internal("调度器已停止".to_string()))
    }

    pub fn remove_entry(&self, name: impl Into<String>) -> SchedulerResult<()> {
        self.command_tx
            .send(BeatCommand::Remove(name.into()))
            .map_err(|_| SchedulerError::Internal("调度器已停止".to_string()))
    }
}

impl Beat {
    pub fn new(producer: TaskProducer, timezone: FixedOffset) -> Self {
        Self::with_clock(producer, timezone, Arc::new(SystemClock))
    }

    pub fn with_clock(producer: TaskProducer, timezone: FixedOffset, clock: Arc<dyn Clock>) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        Self {
            producer,
            entries: Vec::new(),
            clock,
            timezone,
            max_poll_interval: Duration::from_secs(5),
            metrics: MetricsCollector::new(),
            command_tx,
            command_rx,
        }
    }

    pub fn with_max_poll_interval(mut self, max_poll_interval: Duration) -> Self {
        self.max_poll_interval = max_poll_interval;
        self
    }

    pub fn handle(&self) -> BeatHandle {
        BeatHandle {
            command_tx: self.command_tx.clone(),
        }
    }

    /// 添加调度条目，名称重复或任务未注册时返回错误
    pub fn add_entry(&mut self, config: ScheduleEntryConfig) -> SchedulerResult<()> {
        if self.entries.iter().any(|entry| entry.name == config.name) {
            return Err(SchedulerError::InvalidSchedule(format!(
                "调度条目名称重复: {}",
                config.name
            )));
        }
        self.producer.registry().resolve(&config.task)?;

        let entry = ScheduleEntry::new(config, self.timezone, self.clock.now())?;
        info!(
            "添加调度条目: {} -> {} (下次触发: {})",
            entry.name,
            entry.task,
            entry.next_fire_at().format("%Y-%m-%d %H:%M:%S UTC")
        );
        self.entries.push(entry);
        Ok(())
    }

    pub fn remove_entry(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.name != name);
        let removed = self.entries.len() != before;
        if removed {
            info!("移除调度条目: {}", name);
        }
        removed
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    pub fn entry(&self, name: &str) -> Option<&ScheduleEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    /// 最早的下一次触发时间
    pub fn next_wakeup(&self) -> Option<DateTime<Utc>> {
        self.entries.iter().map(ScheduleEntry::next_fire_at).min()
    }

    /// 提交所有到期条目，返回成功提交的任务
    pub async fn tick(&mut self) -> Vec<FiredJob> {
        self.drain_commands();

        let now = self.clock.now();
        let producer = &self.producer;
        let mut fired = Vec::new();

        for entry in self.entries.iter_mut().filter(|entry| entry.is_due(now)) {
            debug!(
                "调度条目到期: {} (计划时间: {}, 当前时间: {})",
                entry.name,
                entry.next_fire_at().format("%Y-%m-%d %H:%M:%S UTC"),
                now.format("%Y-%m-%d %H:%M:%S UTC")
            );

            match Self::fire(producer, entry, now).await {
                Ok(job) => {
                    self.metrics.record_job_submitted(&job.task, "beat");
                    StructuredLogger::log_schedule_fired(&job.entry, &job.task, job.job_id, &job.queue);
                    fired.push(job);
                }
                Err(e) => {
                    self.metrics.record_schedule_error(&entry.name);
                    error!("调度条目 {} 提交失败: {}", entry.name, e);
                }
            }
            entry.advance(now);
        }

        fired
    }

    async fn fire(
        producer: &TaskProducer,
        entry: &ScheduleEntry,
        now: DateTime<Utc>,
    ) -> SchedulerResult<FiredJob> {
        let definition = producer.registry().resolve(&entry.task)?;
        let queue = entry
            .queue
            .clone()
            .unwrap_or_else(|| definition.default_queue.clone());

        let envelope = TaskEnvelope::new(&entry.task, entry.args.clone(), entry.kwargs.clone())
            .with_enqueued_at(now);
        producer.publish(&queue, &envelope).await?;

        Ok(FiredJob {
            entry: entry.name.clone(),
            task: entry.task.clone(),
            job_id: envelope.job_id,
            queue,
        })
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.command_rx.try_recv() {
            self.apply_command(command);
        }
    }

    fn apply_command(&mut self, command: BeatCommand) {
        match command {
            BeatCommand::Add(config) => {
                let name = config.name.clone();
                if let Err(e) = self.add_entry(config) {
                    warn!("无法添加调度条目 {}: {}", name, e);
                }
            }
            BeatCommand::Remove(name) => {
                if !self.remove_entry(&name) {
                    warn!("调度条目不存在: {}", name);
                }
            }
        }
    }

    /// 距离下一次检查的休眠时间，不超过 `max_poll_interval`
    fn sleep_duration(&self) -> Duration {
        let now = self.clock.now();
        self.next_wakeup()
            .map(|next| (next - now).to_std().unwrap_or(Duration::ZERO))
            .unwrap_or(self.max_poll_interval)
            .min(self.max_poll_interval)
    }

    /// 运行调度循环直到收到关闭信号
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) -> SchedulerResult<()> {
        info!("周期调度器启动，共 {} 个调度条目", self.entries.len());

        loop {
            self.tick().await;
            let sleep = self.sleep_duration();

            tokio::select! {
                _ = tokio::time::sleep(sleep) => {}
                Some(command) = self.command_rx.recv() => {
                    self.apply_command(command);
                }
                _ = shutdown_rx.recv() => {
                    info!("周期调度器收到关闭信号");
                    break;
                }
            }
        }

        info!("周期调度器已停止");
        Ok(())
    }
}
