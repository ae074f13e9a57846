use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use jobcast_beat::Beat;
use jobcast_core::{
    AppConfig, Broker, ResultStore, ScheduleEntryConfig, TaskProducer, TaskRegistry,
};
use jobcast_infrastructure::{BrokerFactory, ResultStoreFactory};
use jobcast_worker::WorkerService;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::tasks::{default_schedule, register_builtin_tasks};

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 仅运行Worker
    Worker,
    /// 仅运行周期调度器
    Beat,
    /// 同一进程内运行调度器和Worker
    All,
}

/// 主应用程序：按启动顺序组装注册表、代理、结果存储和各组件
///
/// 任务注册在代理连接之前完成，注册错误会直接中止启动。
pub struct Application {
    config: AppConfig,
    worker_id: String,
    registry: Arc<TaskRegistry>,
    broker: Arc<dyn Broker>,
    result_store: Arc<dyn ResultStore>,
    producer: TaskProducer,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let registry = Arc::new(build_registry(&config)?);
        let worker_id = config.worker_id();

        let broker = BrokerFactory::create(&config.broker, &worker_id)
            .await
            .context("创建消息代理失败")?;
        let result_store = ResultStoreFactory::create(&config.result_backend)
            .await
            .context("创建结果存储失败")?;

        Ok(Self::with_backends(config, registry, broker, result_store))
    }

    /// 使用已创建的注册表和后端组装应用
    pub fn with_backends(
        config: AppConfig,
        registry: Arc<TaskRegistry>,
        broker: Arc<dyn Broker>,
        result_store: Arc<dyn ResultStore>,
    ) -> Self {
        let producer = TaskProducer::new(
            Arc::clone(&registry),
            Arc::clone(&broker),
            Arc::clone(&result_store),
        );
        Self {
            worker_id: config.worker_id(),
            config,
            registry,
            broker,
            result_store,
            producer,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn producer(&self) -> &TaskProducer {
        &self.producer
    }

    /// 按配置创建周期调度器，默认调度在前，配置条目在后
    pub fn build_beat(&self) -> Result<Beat> {
        let timezone = self.config.timezone_offset()?;
        let mut beat = Beat::new(self.producer.clone(), timezone).with_max_poll_interval(
            Duration::from_secs(self.config.beat.max_poll_interval_seconds),
        );

        for entry in self.schedule_entries() {
            let name = entry.name.clone();
            beat.add_entry(entry)
                .with_context(|| format!("添加调度条目失败: {name}"))?;
        }
        Ok(beat)
    }

    pub fn build_worker(&self) -> Result<WorkerService> {
        let worker = &self.config.worker;
        WorkerService::builder(
            self.worker_id.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.broker),
            Arc::clone(&self.result_store),
        )
        .queues(worker.queues.clone())
        .concurrency(worker.concurrency)
        .dequeue_timeout(Duration::from_millis(worker.dequeue_timeout_ms))
        .shutdown_timeout(Duration::from_secs(worker.shutdown_timeout_seconds))
        .build()
        .context("创建Worker服务失败")
    }

    fn schedule_entries(&self) -> Vec<ScheduleEntryConfig> {
        let mut entries = if self.config.beat.include_default_schedule {
            default_schedule()
        } else {
            Vec::new()
        };
        entries.extend(self.config.beat.schedule.iter().cloned());
        entries
    }

    /// 运行应用程序直到收到关闭信号
    pub async fn run(&self, mode: AppMode, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动应用程序，模式: {:?}", mode);

        match mode {
            AppMode::Worker => self.run_worker(shutdown_rx).await,
            AppMode::Beat => self.run_beat(shutdown_rx).await,
            AppMode::All => self.run_all_components(shutdown_rx).await,
        }
    }

    async fn run_worker(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let worker = self.build_worker()?;
        worker.run(shutdown_rx).await.context("Worker服务运行失败")
    }

    async fn run_beat(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let beat = self.build_beat()?;
        beat.run(shutdown_rx).await.context("周期调度器运行失败")
    }

    async fn run_all_components(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let beat = self.build_beat()?;
        let worker = self.build_worker()?;

        let beat_handle = tokio::spawn(beat.run(shutdown_rx.resubscribe()));
        let worker_result = worker.run(shutdown_rx).await;

        match beat_handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("周期调度器运行失败: {}", e),
            Err(e) => error!("周期调度器任务异常退出: {}", e),
        }

        worker_result.context("Worker服务运行失败")?;
        info!("所有组件已停止");
        Ok(())
    }
}

/// 创建任务注册表：内置任务加上配置中的队列覆盖
pub fn build_registry(config: &AppConfig) -> Result<TaskRegistry> {
    let mut registry =
        TaskRegistry::with_defaults(config.broker.default_queue.clone(), config.retry.clone());
    register_builtin_tasks(&mut registry).context("注册内置任务失败")?;
    registry
        .apply_queue_overrides(&config.task_queues)
        .context("应用任务队列配置失败")?;
    Ok(registry)
}
