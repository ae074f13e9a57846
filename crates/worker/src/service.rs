use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use jobcast_core::{
    traits::{Broker, ResultStore},
    SchedulerError, SchedulerResult, TaskRegistry,
};
use jobcast_infrastructure::observability::MetricsCollector;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::executor::TaskExecutor;

/// Worker服务构建器
pub struct WorkerServiceBuilder {
    worker_id: String,
    registry: Arc<TaskRegistry>,
    broker: Arc<dyn Broker>,
    result_store: Arc<dyn ResultStore>,
    queues: Vec<String>,
    concurrency: usize,
    dequeue_timeout: Duration,
    shutdown_timeout: Duration,
    error_backoff: Duration,
}

impl WorkerServiceBuilder {
    pub fn new(
        worker_id: impl Into<String>,
        registry: Arc<TaskRegistry>,
        broker: Arc<dyn Broker>,
        result_store: Arc<dyn ResultStore>,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            registry,
            broker,
            result_store,
            queues: Vec::new(),
            concurrency: 4,
            dequeue_timeout: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(30),
            error_backoff: Duration::from_secs(1),
        }
    }

    /// 设置消费的队列，为空时消费注册表中所有任务的队列
    pub fn queues(mut self, queues: Vec<String>) -> Self {
        self.queues = queues;
        self
    }

    /// 设置并发执行数
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn dequeue_timeout(mut self, dequeue_timeout: Duration) -> Self {
        self.dequeue_timeout = dequeue_timeout;
        self
    }

    /// 停止时等待执行中任务的最长时间
    pub fn shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        self.shutdown_timeout = shutdown_timeout;
        self
    }

    /// 代理出错后的等待时间
    pub fn error_backoff(mut self, error_backoff: Duration) -> Self {
        self.error_backoff = error_backoff;
        self
    }

    pub fn build(self) -> SchedulerResult<WorkerService> {
        if self.concurrency == 0 {
            return Err(SchedulerError::Configuration(
                "worker 并发数必须大于0".to_string(),
            ));
        }

        let mut queues = if self.queues.is_empty() {
            self.registry.queues()
        } else {
            self.queues
        };
        if queues.is_empty() {
            queues.push(self.registry.default_queue().to_string());
        }
        // 去重并保持首次出现的顺序
        let mut seen = HashSet::new();
        queues.retain(|queue| seen.insert(queue.clone()));

        let executor = Arc::new(TaskExecutor::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.broker),
            self.result_store,
            self.worker_id.clone(),
        ));

        Ok(WorkerService {
            worker_id: self.worker_id,
            broker: self.broker,
            executor,
            queues: Arc::new(queues),
            concurrency: self.concurrency,
            dequeue_timeout: self.dequeue_timeout,
            shutdown_timeout: self.shutdown_timeout,
            error_backoff: self.error_backoff,
            busy: Arc::new(AtomicUsize::new(0)),
            handles: Mutex::new(Vec::new()),
            shutdown_tx: Arc::new(RwLock::new(None)),
            is_running: Arc::new(RwLock::new(false)),
        })
    }
}

/// Worker服务：固定数量的执行协程轮流从各队列取消息
///
/// 每个协程同一时刻只处理一条消息，停止信号不会打断执行中的任务。
pub struct WorkerService {
    worker_id: String,
    broker: Arc<dyn Broker>,
    executor: Arc<TaskExecutor>,
    queues: Arc<Vec<String>>,
    concurrency: usize,
    dequeue_timeout: Duration,
    shutdown_timeout: Duration,
    error_backoff: Duration,
    /// 正在执行任务的协程数
    busy: Arc<AtomicUsize>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: Arc<RwLock<Option<broadcast::Sender<()>>>>,
    is_running: Arc<RwLock<bool>>,
}

impl WorkerService {
    pub fn builder(
        worker_id: impl Into<String>,
        registry: Arc<TaskRegistry>,
        broker: Arc<dyn Broker>,
        result_store: Arc<dyn ResultStore>,
    ) -> WorkerServiceBuilder {
        WorkerServiceBuilder::new(worker_id, registry, broker, result_store)
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn queues(&self) -> &[String] {
        &self.queues
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn busy_workers(&self) -> usize {
        self.busy.load(Ordering::SeqCst)
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    /// 启动所有执行协程
    pub async fn start(&self) -> SchedulerResult<()> {
        {
            let mut is_running = self.is_running.write().await;
            if *is_running {
                warn!("Worker服务已在运行中");
                return Ok(());
            }
            *is_running = true;
        }

        info!(
            "启动Worker服务: {} (concurrency={}, queues={:?})",
            self.worker_id, self.concurrency, self.queues
        );

        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let mut handles = self.handles.lock().await;
        for slot in 0..self.concurrency {
            let worker_loop = WorkerLoop {
                slot,
                worker_id: self.worker_id.clone(),
                broker: Arc::clone(&self.broker),
                executor: Arc::clone(&self.executor),
                queues: Arc::clone(&self.queues),
                dequeue_timeout: self.dequeue_timeout,
                error_backoff: self.error_backoff,
                busy: Arc::clone(&self.busy),
                metrics: MetricsCollector::new(),
            };
            handles.push(tokio::spawn(worker_loop.run(shutdown_tx.subscribe())));
        }
        *self.shutdown_tx.write().await = Some(shutdown_tx);

        Ok(())
    }

    /// 发送停止信号并等待执行中的任务完成
    pub async fn stop(&self) -> SchedulerResult<()> {
        {
            let mut is_running = self.is_running.write().await;
            if !*is_running {
                return Ok(());
            }
            *is_running = false;
        }

        info!("停止Worker服务: {}", self.worker_id);
        if let Some(shutdown_tx) = self.shutdown_tx.write().await.take() {
            let _ = shutdown_tx.send(());
        }

        let handles: Vec<JoinHandle<()>> = self.handles.lock().await.drain(..).collect();
        let abort_handles: Vec<_> = handles.iter().map(|handle| handle.abort_handle()).collect();

        match tokio::time::timeout(self.shutdown_timeout, futures::future::join_all(handles)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        error!("执行协程异常退出: {}", e);
                    }
                }
                info!("Worker服务已停止: {}", self.worker_id);
            }
            Err(_) => {
                warn!(
                    "等待执行中任务超时 ({:?})，剩余 {} 个任务将由代理重新投递",
                    self.shutdown_timeout,
                    self.busy_workers()
                );
                for handle in abort_handles {
                    handle.abort();
                }
            }
        }
        Ok(())
    }

    /// 运行直到收到停止信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> SchedulerResult<()> {
        self.start().await?;
        let _ = shutdown_rx.recv().await;
        self.stop().await
    }
}

struct WorkerLoop {
    slot: usize,
    worker_id: String,
    broker: Arc<dyn Broker>,
    executor: Arc<TaskExecutor>,
    queues: Arc<Vec<String>>,
    dequeue_timeout: Duration,
    error_backoff: Duration,
    busy: Arc<AtomicUsize>,
    metrics: MetricsCollector,
}

impl WorkerLoop {
    async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        debug!("执行协程 {} 已启动", self.slot);

        // 多个队列时平分等待时间，避免某个空队列拖慢其它队列
        let per_queue_timeout = (self.dequeue_timeout / self.queues.len() as u32)
            .max(Duration::from_millis(10));
        let mut next_queue = self.slot % self.queues.len();

        loop {
            let queue = &self.queues[next_queue];
            next_queue = (next_queue + 1) % self.queues.len();

            let received = tokio::select! {
                received = self.broker.dequeue(queue, per_queue_timeout) => received,
                _ = shutdown_rx.recv() => {
                    debug!("执行协程 {} 收到停止信号", self.slot);
                    break;
                }
            };

            match received {
                Ok(Some(delivery)) => {
                    let busy = self.busy.fetch_add(1, Ordering::SeqCst) + 1;
                    self.metrics.update_busy_workers(&self.worker_id, busy);

                    let outcome = self.executor.process(delivery).await;
                    debug!("执行协程 {} 处理完成: {:?}", self.slot, outcome);

                    let busy = self.busy.fetch_sub(1, Ordering::SeqCst) - 1;
                    self.metrics.update_busy_workers(&self.worker_id, busy);
                }
                Ok(None) => {}
                Err(e) => {
                    error!("从队列 {} 取消息失败: {}", queue, e);
                    tokio::select! {
                        _ = tokio::time::sleep(self.error_backoff) => {}
                        _ = shutdown_rx.recv() => break,
                    }
                }
            }
        }

        debug!("执行协程 {} 已退出", self.slot);
    }
}
