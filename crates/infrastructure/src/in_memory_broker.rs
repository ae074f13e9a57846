use async_trait::async_trait;
use chrono::Utc;
use jobcast_core::{
    models::TaskEnvelope,
    traits::{Broker, Delivery},
    SchedulerError, SchedulerResult,
};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broker_metrics::{BrokerMetrics, BrokerMetricsSnapshot};

#[derive(Debug, Clone)]
pub struct InMemoryBrokerConfig {
    /// 已投递未确认的消息超过该时间后重新入队
    pub visibility_timeout: Duration,
    /// 阻塞出队时检查延迟消息的间隔
    pub poll_interval: Duration,
}

impl Default for InMemoryBrokerConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(3600),
            poll_interval: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone)]
struct QueuedMessage {
    envelope: TaskEnvelope,
    delivery_count: u32,
}

#[derive(Debug)]
struct InFlight {
    queue: String,
    message: QueuedMessage,
    visible_at: Instant,
}

#[derive(Debug, Default)]
struct BrokerState {
    queues: HashMap<String, VecDeque<QueuedMessage>>,
    /// 投递凭据 -> 未确认的消息
    in_flight: HashMap<String, InFlight>,
    dead_letters: HashMap<String, Vec<TaskEnvelope>>,
    /// job_id -> 累计投递次数
    deliveries: HashMap<Uuid, u32>,
}

impl BrokerState {
    /// 可见性超时的消息放回队首
    fn reclaim_expired(&mut self, now: Instant) -> u64 {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, in_flight)| in_flight.visible_at <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();

        for receipt in &expired {
            if let Some(in_flight) = self.in_flight.remove(receipt) {
                warn!(
                    job_id = %in_flight.message.envelope.job_id,
                    queue = %in_flight.queue,
                    "消息可见性超时，重新入队"
                );
                self.queues
                    .entry(in_flight.queue)
                    .or_default()
                    .push_front(in_flight.message);
            }
        }
        expired.len() as u64
    }

    fn take_ready(&mut self, queue: &str) -> Option<QueuedMessage> {
        let now = Utc::now();
        let pending = self.queues.get_mut(queue)?;
        let index = pending
            .iter()
            .position(|message| message.envelope.is_ready(now))?;
        pending.remove(index)
    }
}

/// 内存消息代理
///
/// 单进程内使用，进程退出后消息丢失。支持延迟投递、可见性超时重投和死信。
#[derive(Debug)]
pub struct InMemoryBroker {
    state: Mutex<BrokerState>,
    notify: Notify,
    config: InMemoryBrokerConfig,
    metrics: BrokerMetrics,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::with_config(InMemoryBrokerConfig::default())
    }

    pub fn with_config(config: InMemoryBrokerConfig) -> Self {
        info!("Creating in-memory broker with config: {:?}", config);
        Self {
            state: Mutex::new(BrokerState::default()),
            notify: Notify::new(),
            config,
            metrics: BrokerMetrics::new("memory"),
        }
    }

    /// 进入死信的信封
    pub async fn dead_letters(&self, queue: &str) -> Vec<TaskEnvelope> {
        let state = self.state.lock().await;
        state.dead_letters.get(queue).cloned().unwrap_or_default()
    }

    /// 某个任务累计被投递的次数
    pub async fn delivery_count(&self, job_id: Uuid) -> u32 {
        let state = self.state.lock().await;
        state.deliveries.get(&job_id).copied().unwrap_or(0)
    }

    /// 已投递但尚未确认的消息数量
    pub async fn in_flight_count(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }

    pub fn metrics(&self) -> BrokerMetricsSnapshot {
        self.metrics.get_stats()
    }

    async fn try_take(&self, queue: &str) -> Option<Delivery> {
        let mut state = self.state.lock().await;
        let reclaimed = state.reclaim_expired(Instant::now());
        if reclaimed > 0 {
            self.metrics.record_redelivered(reclaimed);
        }

        let mut message = state.take_ready(queue)?;
        message.delivery_count += 1;
        *state.deliveries.entry(message.envelope.job_id).or_insert(0) += 1;

        let receipt = Uuid::new_v4().to_string();
        let delivery = Delivery::new(
            message.envelope.clone(),
            queue,
            receipt.clone(),
            message.delivery_count,
        );
        state.in_flight.insert(
            receipt,
            InFlight {
                queue: queue.to_string(),
                message,
                visible_at: Instant::now() + self.config.visibility_timeout,
            },
        );
        Some(delivery)
    }

    async fn settle(&self, delivery: &Delivery) -> SchedulerResult<InFlight> {
        let mut state = self.state.lock().await;
        state.in_flight.remove(&delivery.receipt).ok_or_else(|| {
            SchedulerError::Delivery(format!(
                "未知的投递凭据 {} (job_id={})，消息可能已超时重投",
                delivery.receipt, delivery.envelope.job_id
            ))
        })
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn enqueue(&self, queue: &str, envelope: &TaskEnvelope) -> SchedulerResult<()> {
        if queue.is_empty() {
            return Err(SchedulerError::Delivery("队列名称不能为空".to_string()));
        }

        {
            let mut state = self.state.lock().await;
            state
                .queues
                .entry(queue.to_string())
                .or_default()
                .push_back(QueuedMessage {
                    envelope: envelope.clone(),
                    delivery_count: 0,
                });
        }
        self.metrics.record_published(queue);
        self.notify.notify_waiters();

        debug!(job_id = %envelope.job_id, queue = queue, "消息已写入内存队列");
        Ok(())
    }

    async fn dequeue(&self, queue: &str, timeout: Duration) -> SchedulerResult<Option<Delivery>> {
        let deadline = Instant::now() + timeout;

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(delivery) = self.try_take(queue).await {
                self.metrics.record_delivered(queue);
                return Ok(Some(delivery));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let wait = (deadline - now).min(self.config.poll_interval);
            let _ = tokio::time::timeout(wait, notified).await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> SchedulerResult<()> {
        self.settle(delivery).await?;
        self.metrics.record_acked();
        debug!(job_id = %delivery.envelope.job_id, "消息已确认");
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> SchedulerResult<()> {
        let in_flight = self.settle(delivery).await?;

        {
            let mut state = self.state.lock().await;
            if requeue {
                state
                    .queues
                    .entry(in_flight.queue)
                    .or_default()
                    .push_back(QueuedMessage {
                        envelope: delivery.envelope.next_attempt(),
                        delivery_count: 0,
                    });
            } else {
                state
                    .dead_letters
                    .entry(in_flight.queue)
                    .or_default()
                    .push(delivery.envelope.clone());
            }
        }

        if requeue {
            self.metrics.record_requeued();
            self.notify.notify_waiters();
            debug!(job_id = %delivery.envelope.job_id, eta = ?delivery.envelope.eta, "消息已重新入队");
        } else {
            self.metrics.record_dead_lettered();
            warn!(job_id = %delivery.envelope.job_id, queue = %delivery.queue, "消息已进入死信队列");
        }
        Ok(())
    }

    async fn queue_size(&self, queue: &str) -> SchedulerResult<u64> {
        let state = self.state.lock().await;
        let size = state.queues.get(queue).map_or(0, |pending| pending.len()) as u64;
        self.metrics.set_queue_depth(queue, size);
        Ok(size)
    }
}
