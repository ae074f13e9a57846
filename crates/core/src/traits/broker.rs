use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{models::TaskEnvelope, SchedulerResult};

/// 一次投递：执行器在 ack/nack 之前独占持有
#[derive(Debug, Clone)]
pub struct Delivery {
    pub envelope: TaskEnvelope,
    pub queue: String,
    /// 代理侧的投递凭据
    pub receipt: String,
    /// 该消息被投递的次数（含本次）
    pub delivery_count: u32,
}

impl Delivery {
    pub fn new(
        envelope: TaskEnvelope,
        queue: impl Into<String>,
        receipt: impl Into<String>,
        delivery_count: u32,
    ) -> Self {
        Self {
            envelope,
            queue: queue.into(),
            receipt: receipt.into(),
            delivery_count,
        }
    }

    /// 设置重新投递的最早时间，代理不支持延迟投递时仅作参考
    pub fn defer_until(&mut self, eta: DateTime<Utc>) {
        self.envelope.eta = Some(eta);
    }
}

/// 消息代理抽象接口
///
/// 至少一次投递：消费者在 dequeue 与 ack 之间崩溃时，
/// 消息必须在可见性超时后被重新投递。
#[async_trait]
pub trait Broker: Send + Sync {
    /// 持久化发布信封，代理接收后即返回
    async fn enqueue(&self, queue: &str, envelope: &TaskEnvelope) -> SchedulerResult<()>;

    /// 最多等待 `timeout` 取出一条消息，超时返回 `None`
    async fn dequeue(&self, queue: &str, timeout: Duration) -> SchedulerResult<Option<Delivery>>;

    /// 确认消息处理完成，永久移除
    async fn ack(&self, delivery: &Delivery) -> SchedulerResult<()>;

    /// 拒绝消息：`requeue` 为真时重新入队（尝试次数加一），否则进入死信
    async fn nack(&self, delivery: &Delivery, requeue: bool) -> SchedulerResult<()>;

    /// 获取队列中等待投递的消息数量
    async fn queue_size(&self, queue: &str) -> SchedulerResult<u64>;
}
