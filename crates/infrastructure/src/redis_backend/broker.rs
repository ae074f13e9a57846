use async_trait::async_trait;
use chrono::Utc;
use jobcast_core::{
    models::TaskEnvelope,
    traits::{Broker, Delivery},
    SchedulerError, SchedulerResult,
};
use redis::streams::{
    StreamClaimReply, StreamId, StreamPendingCountReply, StreamPendingReply, StreamRangeReply,
    StreamReadReply,
};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::config::RedisBrokerConfig;
use super::connection::{map_broker_error, RedisConnection};
use crate::broker_metrics::{BrokerMetrics, BrokerMetricsSnapshot};

const PAYLOAD_FIELD: &str = "payload";
const PROMOTE_BATCH: usize = 100;

/// 原子地把到期的延迟消息移入 Stream
const PROMOTE_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
for _, payload in ipairs(due) do
    redis.call('ZREM', KEYS[1], payload)
    redis.call('XADD', KEYS[2], '*', ARGV[3], payload)
end
return #due
"#;

/// 仅当条目仍由当前消费者持有且投递次数一致时才结算
///
/// KEYS: stream, 目标键（延迟集合 / Stream / 死信 Stream，确认时不使用）
/// ARGV: group, entry id, consumer, delivery count, mode, payload field, payload, score
/// 返回 1 成功；0 条目已不在待确认列表；-1 已被其他投递接管
const SETTLE_SCRIPT: &str = r#"
local pending = redis.call('XPENDING', KEYS[1], ARGV[1], ARGV[2], ARGV[2], 1)
local entry = pending[1]
if not entry then
    return 0
end
if entry[2] ~= ARGV[3] or tonumber(entry[4]) ~= tonumber(ARGV[4]) then
    return -1
end
redis.call('XACK', KEYS[1], ARGV[1], ARGV[2])
redis.call('XDEL', KEYS[1], ARGV[2])
if ARGV[5] == 'delayed' then
    redis.call('ZADD', KEYS[2], ARGV[8], ARGV[7])
elseif ARGV[5] == 'stream' then
    redis.call('XADD', KEYS[2], '*', ARGV[6], ARGV[7])
end
return 1
"#;

/// 结算方式
enum Settlement {
    Ack,
    /// 立即重新入队
    Requeue(String),
    /// 写入延迟集合，分数为毫秒时间戳
    Delay(String, i64),
    DeadLetter(String),
}

/// 基于 Redis Stream 消费组的消息代理
///
/// 已读取未确认的消息停留在消费组的 PEL 中，空闲超过可见性超时后由任意消费者
/// 通过 XCLAIM 接管。带 eta 的消息先写入有序集合，到期后再进入 Stream。
///
/// 阻塞的 XREADGROUP 独占一条连接，避免拖住同一连接上的确认与入队命令。
pub struct RedisBroker {
    connection: RedisConnection,
    reader: RedisConnection,
    config: RedisBrokerConfig,
    metrics: BrokerMetrics,
    promote_script: redis::Script,
    settle_script: redis::Script,
    known_groups: Mutex<HashSet<String>>,
}

impl RedisBroker {
    pub async fn connect(config: RedisBrokerConfig) -> SchedulerResult<Self> {
        let connection = RedisConnection::connect(&config.url, config.connection_timeout).await?;
        let reader = RedisConnection::connect(&config.url, config.connection_timeout).await?;
        info!(
            "Redis broker connected to {} (group={}, consumer={})",
            connection.url(),
            config.consumer_group,
            config.consumer_name
        );

        Ok(Self {
            connection,
            reader,
            config,
            metrics: BrokerMetrics::new("redis"),
            promote_script: redis::Script::new(PROMOTE_SCRIPT),
            settle_script: redis::Script::new(SETTLE_SCRIPT),
            known_groups: Mutex::new(HashSet::new()),
        })
    }

    pub fn config(&self) -> &RedisBrokerConfig {
        &self.config
    }

    pub fn metrics(&self) -> BrokerMetricsSnapshot {
        self.metrics.get_stats()
    }

    /// 读取死信队列中的信封
    pub async fn dead_letters(&self, queue: &str) -> SchedulerResult<Vec<TaskEnvelope>> {
        let mut conn = self.connection.manager();
        let reply: StreamRangeReply = redis::cmd("XRANGE")
            .arg(self.config.dead_letter_key(queue))
            .arg("-")
            .arg("+")
            .query_async(&mut conn)
            .await
            .map_err(map_broker_error)?;

        reply
            .ids
            .iter()
            .filter_map(|entry| entry.get::<String>(PAYLOAD_FIELD))
            .map(|payload| TaskEnvelope::deserialize(&payload).map_err(SchedulerError::from))
            .collect()
    }

    async fn ensure_group(&self, stream_key: &str) -> SchedulerResult<()> {
        if self.known_groups.lock().await.contains(stream_key) {
            return Ok(());
        }

        let mut conn = self.connection.manager();
        let result: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream_key)
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(()) => debug!(
                "Created consumer group {} on {}",
                self.config.consumer_group, stream_key
            ),
            Err(e) if e.code() == Some("BUSYGROUP") => {
                debug!("Consumer group {} already exists", self.config.consumer_group)
            }
            Err(e) => {
                self.metrics.record_connection_error();
                return Err(map_broker_error(e));
            }
        }

        self.known_groups.lock().await.insert(stream_key.to_string());
        Ok(())
    }

    async fn promote_due(&self, queue: &str) -> SchedulerResult<()> {
        let mut conn = self.connection.manager();
        let promoted: i64 = self
            .promote_script
            .key(self.config.delayed_key(queue))
            .key(self.config.stream_key(queue))
            .arg(Utc::now().timestamp_millis())
            .arg(PROMOTE_BATCH)
            .arg(PAYLOAD_FIELD)
            .invoke_async(&mut conn)
            .await
            .map_err(map_broker_error)?;

        if promoted > 0 {
            debug!(queue = queue, count = promoted, "延迟消息已到期，移入队列");
        }
        Ok(())
    }

    /// 接管空闲超过可见性超时的消息
    async fn claim_stale(&self, queue: &str, stream_key: &str) -> SchedulerResult<Option<Delivery>> {
        let min_idle_ms = self.config.visibility_timeout.as_millis() as u64;
        let mut conn = self.connection.manager();

        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(stream_key)
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(1)
            .query_async(&mut conn)
            .await
            .map_err(map_broker_error)?;

        let Some(stale) = pending.ids.into_iter().next() else {
            return Ok(None);
        };

        let claimed: StreamClaimReply = redis::cmd("XCLAIM")
            .arg(stream_key)
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_name)
            .arg(min_idle_ms)
            .arg(&stale.id)
            .query_async(&mut conn)
            .await
            .map_err(map_broker_error)?;

        // 其他消费者先一步接管
        let Some(entry) = claimed.ids.into_iter().next() else {
            return Ok(None);
        };

        warn!(
            queue = queue,
            entry_id = %entry.id,
            previous_consumer = %stale.consumer,
            "消息可见性超时，重新投递"
        );
        self.metrics.record_redelivered(1);
        let delivery_count = (stale.times_delivered as u32).saturating_add(1);
        self.decode_entry(queue, stream_key, entry, delivery_count).await
    }

    /// 读取新消息，`block` 为零时不阻塞
    async fn read_new(
        &self,
        queue: &str,
        stream_key: &str,
        block: Duration,
    ) -> SchedulerResult<Option<Delivery>> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_name)
            .arg("COUNT")
            .arg(1);
        // BLOCK 0 表示无限等待
        let block_ms = block.as_millis() as u64;
        if block_ms > 0 {
            cmd.arg("BLOCK").arg(block_ms);
        }
        cmd.arg("STREAMS").arg(stream_key).arg(">");

        let mut conn = self.reader.manager();
        let reply: Option<StreamReadReply> = cmd
            .query_async(&mut conn)
            .await
            .map_err(map_broker_error)?;

        let entry = reply
            .into_iter()
            .flat_map(|reply| reply.keys)
            .flat_map(|key| key.ids)
            .next();

        match entry {
            Some(entry) => self.decode_entry(queue, stream_key, entry, 1).await,
            None => Ok(None),
        }
    }

    /// 原子地校验归属并结算一次投递
    async fn settle(&self, delivery: &Delivery, settlement: Settlement) -> SchedulerResult<()> {
        let stream_key = self.config.stream_key(&delivery.queue);
        let (mode, target, payload, score) = match settlement {
            Settlement::Ack => ("ack", stream_key.clone(), String::new(), 0),
            Settlement::Requeue(payload) => ("stream", stream_key.clone(), payload, 0),
            Settlement::Delay(payload, score) => {
                ("delayed", self.config.delayed_key(&delivery.queue), payload, score)
            }
            Settlement::DeadLetter(payload) => {
                ("stream", self.config.dead_letter_key(&delivery.queue), payload, 0)
            }
        };

        let mut conn = self.connection.manager();
        let settled: i64 = self
            .settle_script
            .key(&stream_key)
            .key(target)
            .arg(&self.config.consumer_group)
            .arg(&delivery.receipt)
            .arg(&self.config.consumer_name)
            .arg(delivery.delivery_count)
            .arg(mode)
            .arg(PAYLOAD_FIELD)
            .arg(payload)
            .arg(score)
            .invoke_async(&mut conn)
            .await
            .map_err(map_broker_error)?;

        match settled {
            1 => Ok(()),
            0 => Err(SchedulerError::Delivery(format!(
                "未知的投递凭据 {} (job_id={})",
                delivery.receipt, delivery.envelope.job_id
            ))),
            _ => {
                warn!(
                    job_id = %delivery.envelope.job_id,
                    receipt = %delivery.receipt,
                    delivery_count = delivery.delivery_count,
                    "投递已被其他消费者接管，放弃结算"
                );
                Err(SchedulerError::Delivery(format!(
                    "投递 {} 已被重新分配 (job_id={})",
                    delivery.receipt, delivery.envelope.job_id
                )))
            }
        }
    }

    /// 解析 Stream 条目；无法解析的条目转入死信，返回 `None`
    async fn decode_entry(
        &self,
        queue: &str,
        stream_key: &str,
        entry: StreamId,
        delivery_count: u32,
    ) -> SchedulerResult<Option<Delivery>> {
        let payload = entry.get::<String>(PAYLOAD_FIELD).unwrap_or_default();
        match TaskEnvelope::deserialize(&payload) {
            Ok(envelope) => Ok(Some(Delivery::new(
                envelope,
                queue,
                entry.id,
                delivery_count,
            ))),
            Err(e) => {
                error!(queue = queue, entry_id = %entry.id, "无法解析的消息，转入死信: {}", e);
                let mut conn = self.connection.manager();
                let _: () = redis::pipe()
                    .atomic()
                    .cmd("XADD")
                    .arg(self.config.dead_letter_key(queue))
                    .arg("*")
                    .arg("raw")
                    .arg(&payload)
                    .ignore()
                    .cmd("XACK")
                    .arg(stream_key)
                    .arg(&self.config.consumer_group)
                    .arg(&entry.id)
                    .ignore()
                    .cmd("XDEL")
                    .arg(stream_key)
                    .arg(&entry.id)
                    .ignore()
                    .query_async(&mut conn)
                    .await
                    .map_err(map_broker_error)?;
                self.metrics.record_dead_lettered();
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn enqueue(&self, queue: &str, envelope: &TaskEnvelope) -> SchedulerResult<()> {
        if queue.is_empty() {
            return Err(SchedulerError::Delivery("队列名称不能为空".to_string()));
        }

        let start = Instant::now();
        let payload = envelope.serialize()?;
        let mut conn = self.connection.manager();

        match envelope.eta.filter(|eta| *eta > Utc::now()) {
            Some(eta) => {
                let _: i64 = redis::cmd("ZADD")
                    .arg(self.config.delayed_key(queue))
                    .arg(eta.timestamp_millis())
                    .arg(&payload)
                    .query_async(&mut conn)
                    .await
                    .map_err(map_broker_error)?;
            }
            None => {
                let _: String = redis::cmd("XADD")
                    .arg(self.config.stream_key(queue))
                    .arg("*")
                    .arg(PAYLOAD_FIELD)
                    .arg(&payload)
                    .query_async(&mut conn)
                    .await
                    .map_err(map_broker_error)?;
            }
        }

        self.metrics.record_published(queue);
        self.metrics
            .record_operation_duration("enqueue", start.elapsed().as_secs_f64() * 1000.0);
        debug!(job_id = %envelope.job_id, queue = queue, "消息已写入Redis Stream");
        Ok(())
    }

    async fn dequeue(&self, queue: &str, timeout: Duration) -> SchedulerResult<Option<Delivery>> {
        let stream_key = self.config.stream_key(queue);
        self.ensure_group(&stream_key).await?;
        let deadline = Instant::now() + timeout;

        loop {
            self.promote_due(queue).await?;

            let delivery = match self.claim_stale(queue, &stream_key).await? {
                Some(delivery) => Some(delivery),
                None => {
                    // 阻塞时长不超过轮询间隔，以便按时提升延迟消息和接管超时消息
                    let block = deadline
                        .saturating_duration_since(Instant::now())
                        .min(self.config.poll_interval);
                    self.read_new(queue, &stream_key, block).await?
                }
            };
            if let Some(delivery) = delivery {
                self.metrics.record_delivered(queue);
                return Ok(Some(delivery));
            }

            if Instant::now() >= deadline {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> SchedulerResult<()> {
        self.settle(delivery, Settlement::Ack).await?;
        self.metrics.record_acked();
        debug!(job_id = %delivery.envelope.job_id, "消息已确认");
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> SchedulerResult<()> {
        if requeue {
            let next = delivery.envelope.next_attempt();
            let payload = next.serialize()?;
            let settlement = match next.eta.filter(|eta| *eta > Utc::now()) {
                Some(eta) => Settlement::Delay(payload, eta.timestamp_millis()),
                None => Settlement::Requeue(payload),
            };
            self.settle(delivery, settlement).await?;
            self.metrics.record_requeued();
            debug!(job_id = %delivery.envelope.job_id, "消息已重新入队");
        } else {
            let payload = delivery.envelope.serialize()?;
            self.settle(delivery, Settlement::DeadLetter(payload)).await?;
            self.metrics.record_dead_lettered();
            warn!(job_id = %delivery.envelope.job_id, queue = %delivery.queue, "消息已进入死信队列");
        }
        Ok(())
    }

    async fn queue_size(&self, queue: &str) -> SchedulerResult<u64> {
        let stream_key = self.config.stream_key(queue);
        self.ensure_group(&stream_key).await?;
        let mut conn = self.connection.manager();

        let length: u64 = redis::cmd("XLEN")
            .arg(&stream_key)
            .query_async(&mut conn)
            .await
            .map_err(map_broker_error)?;
        let pending: StreamPendingReply = redis::cmd("XPENDING")
            .arg(&stream_key)
            .arg(&self.config.consumer_group)
            .query_async(&mut conn)
            .await
            .map_err(map_broker_error)?;
        let delayed: u64 = redis::cmd("ZCARD")
            .arg(self.config.delayed_key(queue))
            .query_async(&mut conn)
            .await
            .map_err(map_broker_error)?;

        let size = length.saturating_sub(pending.count() as u64) + delayed;
        self.metrics.set_queue_depth(queue, size);
        Ok(size)
    }
}
