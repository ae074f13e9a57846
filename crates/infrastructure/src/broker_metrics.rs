use metrics::{counter, gauge, histogram};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// 消息代理性能指标
///
/// 计数器同时写入本地原子变量和全局 `metrics` 记录器，
/// 未安装导出器时后者为空操作。
#[derive(Debug, Clone)]
pub struct BrokerMetrics {
    backend: &'static str,
    pub messages_published: Arc<AtomicU64>,
    pub messages_delivered: Arc<AtomicU64>,
    pub messages_acked: Arc<AtomicU64>,
    pub messages_requeued: Arc<AtomicU64>,
    pub messages_dead_lettered: Arc<AtomicU64>,
    pub messages_redelivered: Arc<AtomicU64>,
    pub connection_errors: Arc<AtomicU64>,
}

impl BrokerMetrics {
    pub fn new(backend: &'static str) -> Self {
        Self {
            backend,
            messages_published: Arc::new(AtomicU64::new(0)),
            messages_delivered: Arc::new(AtomicU64::new(0)),
            messages_acked: Arc::new(AtomicU64::new(0)),
            messages_requeued: Arc::new(AtomicU64::new(0)),
            messages_dead_lettered: Arc::new(AtomicU64::new(0)),
            messages_redelivered: Arc::new(AtomicU64::new(0)),
            connection_errors: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn backend(&self) -> &'static str {
        self.backend
    }

    pub fn record_published(&self, queue: &str) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
        counter!("jobcast_broker_messages_published_total", "backend" => self.backend, "queue" => queue.to_string())
            .increment(1);
    }

    pub fn record_delivered(&self, queue: &str) {
        self.messages_delivered.fetch_add(1, Ordering::Relaxed);
        counter!("jobcast_broker_messages_delivered_total", "backend" => self.backend, "queue" => queue.to_string())
            .increment(1);
    }

    pub fn record_acked(&self) {
        self.messages_acked.fetch_add(1, Ordering::Relaxed);
        counter!("jobcast_broker_messages_acked_total", "backend" => self.backend).increment(1);
    }

    pub fn record_requeued(&self) {
        self.messages_requeued.fetch_add(1, Ordering::Relaxed);
        counter!("jobcast_broker_messages_requeued_total", "backend" => self.backend).increment(1);
    }

    pub fn record_dead_lettered(&self) {
        self.messages_dead_lettered.fetch_add(1, Ordering::Relaxed);
        counter!("jobcast_broker_messages_dead_lettered_total", "backend" => self.backend)
            .increment(1);
    }

    /// 可见性超时后被重新投递
    pub fn record_redelivered(&self, count: u64) {
        self.messages_redelivered.fetch_add(count, Ordering::Relaxed);
        counter!("jobcast_broker_messages_redelivered_total", "backend" => self.backend)
            .increment(count);
    }

    pub fn record_connection_error(&self) {
        self.connection_errors.fetch_add(1, Ordering::Relaxed);
        counter!("jobcast_broker_connection_errors_total", "backend" => self.backend).increment(1);
    }

    pub fn set_queue_depth(&self, queue: &str, depth: u64) {
        gauge!("jobcast_broker_queue_depth", "backend" => self.backend, "queue" => queue.to_string())
            .set(depth as f64);
    }

    /// 记录操作耗时
    pub fn record_operation_duration(&self, operation: &'static str, duration_ms: f64) {
        histogram!("jobcast_broker_operation_duration_ms", "backend" => self.backend, "operation" => operation)
            .record(duration_ms);
    }

    /// 获取当前统计信息
    pub fn get_stats(&self) -> BrokerMetricsSnapshot {
        BrokerMetricsSnapshot {
            messages_published: self.messages_published.load(Ordering::Relaxed),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            messages_acked: self.messages_acked.load(Ordering::Relaxed),
            messages_requeued: self.messages_requeued.load(Ordering::Relaxed),
            messages_dead_lettered: self.messages_dead_lettered.load(Ordering::Relaxed),
            messages_redelivered: self.messages_redelivered.load(Ordering::Relaxed),
            connection_errors: self.connection_errors.load(Ordering::Relaxed),
        }
    }
}

/// 指标快照
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerMetricsSnapshot {
    pub messages_published: u64,
    pub messages_delivered: u64,
    pub messages_acked: u64,
    pub messages_requeued: u64,
    pub messages_dead_lettered: u64,
    pub messages_redelivered: u64,
    pub connection_errors: u64,
}
