use jobcast_core::config::{BrokerConfig, ResultBackendConfig};
use std::time::Duration;

/// Redis Stream 代理配置
///
/// 每个队列对应一个 Stream 和一个延迟投递用的有序集合：
/// `{prefix}:queue:{name}`、`{prefix}:delayed:{name}`，死信写入 `{prefix}:dead:{name}`。
#[derive(Debug, Clone)]
pub struct RedisBrokerConfig {
    pub url: String,
    pub key_prefix: String,
    pub consumer_group: String,
    pub consumer_name: String,
    pub visibility_timeout: Duration,
    pub poll_interval: Duration,
    pub connection_timeout: Duration,
}

impl Default for RedisBrokerConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/0".to_string(),
            key_prefix: "jobcast".to_string(),
            consumer_group: "jobcast-workers".to_string(),
            consumer_name: "default_consumer".to_string(),
            visibility_timeout: Duration::from_secs(3600),
            poll_interval: Duration::from_millis(100),
            connection_timeout: Duration::from_secs(10),
        }
    }
}

impl RedisBrokerConfig {
    pub fn from_broker_config(config: &BrokerConfig, consumer_name: impl Into<String>) -> Self {
        Self {
            url: config.url.clone(),
            key_prefix: config.key_prefix.clone(),
            consumer_group: format!("{}-workers", config.key_prefix),
            consumer_name: consumer_name.into(),
            visibility_timeout: Duration::from_secs(config.visibility_timeout_seconds),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            connection_timeout: Duration::from_secs(config.connection_timeout_seconds),
        }
    }

    pub fn stream_key(&self, queue: &str) -> String {
        format!("{}:queue:{}", self.key_prefix, queue)
    }

    pub fn delayed_key(&self, queue: &str) -> String {
        format!("{}:delayed:{}", self.key_prefix, queue)
    }

    pub fn dead_letter_key(&self, queue: &str) -> String {
        format!("{}:dead:{}", self.key_prefix, queue)
    }
}

/// Redis 结果后端配置
#[derive(Debug, Clone)]
pub struct RedisResultStoreConfig {
    pub url: String,
    pub key_prefix: String,
    /// `None` 表示永不过期
    pub result_expires: Option<Duration>,
    pub connection_timeout: Duration,
}

impl RedisResultStoreConfig {
    pub fn from_result_backend_config(config: &ResultBackendConfig) -> Self {
        Self {
            url: config.url.clone(),
            key_prefix: config.key_prefix.clone(),
            result_expires: (config.result_expires_seconds > 0)
                .then(|| Duration::from_secs(config.result_expires_seconds)),
            connection_timeout: Duration::from_secs(10),
        }
    }

    pub fn result_key(&self, job_id: &uuid::Uuid) -> String {
        format!("{}:result:{}", self.key_prefix, job_id)
    }
}
