use jobcast_core::{
    config::{BrokerConfig, ResultBackendConfig},
    traits::{Broker, ResultStore},
    SchedulerError, SchedulerResult,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::{
    in_memory_broker::{InMemoryBroker, InMemoryBrokerConfig},
    in_memory_result_store::InMemoryResultStore,
    redis_backend::{RedisBroker, RedisBrokerConfig, RedisResultStore, RedisResultStoreConfig},
};

/// 按 URL 选择的后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Memory,
    Redis,
}

impl BackendKind {
    pub fn from_url(url: &str) -> SchedulerResult<Self> {
        if url.starts_with("memory://") {
            Ok(BackendKind::Memory)
        } else if url.starts_with("redis://") || url.starts_with("rediss://") {
            Ok(BackendKind::Redis)
        } else {
            Err(SchedulerError::Configuration(format!(
                "不支持的后端URL: {url}"
            )))
        }
    }
}

pub struct BrokerFactory;

impl BrokerFactory {
    /// 创建消息代理，`consumer_name` 用作 Redis 消费组中的消费者名称
    pub async fn create(config: &BrokerConfig, consumer_name: &str) -> SchedulerResult<Arc<dyn Broker>> {
        let kind = BackendKind::from_url(&config.url)?;
        debug!("Creating broker with type: {:?}", kind);

        match kind {
            BackendKind::Memory => {
                info!("Initializing in-memory broker");
                Ok(Arc::new(InMemoryBroker::with_config(InMemoryBrokerConfig {
                    visibility_timeout: Duration::from_secs(config.visibility_timeout_seconds),
                    poll_interval: Duration::from_millis(config.poll_interval_ms),
                })))
            }
            BackendKind::Redis => {
                info!("Initializing Redis Stream broker");
                let redis_config = RedisBrokerConfig::from_broker_config(config, consumer_name);
                Ok(Arc::new(RedisBroker::connect(redis_config).await?))
            }
        }
    }
}

pub struct ResultStoreFactory;

impl ResultStoreFactory {
    pub async fn create(config: &ResultBackendConfig) -> SchedulerResult<Arc<dyn ResultStore>> {
        let kind = BackendKind::from_url(&config.url)?;
        debug!("Creating result store with type: {:?}", kind);

        match kind {
            BackendKind::Memory => {
                info!("Initializing in-memory result store");
                Ok(Arc::new(InMemoryResultStore::new()))
            }
            BackendKind::Redis => {
                info!("Initializing Redis result store");
                let redis_config = RedisResultStoreConfig::from_result_backend_config(config);
                Ok(Arc::new(RedisResultStore::connect(redis_config).await?))
            }
        }
    }
}
