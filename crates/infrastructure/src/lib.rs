//! 消息代理、结果存储与可观测性的具体实现

pub mod broker_metrics;
pub mod factory;
pub mod in_memory_broker;
pub mod in_memory_result_store;
pub mod observability;
pub mod redis_backend;

pub use broker_metrics::{BrokerMetrics, BrokerMetricsSnapshot};
pub use factory::{BackendKind, BrokerFactory, ResultStoreFactory};
pub use in_memory_broker::{InMemoryBroker, InMemoryBrokerConfig};
pub use in_memory_result_store::InMemoryResultStore;
pub use redis_backend::{RedisBroker, RedisBrokerConfig, RedisResultStore, RedisResultStoreConfig};
