//! Redis 后端：基于 Stream 消费组的消息代理和基于字符串键的结果存储

pub mod broker;
pub mod config;
pub mod connection;
pub mod result_store;

pub use broker::RedisBroker;
pub use config::{RedisBrokerConfig, RedisResultStoreConfig};
pub use connection::RedisConnection;
pub use result_store::RedisResultStore;
