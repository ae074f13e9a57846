use jobcast_core::{SchedulerError, SchedulerResult};
use redis::aio::ConnectionManager;
use redis::{Client, RedisError};
use std::time::Duration;
use tracing::{debug, error};

/// 异步 Redis 连接
///
/// `ConnectionManager` 断线后自动重连，克隆开销很小，每次命令克隆一份使用。
#[derive(Clone)]
pub struct RedisConnection {
    manager: ConnectionManager,
    url: String,
}

impl RedisConnection {
    pub async fn connect(url: &str, timeout: Duration) -> SchedulerResult<Self> {
        let client = Client::open(url).map_err(|e| {
            SchedulerError::Configuration(format!("Failed to create Redis client: {e}"))
        })?;

        let manager = tokio::time::timeout(timeout, client.get_connection_manager())
            .await
            .map_err(|_| {
                SchedulerError::BrokerUnavailable(format!(
                    "Connecting to Redis at {} timed out after {:?}",
                    redacted(url),
                    timeout
                ))
            })?
            .map_err(|e| {
                error!("Failed to connect to Redis at {}: {}", redacted(url), e);
                SchedulerError::BrokerUnavailable(format!("Failed to connect to Redis: {e}"))
            })?;

        let connection = Self {
            manager,
            url: url.to_string(),
        };
        connection.ping().await?;
        debug!("Successfully connected to Redis at {}", redacted(url));
        Ok(connection)
    }

    pub fn manager(&self) -> ConnectionManager {
        self.manager.clone()
    }

    pub async fn ping(&self) -> SchedulerResult<()> {
        let mut conn = self.manager();
        let response: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(map_broker_error)?;
        if response != "PONG" {
            return Err(SchedulerError::BrokerUnavailable(format!(
                "Unexpected PING response: {response}"
            )));
        }
        Ok(())
    }

    pub fn url(&self) -> String {
        redacted(&self.url)
    }
}

impl std::fmt::Debug for RedisConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisConnection")
            .field("url", &self.url())
            .finish()
    }
}

fn is_unavailable(e: &RedisError) -> bool {
    e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout()
}

/// 连接类错误视为代理不可用，其余为投递错误
pub fn map_broker_error(e: RedisError) -> SchedulerError {
    if is_unavailable(&e) {
        SchedulerError::BrokerUnavailable(format!("Redis unavailable: {e}"))
    } else {
        SchedulerError::Delivery(format!("Redis command failed: {e}"))
    }
}

pub fn map_store_error(e: RedisError) -> SchedulerError {
    SchedulerError::ResultStore(format!("Redis command failed: {e}"))
}

/// 隐藏 URL 中的密码
fn redacted(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}
