use serde::{Deserialize, Serialize};

use crate::registry::DEFAULT_QUEUE;

/// 消息代理配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// `memory://` 或 `redis://host:port/db`
    pub url: String,
    pub default_queue: String,
    pub key_prefix: String,
    /// 已投递未确认的消息超过该时间后重新投递
    pub visibility_timeout_seconds: u64,
    /// 阻塞出队时的轮询间隔
    pub poll_interval_ms: u64,
    pub connection_timeout_seconds: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "memory://".to_string(),
            default_queue: DEFAULT_QUEUE.to_string(),
            key_prefix: "jobcast".to_string(),
            visibility_timeout_seconds: 3600,
            poll_interval_ms: 100,
            connection_timeout_seconds: 10,
        }
    }
}

impl BrokerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        validate_backend_url(&self.url)?;

        if self.default_queue.trim().is_empty() {
            return Err(anyhow::anyhow!("默认队列名称不能为空"));
        }

        if self.key_prefix.trim().is_empty() {
            return Err(anyhow::anyhow!("键前缀不能为空"));
        }

        if self.visibility_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("可见性超时必须大于0"));
        }

        if self.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("轮询间隔必须大于0"));
        }

        if self.connection_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("连接超时时间必须大于0"));
        }

        Ok(())
    }

    pub fn is_redis(&self) -> bool {
        is_redis_url(&self.url)
    }
}

/// 结果后端配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultBackendConfig {
    pub url: String,
    pub key_prefix: String,
    /// 结果保留时间，0 表示永不过期
    pub result_expires_seconds: u64,
}

impl Default for ResultBackendConfig {
    fn default() -> Self {
        Self {
            url: "memory://".to_string(),
            key_prefix: "jobcast".to_string(),
            result_expires_seconds: 86400,
        }
    }
}

impl ResultBackendConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        validate_backend_url(&self.url)?;

        if self.key_prefix.trim().is_empty() {
            return Err(anyhow::anyhow!("键前缀不能为空"));
        }

        Ok(())
    }

    pub fn is_redis(&self) -> bool {
        is_redis_url(&self.url)
    }
}

fn is_redis_url(url: &str) -> bool {
    url.starts_with("redis://") || url.starts_with("rediss://")
}

fn validate_backend_url(url: &str) -> anyhow::Result<()> {
    if url.is_empty() {
        return Err(anyhow::anyhow!("后端URL不能为空"));
    }

    if !(url.starts_with("memory://") || is_redis_url(url)) {
        return Err(anyhow::anyhow!(
            "不支持的后端URL: {url}，仅支持 memory:// 或 redis://"
        ));
    }

    Ok(())
}
