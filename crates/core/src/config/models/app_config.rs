use anyhow::{Context, Result};
use chrono::FixedOffset;
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use super::{
    broker::{BrokerConfig, ResultBackendConfig},
    observability::ObservabilityConfig,
    runtime::{BeatConfig, WorkerConfig},
};
use crate::config::timezone::parse_timezone;
use crate::models::RetryPolicy;

/// 环境变量前缀
pub const ENV_PREFIX: &str = "JOBCAST";

const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "config/jobcast.toml",
    "jobcast.toml",
    "/etc/jobcast/config.toml",
];

/// System configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 调度器计算 crontab 时使用的时区
    pub timezone: String,
    pub broker: BrokerConfig,
    pub result_backend: ResultBackendConfig,
    /// 未单独指定重试策略的任务使用的默认策略
    pub retry: RetryPolicy,
    pub worker: WorkerConfig,
    pub beat: BeatConfig,
    pub observability: ObservabilityConfig,
    /// 任务名 → 队列名，覆盖任务注册时的默认队列
    pub task_queues: HashMap<String, String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
            broker: BrokerConfig::default(),
            result_backend: ResultBackendConfig::default(),
            retry: RetryPolicy::default(),
            worker: WorkerConfig::default(),
            beat: BeatConfig::default(),
            observability: ObservabilityConfig::default(),
            task_queues: HashMap::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default configuration
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides, e.g. `JOBCAST__BROKER__URL`
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else if let Some(path) = DEFAULT_CONFIG_PATHS
            .iter()
            .find(|path| Path::new(path).exists())
        {
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn validate(&self) -> Result<()> {
        parse_timezone(&self.timezone).context("时区配置验证失败")?;

        self.broker.validate().context("消息代理配置验证失败")?;

        self.result_backend
            .validate()
            .context("结果后端配置验证失败")?;

        self.retry.validate().context("重试策略配置验证失败")?;

        self.worker.validate().context("工作进程配置验证失败")?;

        self.beat.validate().context("调度器配置验证失败")?;

        self.observability
            .validate()
            .context("可观测性配置验证失败")?;

        if let Some((task, _)) = self
            .task_queues
            .iter()
            .find(|(_, queue)| queue.trim().is_empty())
        {
            return Err(anyhow::anyhow!("任务 {task} 的队列名称不能为空"));
        }

        Ok(())
    }

    /// 解析后的时区偏移
    pub fn timezone_offset(&self) -> Result<FixedOffset> {
        parse_timezone(&self.timezone).map_err(|e| anyhow::anyhow!(e))
    }

    /// 实际使用的 worker 标识
    pub fn worker_id(&self) -> String {
        if !self.worker.worker_id.trim().is_empty() {
            return self.worker.worker_id.clone();
        }
        let host = hostname_or_default();
        format!("{host}-{}", std::process::id())
    }
}

fn hostname_or_default() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}
