use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::traits::TaskHandler;

/// 退避策略
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// 基础重试间隔（秒）
    pub base_delay_seconds: f64,
    /// 最大重试间隔（秒）
    pub max_delay_seconds: f64,
    /// 指数退避倍数
    pub multiplier: f64,
    /// 重试间隔的随机抖动范围（0.0-1.0）
    pub jitter_factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_seconds: 1.0,
            max_delay_seconds: 600.0,
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl BackoffPolicy {
    /// 重试等待时间上限，约 100 年
    pub const MAX_DELAY: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

    /// 不等待立即重新投递
    pub fn immediate() -> Self {
        Self {
            base_delay_seconds: 0.0,
            max_delay_seconds: 0.0,
            multiplier: 1.0,
            jitter_factor: 0.0,
        }
    }

    /// 第 `attempt` 次执行失败后的等待时间
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let exponential = self.base_delay_seconds * self.multiplier.powi(exponent);
        let capped = exponential.min(self.max_delay_seconds);

        // 添加随机抖动以避免雷群效应
        let jitter = capped * self.jitter_factor * (rand::random::<f64>() - 0.5) * 2.0;
        let seconds = (capped + jitter).max(0.0);

        // 超出范围时饱和到上限
        Duration::try_from_secs_f64(seconds)
            .unwrap_or(Self::MAX_DELAY)
            .min(Self::MAX_DELAY)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let values = [
            self.base_delay_seconds,
            self.max_delay_seconds,
            self.multiplier,
            self.jitter_factor,
        ];
        if values.iter().any(|value| !value.is_finite()) {
            return Err(anyhow::anyhow!("退避参数必须是有限数值"));
        }
        if self.base_delay_seconds < 0.0 || self.max_delay_seconds < 0.0 {
            return Err(anyhow::anyhow!("重试间隔不能为负数"));
        }
        if self.max_delay_seconds < self.base_delay_seconds {
            return Err(anyhow::anyhow!("最大重试间隔不能小于基础重试间隔"));
        }
        if self.multiplier < 1.0 {
            return Err(anyhow::anyhow!("退避倍数必须大于等于1"));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(anyhow::anyhow!("抖动系数必须在0.0到1.0之间"));
        }
        Ok(())
    }
}

/// 重试策略
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// 最大执行次数（包含首次执行）
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: BackoffPolicy) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// 只执行一次，失败即进入死信
    pub fn no_retry() -> Self {
        Self::new(1, BackoffPolicy::immediate())
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_attempts == 0 {
            return Err(anyhow::anyhow!("最大执行次数必须大于0"));
        }
        self.backoff.validate()
    }
}

/// 任务定义，启动时注册后不再修改
#[derive(Clone)]
pub struct TaskDefinition {
    pub name: String,
    pub handler: Arc<dyn TaskHandler>,
    pub default_queue: String,
    pub retry_policy: RetryPolicy,
}

impl TaskDefinition {
    pub fn new(
        name: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
        retry_policy: RetryPolicy,
        default_queue: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            handler,
            default_queue: default_queue.into(),
            retry_policy,
        }
    }
}

impl fmt::Debug for TaskDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDefinition")
            .field("name", &self.name)
            .field("default_queue", &self.default_queue)
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}
