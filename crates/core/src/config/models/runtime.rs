use serde::{Deserialize, Serialize};

use crate::models::{ScheduleEntryConfig, Trigger};

/// 工作进程配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub enabled: bool,
    /// 为空时使用 `主机名-进程号`
    pub worker_id: String,
    /// 并发执行的工作协程数量
    pub concurrency: usize,
    /// 监听的队列，为空时监听所有已注册任务的默认队列
    pub queues: Vec<String>,
    /// 单次出队的最长等待时间
    pub dequeue_timeout_ms: u64,
    /// 关闭时等待执行中任务的最长时间
    pub shutdown_timeout_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            worker_id: String::new(),
            concurrency: 4,
            queues: Vec::new(),
            dequeue_timeout_ms: 1000,
            shutdown_timeout_seconds: 30,
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.concurrency == 0 {
            return Err(anyhow::anyhow!("工作协程数量必须大于0"));
        }

        if self.dequeue_timeout_ms == 0 {
            return Err(anyhow::anyhow!("出队等待时间必须大于0"));
        }

        if self.queues.iter().any(|queue| queue.trim().is_empty()) {
            return Err(anyhow::anyhow!("队列名称不能为空"));
        }

        Ok(())
    }
}

/// 周期调度器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeatConfig {
    pub enabled: bool,
    /// 两次检查之间的最长休眠时间
    pub max_poll_interval_seconds: u64,
    /// 是否加载内置的示例调度条目
    pub include_default_schedule: bool,
    pub schedule: Vec<ScheduleEntryConfig>,
}

impl Default for BeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_poll_interval_seconds: 5,
            include_default_schedule: true,
            schedule: Vec::new(),
        }
    }
}

impl BeatConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_poll_interval_seconds == 0 {
            return Err(anyhow::anyhow!("调度器轮询间隔必须大于0"));
        }

        let mut names = std::collections::HashSet::new();
        for entry in &self.schedule {
            if entry.name.trim().is_empty() {
                return Err(anyhow::anyhow!("调度条目名称不能为空"));
            }
            if entry.task.trim().is_empty() {
                return Err(anyhow::anyhow!("调度条目 {} 的任务名称不能为空", entry.name));
            }
            if !names.insert(entry.name.as_str()) {
                return Err(anyhow::anyhow!("调度条目名称重复: {}", entry.name));
            }
            if let Trigger::Interval(seconds) = entry.trigger {
                if !seconds.is_finite() || seconds <= 0.0 {
                    return Err(anyhow::anyhow!(
                        "调度条目 {} 的间隔必须大于0，当前值: {seconds}",
                        entry.name
                    ));
                }
            }
        }

        Ok(())
    }
}
