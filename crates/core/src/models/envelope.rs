use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// 任务位置参数
pub type TaskArgs = Vec<Value>;

/// 任务关键字参数
pub type TaskKwargs = Map<String, Value>;

/// 任务信封：生产者与执行器之间经由消息代理传递的消息单元
///
/// 投递语义为至少一次，同一个 `job_id` 可能被重复投递，
/// 任务处理函数需要自行保证幂等。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub job_id: Uuid,
    pub task_name: String,
    #[serde(default)]
    pub args: TaskArgs,
    #[serde(default)]
    pub kwargs: TaskKwargs,
    pub enqueued_at: DateTime<Utc>,
    /// 第几次执行尝试，从1开始
    pub attempt: u32,
    /// 最早执行时间
    #[serde(default)]
    pub eta: Option<DateTime<Utc>>,
}

impl TaskEnvelope {
    pub fn new(task_name: impl Into<String>, args: TaskArgs, kwargs: TaskKwargs) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            task_name: task_name.into(),
            args,
            kwargs,
            enqueued_at: Utc::now(),
            attempt: 1,
            eta: None,
        }
    }

    pub fn with_eta(mut self, eta: DateTime<Utc>) -> Self {
        self.eta = Some(eta);
        self
    }

    pub fn with_enqueued_at(mut self, enqueued_at: DateTime<Utc>) -> Self {
        self.enqueued_at = enqueued_at;
        self
    }

    /// 是否已到可执行时间
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.eta.is_none_or(|eta| eta <= now)
    }

    /// 重新入队时使用的副本，尝试次数加一
    pub fn next_attempt(&self) -> Self {
        let mut next = self.clone();
        next.attempt = self.attempt.saturating_add(1);
        next
    }

    pub fn serialize(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn deserialize(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
