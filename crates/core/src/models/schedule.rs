use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::{TaskArgs, TaskKwargs};

/// 周期触发器
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// 固定间隔（秒）
    Interval(f64),
    Crontab(CrontabSpec),
}

impl Trigger {
    pub fn every_seconds(seconds: f64) -> Self {
        Trigger::Interval(seconds)
    }

    pub fn crontab(spec: CrontabSpec) -> Self {
        Trigger::Crontab(spec)
    }
}

/// crontab 字段，缺省为 `*`
///
/// `day_of_week` 采用 0-6 编号（0 为周日，7 也表示周日），也接受 `mon`、`sun` 等英文缩写。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrontabSpec {
    #[serde(deserialize_with = "string_or_number")]
    pub minute: String,
    #[serde(deserialize_with = "string_or_number")]
    pub hour: String,
    #[serde(deserialize_with = "string_or_number")]
    pub day_of_week: String,
    #[serde(deserialize_with = "string_or_number")]
    pub day_of_month: String,
    #[serde(deserialize_with = "string_or_number")]
    pub month_of_year: String,
}

impl Default for CrontabSpec {
    fn default() -> Self {
        Self {
            minute: "*".to_string(),
            hour: "*".to_string(),
            day_of_week: "*".to_string(),
            day_of_month: "*".to_string(),
            month_of_year: "*".to_string(),
        }
    }
}

impl CrontabSpec {
    pub fn minute(mut self, minute: impl ToString) -> Self {
        self.minute = minute.to_string();
        self
    }

    pub fn hour(mut self, hour: impl ToString) -> Self {
        self.hour = hour.to_string();
        self
    }

    pub fn day_of_week(mut self, day_of_week: impl ToString) -> Self {
        self.day_of_week = day_of_week.to_string();
        self
    }

    pub fn day_of_month(mut self, day_of_month: impl ToString) -> Self {
        self.day_of_month = day_of_month.to_string();
        self
    }

    pub fn month_of_year(mut self, month_of_year: impl ToString) -> Self {
        self.month_of_year = month_of_year.to_string();
        self
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

/// 周期任务配置条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntryConfig {
    pub name: String,
    pub task: String,
    #[serde(default)]
    pub args: TaskArgs,
    #[serde(default)]
    pub kwargs: TaskKwargs,
    /// 为空时使用任务的默认队列
    #[serde(default)]
    pub queue: Option<String>,
    pub trigger: Trigger,
}
