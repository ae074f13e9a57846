//! 周期任务调度（beat）：按固定间隔或 crontab 规则把任务提交到消息代理

pub mod clock;
pub mod cron_utils;
pub mod schedule;
pub mod scheduler;

pub use clock::{Clock, ManualClock, SystemClock};
pub use cron_utils::CronScheduler;
pub use schedule::ScheduleEntry;
pub use scheduler::{Beat, BeatHandle, FiredJob};
