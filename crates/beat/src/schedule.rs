use chrono::{DateTime, Duration, FixedOffset, Utc};
use jobcast_core::{
    models::{ScheduleEntryConfig, TaskArgs, TaskKwargs, Trigger},
    SchedulerError, SchedulerResult,
};

use crate::cron_utils::CronScheduler;

#[derive(Debug, Clone)]
enum CompiledTrigger {
    Interval(Duration),
    Crontab(CronScheduler),
}

/// 运行时的调度条目：配置加上下一次触发时间
#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    pub name: String,
    pub task: String,
    pub args: TaskArgs,
    pub kwargs: TaskKwargs,
    pub queue: Option<String>,
    pub trigger: Trigger,
    compiled: CompiledTrigger,
    next_fire_at: DateTime<Utc>,
    last_run_at: Option<DateTime<Utc>>,
    total_run_count: u64,
}

impl ScheduleEntry {
    /// 编译触发器并计算首次触发时间
    ///
    /// 固定间隔条目在 `now + interval` 首次触发，crontab 条目在严格晚于 `now` 的第一个匹配时间触发。
    pub fn new(
        config: ScheduleEntryConfig,
        timezone: FixedOffset,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Self> {
        if config.name.trim().is_empty() {
            return Err(SchedulerError::InvalidSchedule("调度条目名称不能为空".to_string()));
        }
        if config.task.trim().is_empty() {
            return Err(SchedulerError::InvalidSchedule(format!(
                "调度条目 {} 的任务名称不能为空",
                config.name
            )));
        }

        let compiled = match &config.trigger {
            Trigger::Interval(seconds) => CompiledTrigger::Interval(interval_duration(*seconds).ok_or_else(|| {
                SchedulerError::InvalidSchedule(format!(
                    "调度条目 {} 的间隔必须大于0，当前值: {seconds}",
                    config.name
                ))
            })?),
            Trigger::Crontab(spec) => CompiledTrigger::Crontab(CronScheduler::from_crontab(spec, timezone)?),
        };

        let next_fire_at = match &compiled {
            CompiledTrigger::Interval(interval) => now.checked_add_signed(*interval).ok_or_else(|| {
                SchedulerError::InvalidSchedule(format!(
                    "调度条目 {} 的间隔超出可表示的时间范围",
                    config.name
                ))
            })?,
            CompiledTrigger::Crontab(cron) => cron.next_after(now).ok_or_else(|| {
                SchedulerError::InvalidSchedule(format!("调度条目 {} 没有后续触发时间", config.name))
            })?,
        };

        Ok(Self {
            name: config.name,
            task: config.task,
            args: config.args,
            kwargs: config.kwargs,
            queue: config.queue,
            trigger: config.trigger,
            compiled,
            next_fire_at,
            last_run_at: None,
            total_run_count: 0,
        })
    }

    pub fn next_fire_at(&self) -> DateTime<Utc> {
        self.next_fire_at
    }

    pub fn last_run_at(&self) -> Option<DateTime<Utc>> {
        self.last_run_at
    }

    pub fn total_run_count(&self) -> u64 {
        self.total_run_count
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_fire_at <= now
    }

    /// 记录一次触发并计算下一次触发时间
    ///
    /// 错过的多个触发点只补发一次：固定间隔按原节奏跳到第一个晚于 `now` 的时间点，
    /// crontab 取严格晚于 `now` 的下一个匹配。
    pub fn advance(&mut self, now: DateTime<Utc>) {
        self.last_run_at = Some(now);
        self.total_run_count += 1;

        match &self.compiled {
            CompiledTrigger::Interval(interval) => {
                // 溢出时同样推到极远的将来
                self.next_fire_at = next_interval_fire(self.next_fire_at, *interval, now)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
            }
            CompiledTrigger::Crontab(cron) => {
                // 没有后续匹配时推到极远的将来，不再触发
                self.next_fire_at = cron
                    .next_after(now)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
            }
        }
    }
}

fn next_interval_fire(
    previous: DateTime<Utc>,
    interval: Duration,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let next = previous.checked_add_signed(interval)?;
    if next > now {
        return Some(next);
    }
    let behind = (now - next).num_milliseconds();
    let step = interval.num_milliseconds().max(1);
    let skip = (behind / step + 1).checked_mul(step)?;
    next.checked_add_signed(Duration::try_milliseconds(skip)?)
}

fn interval_duration(seconds: f64) -> Option<Duration> {
    if !seconds.is_finite() || seconds <= 0.0 {
        return None;
    }
    let millis = (seconds * 1000.0).round();
    if millis >= i64::MAX as f64 {
        return None;
    }
    let millis = millis as i64;
    if millis <= 0 {
        return None;
    }
    Duration::try_milliseconds(millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use jobcast_core::models::CrontabSpec;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn interval_entry(seconds: f64) -> ScheduleEntryConfig {
        ScheduleEntryConfig {
            name: "every".to_string(),
            task: "dummy_task".to_string(),
            args: vec![],
            kwargs: Default::default(),
            queue: None,
            trigger: Trigger::Interval(seconds),
        }
    }

    #[test]
    fn test_interval_advances_from_previous_fire_time() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut entry = ScheduleEntry::new(interval_entry(10.0), utc(), start).unwrap();
        assert_eq!(entry.next_fire_at(), start + Duration::seconds(10));

        // 触发晚了 3 秒，下一次仍然按原节奏
        let late = start + Duration::seconds(13);
        assert!(entry.is_due(late));
        let previous = entry.next_fire_at();
        entry.advance(late);
        assert_eq!(entry.next_fire_at(), previous + Duration::seconds(10));
        assert_eq!(entry.last_run_at(), Some(late));
        assert_eq!(entry.total_run_count(), 1);
    }

    #[test]
    fn test_interval_skips_missed_ticks() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut entry = ScheduleEntry::new(interval_entry(10.0), utc(), start).unwrap();

        let much_later = start + Duration::seconds(55);
        entry.advance(much_later);
        assert_eq!(entry.next_fire_at(), start + Duration::seconds(60));
        assert!(!entry.is_due(much_later));
    }

    #[test]
    fn test_fractional_interval() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let entry = ScheduleEntry::new(interval_entry(0.25), utc(), start).unwrap();
        assert_eq!(entry.next_fire_at(), start + Duration::milliseconds(250));
    }

    #[test]
    fn test_invalid_entries() {
        let now = Utc::now();
        for seconds in [0.0, -1.0, f64::NAN, 0.0001] {
            let err = ScheduleEntry::new(interval_entry(seconds), utc(), now).unwrap_err();
            assert_eq!(err.kind(), "InvalidScheduleError");
        }

        let mut config = interval_entry(1.0);
        config.task.clear();
        assert!(ScheduleEntry::new(config, utc(), now).is_err());

        let mut config = interval_entry(1.0);
        config.trigger = Trigger::Crontab(CrontabSpec::default().hour(25));
        let err = ScheduleEntry::new(config, utc(), now).unwrap_err();
        assert_eq!(err.kind(), "InvalidCronError");
    }

    #[test]
    fn test_interval_beyond_time_range_is_rejected() {
        let now = Utc::now();
        for seconds in [1e13, 1e300] {
            let err = ScheduleEntry::new(interval_entry(seconds), utc(), now).unwrap_err();
            assert_eq!(err.kind(), "InvalidScheduleError");
        }
    }

    #[test]
    fn test_advance_saturates_near_end_of_time() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        // 约 3 万年
        let mut entry = ScheduleEntry::new(interval_entry(1e12), utc(), start).unwrap();

        for _ in 0..10 {
            let fire_at = entry.next_fire_at();
            entry.advance(fire_at);
        }
        assert_eq!(entry.next_fire_at(), DateTime::<Utc>::MAX_UTC);
        assert!(!entry.is_due(start));

        // 已在时间尽头的条目继续推进也不会溢出
        entry.advance(DateTime::<Utc>::MAX_UTC);
        assert_eq!(entry.next_fire_at(), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_crontab_first_fire_strictly_after_now() {
        let mut config = interval_entry(1.0);
        config.trigger = Trigger::Crontab(CrontabSpec::default().minute(0));

        let on_the_hour = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let entry = ScheduleEntry::new(config, utc(), on_the_hour).unwrap();
        assert_eq!(
            entry.next_fire_at(),
            Utc.with_ymd_and_hms(2024, 1, 1, 13, 0, 0).unwrap()
        );
    }
}
