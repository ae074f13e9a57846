use chrono::{DateTime, FixedOffset, Utc};
use cron::Schedule;
use jobcast_core::{models::CrontabSpec, SchedulerError, SchedulerResult};
use std::collections::BTreeSet;
use std::str::FromStr;

const WEEKDAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// CRON表达式解析和调度工具
///
/// 表达式按 `cron` crate 的 6 字段格式解析（秒 分 时 日 月 周），
/// 在指定的固定时区偏移下计算触发时间。
#[derive(Debug, Clone)]
pub struct CronScheduler {
    expression: String,
    schedule: Schedule,
    timezone: FixedOffset,
}

impl CronScheduler {
    pub fn new(cron_expr: &str, timezone: FixedOffset) -> SchedulerResult<Self> {
        let schedule = Schedule::from_str(cron_expr).map_err(|e| SchedulerError::InvalidCron {
            expr: cron_expr.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            expression: cron_expr.to_string(),
            schedule,
            timezone,
        })
    }

    /// 由 crontab 字段构建，秒固定为 0
    pub fn from_crontab(spec: &CrontabSpec, timezone: FixedOffset) -> SchedulerResult<Self> {
        let expr = crontab_expression(spec)?;
        Self::new(&expr, timezone)
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// 严格晚于 `from` 的下一次触发时间
    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&from.with_timezone(&self.timezone))
            .next()
            .map(|next| next.with_timezone(&Utc))
    }

    /// 获取从指定时间开始的多个执行时间
    pub fn upcoming_times(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule
            .after(&from.with_timezone(&self.timezone))
            .take(count)
            .map(|next| next.with_timezone(&Utc))
            .collect()
    }

    /// 验证CRON表达式是否有效
    pub fn validate_cron_expression(cron_expr: &str) -> SchedulerResult<()> {
        Schedule::from_str(cron_expr).map_err(|e| SchedulerError::InvalidCron {
            expr: cron_expr.to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }
}

/// crontab 字段转为 6 字段表达式
pub fn crontab_expression(spec: &CrontabSpec) -> SchedulerResult<String> {
    let fields = [
        ("minute", &spec.minute),
        ("hour", &spec.hour),
        ("day_of_month", &spec.day_of_month),
        ("month_of_year", &spec.month_of_year),
        ("day_of_week", &spec.day_of_week),
    ];
    for (name, value) in fields {
        if value.trim().is_empty() || value.contains(char::is_whitespace) {
            return Err(SchedulerError::InvalidCron {
                expr: value.to_string(),
                message: format!("{name} 字段不能为空或包含空白"),
            });
        }
    }

    Ok(format!(
        "0 {} {} {} {} {}",
        spec.minute,
        spec.hour,
        spec.day_of_month,
        spec.month_of_year,
        day_of_week_field(&spec.day_of_week)?
    ))
}

/// 星期字段使用 0-6（0 和 7 为周日）或英文缩写，转换为显式的英文缩写列表，
/// 避免与 `cron` crate 的 1-7 编号混淆。
fn day_of_week_field(value: &str) -> SchedulerResult<String> {
    if value == "*" || value == "?" {
        return Ok("*".to_string());
    }

    let invalid = |message: String| SchedulerError::InvalidCron {
        expr: value.to_string(),
        message,
    };

    let mut days = BTreeSet::new();
    for token in value.split(',') {
        let (range, step) = match token.split_once('/') {
            Some((range, step)) => {
                let step: usize = step
                    .parse()
                    .map_err(|_| invalid(format!("无效的步长: {step}")))?;
                if step == 0 {
                    return Err(invalid("步长必须大于0".to_string()));
                }
                (range, step)
            }
            None => (token, 1),
        };

        let (start, end) = if range == "*" {
            (0, 6)
        } else if let Some((start, end)) = range.split_once('-') {
            let start = parse_weekday(start).ok_or_else(|| invalid(format!("无效的星期: {start}")))?;
            let end = parse_weekday_end(end).ok_or_else(|| invalid(format!("无效的星期: {end}")))?;
            if start > end {
                return Err(invalid(format!("星期范围起点大于终点: {range}")));
            }
            (start, end)
        } else {
            let day = parse_weekday(range).ok_or_else(|| invalid(format!("无效的星期: {range}")))?;
            let end = if token.contains('/') { 6 } else { day };
            (day, end)
        };

        days.extend((start..=end).step_by(step).map(|day| day % 7));
    }

    Ok(days
        .into_iter()
        .map(|day| WEEKDAY_NAMES[day])
        .collect::<Vec<_>>()
        .join(","))
}

fn parse_weekday(value: &str) -> Option<usize> {
    let value = value.trim();
    if let Ok(day) = value.parse::<usize>() {
        return (day <= 7).then_some(day % 7);
    }
    let lower = value.to_ascii_lowercase();
    WEEKDAY_NAMES
        .iter()
        .position(|name| lower.starts_with(&name.to_ascii_lowercase()) && lower.len() >= 3)
}

/// 范围终点允许 7 表示周日，如 `1-7`
fn parse_weekday_end(value: &str) -> Option<usize> {
    if value.trim() == "7" {
        return Some(7);
    }
    parse_weekday(value)
}
