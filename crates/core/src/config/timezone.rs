use chrono::FixedOffset;

use crate::{SchedulerError, SchedulerResult};

/// 解析时区配置
///
/// 支持 `UTC`/`Z`/`GMT` 以及 `+08:00`、`-0530`、`+8` 形式的固定偏移。
pub fn parse_timezone(value: &str) -> SchedulerResult<FixedOffset> {
    let value = value.trim();
    let invalid = || SchedulerError::Configuration(format!("无效的时区: {value}"));

    if value.is_empty()
        || value.eq_ignore_ascii_case("utc")
        || value.eq_ignore_ascii_case("gmt")
        || value.eq_ignore_ascii_case("z")
    {
        return FixedOffset::east_opt(0).ok_or_else(invalid);
    }

    let upper = value.to_ascii_uppercase();
    let offset = upper
        .strip_prefix("UTC")
        .or_else(|| upper.strip_prefix("GMT"))
        .unwrap_or(&upper);

    let (sign, rest) = match offset.chars().next() {
        Some('+') => (1, &offset[1..]),
        Some('-') => (-1, &offset[1..]),
        _ => return Err(invalid()),
    };

    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h, m),
        None if rest.len() == 4 => rest.split_at(2),
        None => (rest, "0"),
    };
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if hours > 14 || minutes >= 60 {
        return Err(invalid());
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utc_aliases() {
        for value in ["UTC", "utc", "Z", "GMT", ""] {
            assert_eq!(parse_timezone(value).unwrap().local_minus_utc(), 0, "{value}");
        }
    }

    #[test]
    fn test_fixed_offsets() {
        assert_eq!(parse_timezone("+08:00").unwrap().local_minus_utc(), 8 * 3600);
        assert_eq!(parse_timezone("-0530").unwrap().local_minus_utc(), -(5 * 3600 + 1800));
        assert_eq!(parse_timezone("UTC+8").unwrap().local_minus_utc(), 8 * 3600);
    }

    #[test]
    fn test_invalid_timezones() {
        for value in ["Europe/Paris", "+25:00", "+08:75", "abc"] {
            let err = parse_timezone(value).unwrap_err();
            assert_eq!(err.kind(), "ConfigurationError", "{value}");
        }
    }
}
