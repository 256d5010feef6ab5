//! 时间显示工具
//!
//! 只用于展示，不参与倒计时计算：
//!
//! - **倒计时**: 秒数格式化为 `HH:MM:SS`，小时数可以超过 24
//! - **时间点**: 服务器 UTC 毫秒时间戳按配置的时区格式化
//! - **多语言**: 不含本地化文本，`format_countdown` 只用 `d` 作为天数后缀

use chrono::{DateTime, FixedOffset, Local, Offset, TimeZone, Utc};

/// 秒数格式化为 `HH:MM:SS`
///
/// 负数按 0 处理，小时数不回绕（`90000` → `25:00:00`）。
pub fn format_hms(seconds: i64) -> String {
    let total = seconds.max(0);
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, secs)
}

/// 可读的倒计时标签，例如 `2d 03:04:05`、`04:05`
///
/// 超过一天时带天数前缀，不足一小时时省略小时。
pub fn format_countdown(seconds: i64) -> String {
    let total = seconds.max(0);
    let days = total / 86_400;
    let rest = total % 86_400;

    if days > 0 {
        format!("{}d {}", days, format_hms(rest))
    } else if rest >= 3600 {
        format_hms(rest)
    } else {
        format!("{:02}:{:02}", rest / 60, rest % 60)
    }
}

/// 时区配置（默认 UTC）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimezoneConfig {
    /// 时区偏移（秒），例如：+08:00 = 28800, -05:00 = -18000
    pub offset_seconds: i32,
}

impl TimezoneConfig {
    /// 从小时偏移创建，例如：+8, -5
    pub fn from_hours(hours: i32) -> Self {
        Self {
            offset_seconds: hours * 3600,
        }
    }

    /// 从分钟偏移创建，例如：480 (+8小时), -300 (-5小时)
    pub fn from_minutes(minutes: i32) -> Self {
        Self {
            offset_seconds: minutes * 60,
        }
    }

    /// 使用系统本地时区
    pub fn local() -> Self {
        Self {
            offset_seconds: Local::now().offset().local_minus_utc(),
        }
    }

    pub fn to_fixed_offset(&self) -> Option<FixedOffset> {
        FixedOffset::east_opt(self.offset_seconds)
    }
}

/// 时间格式化工具
///
/// 每个实例绑定一个时区；偏移超出范围时按 UTC 处理。
#[derive(Debug, Clone, Copy)]
pub struct TimeFormatter {
    offset: FixedOffset,
}

impl TimeFormatter {
    pub fn new(config: TimezoneConfig) -> Self {
        let offset = config.to_fixed_offset().unwrap_or_else(|| Utc.fix());
        Self { offset }
    }

    /// 按配置偏移创建；`None` 使用系统本地时区
    pub fn from_offset_seconds(offset_seconds: Option<i32>) -> Self {
        match offset_seconds {
            Some(offset_seconds) => Self::new(TimezoneConfig { offset_seconds }),
            None => Self::new(TimezoneConfig::local()),
        }
    }

    pub fn offset_seconds(&self) -> i32 {
        self.offset.local_minus_utc()
    }

    /// 将 UTC 毫秒时间戳转换为配置的时区；时间戳越界时按 Unix 纪元处理
    pub fn to_timezone(&self, utc_timestamp_ms: i64) -> DateTime<FixedOffset> {
        Utc.timestamp_millis_opt(utc_timestamp_ms)
            .single()
            .unwrap_or_default()
            .with_timezone(&self.offset)
    }

    /// 格式: "YYYY-MM-DD HH:MM:SS"
    pub fn format_standard(&self, utc_timestamp_ms: i64) -> String {
        self.to_timezone(utc_timestamp_ms)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
    }

    /// 格式: "HH:MM:SS"
    pub fn format_time(&self, utc_timestamp_ms: i64) -> String {
        self.to_timezone(utc_timestamp_ms)
            .format("%H:%M:%S")
            .to_string()
    }

    /// 格式: "YYYY-MM-DDTHH:MM:SS+HH:MM"
    pub fn format_iso8601(&self, utc_timestamp_ms: i64) -> String {
        self.to_timezone(utc_timestamp_ms).to_rfc3339()
    }
}

impl Default for TimeFormatter {
    fn default() -> Self {
        Self::new(TimezoneConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_hms() {
        assert_eq!(format_hms(0), "00:00:00");
        assert_eq!(format_hms(3_600), "01:00:00");
        assert_eq!(format_hms(3_661), "01:01:01");
        assert_eq!(format_hms(90_000), "25:00:00");
        assert_eq!(format_hms(-30), "00:00:00");
    }

    #[test]
    fn test_format_countdown() {
        assert_eq!(format_countdown(245), "04:05");
        assert_eq!(format_countdown(3_725), "01:02:05");
        assert_eq!(format_countdown(2 * 86_400 + 11_045), "2d 03:04:05");
        assert_eq!(format_countdown(-1), "00:00");
    }

    #[test]
    fn test_timezone_config() {
        assert_eq!(TimezoneConfig::from_hours(8).offset_seconds, 28_800);
        assert_eq!(TimezoneConfig::from_minutes(-300).offset_seconds, -18_000);
        assert!(TimezoneConfig { offset_seconds: 100_000 }
            .to_fixed_offset()
            .is_none());
    }

    #[test]
    fn test_formatter_uses_configured_offset() {
        let formatter = TimeFormatter::new(TimezoneConfig::from_hours(8));
        let ts = Utc
            .with_ymd_and_hms(2024, 1, 1, 10, 0, 0)
            .unwrap()
            .timestamp_millis();

        assert_eq!(formatter.format_standard(ts), "2024-01-01 18:00:00");
        assert_eq!(formatter.format_time(ts), "18:00:00");
        assert_eq!(formatter.format_iso8601(ts), "2024-01-01T18:00:00+08:00");
    }

    #[test]
    fn test_out_of_range_offset_falls_back_to_utc() {
        let formatter = TimeFormatter::new(TimezoneConfig { offset_seconds: 100_000 });
        assert_eq!(formatter.offset_seconds(), 0);
        assert_eq!(formatter.format_time(0), "00:00:00");
    }
}
