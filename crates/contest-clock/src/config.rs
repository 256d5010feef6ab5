//! SDK 配置
//!
//! 所有时长默认值与服务端约定保持一致：
//! - 样本缓存 10 秒
//! - 同一调用方两次同步至少间隔 5 秒
//! - 连续失败 5 次后熔断
//! - 时钟每 5 分钟重新同步，比赛时间窗口每 5 分钟重新拉取

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ContestClockError, Result};

/// 时钟同步配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockSyncConfig {
    /// 服务器时间端点（相对 base_url 的路径）
    pub endpoint: String,
    /// 样本缓存有效期（毫秒）
    pub cache_ttl_ms: i64,
    /// 同一调用方两次同步尝试的最小间隔（毫秒）
    pub min_sync_interval_ms: i64,
    /// 熔断阈值（连续失败次数）
    pub failure_threshold: u32,
    /// 定时重新同步间隔（秒）
    pub resync_interval_secs: u64,
}

impl Default for ClockSyncConfig {
    fn default() -> Self {
        Self {
            endpoint: "/contests/time".to_string(),
            cache_ttl_ms: 10_000,
            min_sync_interval_ms: 5_000,
            failure_threshold: 5,
            resync_interval_secs: 300,
        }
    }
}

impl ClockSyncConfig {
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }
}

/// 比赛计时器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContestTimerConfig {
    /// 本地 tick 间隔（毫秒），只做本地重算，不发网络请求
    pub tick_interval_ms: u64,
    /// 重新拉取比赛时间窗口的间隔（秒）
    pub refresh_interval_secs: u64,
}

impl Default for ContestTimerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
            refresh_interval_secs: 300,
        }
    }
}

impl ContestTimerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

/// HTTP 客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpClientConfig {
    /// 连接超时（秒）
    pub connect_timeout_secs: Option<u64>,
    /// 请求超时（秒）
    pub request_timeout_secs: Option<u64>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: Some(10),
            request_timeout_secs: Some(15),
        }
    }
}

/// SDK 总配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContestClockConfig {
    /// 后端 API 基础 URL，例如 https://judge.example.com/api
    pub base_url: String,
    pub clock_sync: ClockSyncConfig,
    pub contest_timer: ContestTimerConfig,
    pub http_client: HttpClientConfig,
    /// 事件广播通道容量
    pub event_capacity: usize,
    /// 显示用时区偏移（秒），None 表示使用系统本地时区
    pub timezone_offset_seconds: Option<i32>,
}

impl Default for ContestClockConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            clock_sync: ClockSyncConfig::default(),
            contest_timer: ContestTimerConfig::default(),
            http_client: HttpClientConfig::default(),
            event_capacity: 256,
            timezone_offset_seconds: None,
        }
    }
}

impl ContestClockConfig {
    pub fn builder() -> ContestClockConfigBuilder {
        ContestClockConfigBuilder::new()
    }

    /// 校验配置
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(ContestClockError::Config("base_url 不能为空".to_string()));
        }
        if self.clock_sync.endpoint.trim().is_empty() {
            return Err(ContestClockError::Config("时间端点不能为空".to_string()));
        }
        if self.clock_sync.cache_ttl_ms <= 0 {
            return Err(ContestClockError::Config("cache_ttl_ms 必须大于 0".to_string()));
        }
        if self.clock_sync.min_sync_interval_ms < 0 {
            return Err(ContestClockError::Config("min_sync_interval_ms 不能为负".to_string()));
        }
        if self.clock_sync.failure_threshold == 0 {
            return Err(ContestClockError::Config("failure_threshold 必须大于 0".to_string()));
        }
        if self.clock_sync.resync_interval_secs == 0 {
            return Err(ContestClockError::Config("resync_interval_secs 必须大于 0".to_string()));
        }
        if self.contest_timer.tick_interval_ms == 0 || self.contest_timer.refresh_interval_secs == 0 {
            return Err(ContestClockError::Config("计时器间隔必须大于 0".to_string()));
        }
        if self.event_capacity == 0 {
            return Err(ContestClockError::Config("event_capacity 必须大于 0".to_string()));
        }
        Ok(())
    }

    fn trimmed_base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    /// 服务器时间端点完整 URL
    pub fn server_time_url(&self) -> String {
        let path = self.clock_sync.endpoint.trim_start_matches('/');
        format!("{}/{}", self.trimmed_base(), path)
    }

    /// 比赛时间端点完整 URL
    pub fn contest_time_url(&self, contest_id: u64) -> String {
        format!("{}/contests/{}/time", self.trimmed_base(), contest_id)
    }
}

pub struct ContestClockConfigBuilder {
    config: ContestClockConfig,
}

impl ContestClockConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ContestClockConfig::default(),
        }
    }

    pub fn base_url<S: Into<String>>(mut self, url: S) -> Self {
        self.config.base_url = url.into();
        self
    }

    pub fn time_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.config.clock_sync.endpoint = endpoint.into();
        self
    }

    pub fn clock_sync(mut self, config: ClockSyncConfig) -> Self {
        self.config.clock_sync = config;
        self
    }

    pub fn contest_timer(mut self, config: ContestTimerConfig) -> Self {
        self.config.contest_timer = config;
        self
    }

    pub fn http_client(mut self, config: HttpClientConfig) -> Self {
        self.config.http_client = config;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    /// 设置显示时区（秒），例如 +8 小时 = 28800
    pub fn timezone_offset_seconds(mut self, offset: Option<i32>) -> Self {
        self.config.timezone_offset_seconds = offset;
        self
    }

    pub fn build(self) -> ContestClockConfig {
        self.config
    }
}

impl Default for ContestClockConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_server_contract() {
        let config = ContestClockConfig::default();
        assert_eq!(config.clock_sync.cache_ttl_ms, 10_000);
        assert_eq!(config.clock_sync.min_sync_interval_ms, 5_000);
        assert_eq!(config.clock_sync.failure_threshold, 5);
        assert_eq!(config.clock_sync.resync_interval(), Duration::from_secs(300));
        assert_eq!(config.contest_timer.tick_interval(), Duration::from_secs(1));
        assert_eq!(config.contest_timer.refresh_interval(), Duration::from_secs(300));
    }

    #[test]
    fn test_urls_trim_slashes() {
        let config = ContestClockConfig::builder()
            .base_url("https://judge.example.com/api/")
            .build();
        assert_eq!(config.server_time_url(), "https://judge.example.com/api/contests/time");
        assert_eq!(
            config.contest_time_url(42),
            "https://judge.example.com/api/contests/42/time"
        );
    }

    #[test]
    fn test_validate() {
        assert!(ContestClockConfig::default().validate().is_err());

        let config = ContestClockConfig::builder().base_url("http://localhost:8000").build();
        assert!(config.validate().is_ok());

        let mut bad = config.clone();
        bad.clock_sync.failure_threshold = 0;
        assert!(matches!(bad.validate(), Err(ContestClockError::Config(_))));

        let mut bad = config;
        bad.contest_timer.tick_interval_ms = 0;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_config_roundtrips_through_json() {
        let config = ContestClockConfig::builder()
            .base_url("http://localhost:8000")
            .timezone_offset_seconds(Some(28800))
            .build();
        let json = serde_json::to_string(&config).unwrap();
        let back: ContestClockConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.base_url, config.base_url);
        assert_eq!(back.timezone_offset_seconds, Some(28800));
    }
}
