//! 本地时钟抽象
//!
//! 所有"本地时间"读取都经过 [`LocalClock`]，测试里换成 [`ManualClock`]
//! 即可精确控制 RTT、缓存过期和比赛边界。

use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// 本地时钟（UTC 毫秒时间戳）
pub trait LocalClock: Send + Sync + 'static {
    fn now_ms(&self) -> i64;
}

/// 系统时钟
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLocalClock;

impl LocalClock for SystemLocalClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// 手动推进的时钟
///
/// `clone()` 出来的实例共享同一个时间值。
#[derive(Debug, Clone)]
pub struct ManualClock {
    now_ms: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: Arc::new(AtomicI64::new(start_ms)),
        }
    }

    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self::new(start.timestamp_millis())
    }

    pub fn advance_ms(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }

    pub fn set_ms(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl LocalClock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// 毫秒时间戳转 `DateTime<Utc>`，越界时钳到 Unix 纪元
pub fn datetime_from_ms(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}
