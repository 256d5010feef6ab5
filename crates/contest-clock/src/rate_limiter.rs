//! 客户端同步限流
//!
//! 多个界面组件同时挂载时会各自触发一次同步，形成"同步风暴"。
//! 每个同步引擎持有一个 [`SyncThrottle`]：距离自己上次尝试不足最小间隔的调用直接跳过，
//! 不更新任何状态。
//!
//! | 类型 | 限制 |
//! |------|------|
//! | 同一调用方两次同步 | 至少间隔 5 秒 |
//! | 连续失败熔断 | 5 次 |

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// 最小间隔限流器
///
/// 时间由调用方传入（本地时钟毫秒），便于测试。
#[derive(Debug)]
pub struct SyncThrottle {
    /// 最小间隔（毫秒）
    min_interval_ms: i64,
    /// 上次尝试时间
    last_attempt_ms: RwLock<Option<i64>>,
    /// 放行次数
    allowed: AtomicU64,
    /// 被跳过次数
    skipped: AtomicU64,
}

impl SyncThrottle {
    pub fn new(min_interval_ms: i64) -> Self {
        Self {
            min_interval_ms,
            last_attempt_ms: RwLock::new(None),
            allowed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
        }
    }

    /// 检查本次尝试是否放行；放行时记录为最近一次尝试
    ///
    /// 返回：
    /// - Ok(()) - 可以发起
    /// - Err(Duration) - 还需等待的时间
    pub fn check_attempt(&self, now_ms: i64) -> Result<(), Duration> {
        let mut last = self.last_attempt_ms.write();

        if let Some(last_ms) = *last {
            let elapsed = now_ms - last_ms;
            if elapsed < 0 {
                // 本地时钟被回拨：旧记录作废，本次放行
                debug!("本地时钟回拨 {}ms，重置同步限流记录", -elapsed);
            } else if elapsed < self.min_interval_ms {
                let wait_ms = (self.min_interval_ms - elapsed) as u64;
                self.skipped.fetch_add(1, Ordering::Relaxed);
                debug!("同步过快，跳过本次尝试（需等待 {}ms）", wait_ms);
                return Err(Duration::from_millis(wait_ms));
            }
        }

        *last = Some(now_ms);
        self.allowed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// 上次尝试时间
    pub fn last_attempt_ms(&self) -> Option<i64> {
        *self.last_attempt_ms.read()
    }

    /// 清除上次尝试记录
    pub fn reset(&self) {
        *self.last_attempt_ms.write() = None;
    }

    /// 获取统计信息
    pub fn stats(&self) -> SyncThrottleStats {
        SyncThrottleStats {
            allowed: self.allowed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            last_attempt_ms: self.last_attempt_ms(),
        }
    }
}

/// 限流器统计信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncThrottleStats {
    pub allowed: u64,
    pub skipped: u64,
    pub last_attempt_ms: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_first_attempt_allowed() {
        let throttle = SyncThrottle::new(5_000);
        assert_ok!(throttle.check_attempt(1_000));
        assert_eq!(throttle.last_attempt_ms(), Some(1_000));
    }

    #[test]
    fn test_attempt_within_interval_skipped() {
        let throttle = SyncThrottle::new(5_000);
        throttle.check_attempt(1_000).unwrap();

        let wait = assert_err!(throttle.check_attempt(4_000));
        assert_eq!(wait, Duration::from_millis(2_000));
        // 被跳过的尝试不更新记录
        assert_eq!(throttle.last_attempt_ms(), Some(1_000));

        assert!(throttle.check_attempt(6_000).is_ok());
        let stats = throttle.stats();
        assert_eq!(stats.allowed, 2);
        assert_eq!(stats.skipped, 1);
    }

    #[test]
    fn test_clock_stepped_backwards_allows_attempt() {
        let throttle = SyncThrottle::new(5_000);
        throttle.check_attempt(3_600_000).unwrap();

        // 回拨 1 小时后立即放行，并以新时间作为记录
        assert_ok!(throttle.check_attempt(1_000));
        assert_eq!(throttle.last_attempt_ms(), Some(1_000));

        // 之后照常按新记录限流
        let wait = assert_err!(throttle.check_attempt(2_000));
        assert_eq!(wait, Duration::from_millis(4_000));
    }

    #[test]
    fn test_reset() {
        let throttle = SyncThrottle::new(5_000);
        throttle.check_attempt(1_000).unwrap();
        throttle.reset();
        assert!(throttle.check_attempt(1_001).is_ok());
    }
}
