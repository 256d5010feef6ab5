//! Contest Clock - 服务器时间同步与比赛倒计时
//!
//! 本库为客户端提供准确、抗漂移的"当前服务器时间"，并在此基础上驱动比赛倒计时状态机：
//! - 🕐 时钟同步：往返时延补偿的偏移量估算
//! - 📦 共享缓存：10 秒有效期，并发请求合并为一次网络调用
//! - 🚦 限流与熔断：同一调用方 5 秒内不重复同步，连续失败 5 次后停止自动同步
//! - ⏱️ 倒计时：未开始 / 进行中 / 已结束，每秒本地计算，每 5 分钟刷新比赛窗口
//! - ⚙️ 事件系统：阶段变更、比赛结束、同步状态统一广播
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use contest_clock::{ContestClock, ContestClockConfig, TimerCallbacks, format_hms};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ContestClockConfig::builder()
//!         .base_url("https://judge.example.com/api")
//!         .build();
//!
//!     let clock = ContestClock::new(config)?;
//!     clock.start()?;
//!
//!     let callbacks = TimerCallbacks::new()
//!         .on_status_change(|phase| println!("阶段变更: {}", phase))
//!         .on_time_expired(|| println!("比赛结束"));
//!     let handle = clock.watch_contest(42, callbacks)?;
//!
//!     let mut state = handle.subscribe_state();
//!     while state.changed().await.is_ok() {
//!         let current = state.borrow_and_update().clone();
//!         if let Some(remaining) = current.time_remaining_seconds {
//!             println!("剩余 {}", format_hms(remaining));
//!         }
//!         if current.status.is_terminal() {
//!             break;
//!         }
//!     }
//!
//!     clock.shutdown().await;
//!     Ok(())
//! }
//! ```

// 导出核心模块
pub mod clock;
pub mod clock_sync;
pub mod config;
pub mod contest_timer;
pub mod error;
pub mod events;
pub mod http_client;
pub mod lifecycle;
pub mod rate_limiter;
pub mod scheduler;
pub mod sdk;
pub mod time_fetch;
pub mod utils;
pub mod version;

#[cfg(test)]
mod test_support;

// 重新导出核心类型，方便使用
pub use clock::{LocalClock, ManualClock, SystemLocalClock};
pub use clock_sync::{ClockSyncEngine, OffsetEstimate, SyncHealth, SyncHealthSnapshot, SyncOutcome};
pub use config::{
    ClockSyncConfig, ContestClockConfig, ContestClockConfigBuilder, ContestTimerConfig,
    HttpClientConfig,
};
pub use contest_timer::{
    evaluate, progress_percent, ContestTimer, ContestTimerHandle, ContestWindow, Phase,
    TimerCallbacks, TimerState,
};
pub use error::{ContestClockError, Result};
pub use events::{ClockEvent, EventFilter, EventManager, EventStats, FilteredEventReceiver};
pub use http_client::{
    ContestInfo, ContestTimeResponse, ContestTiming, HttpTimeApi, ServerTimeResponse, TimeApi,
};
pub use lifecycle::{LifecycleHook, LifecycleManager};
pub use rate_limiter::{SyncThrottle, SyncThrottleStats};
pub use scheduler::ScheduledTask;
pub use sdk::ContestClock;
pub use time_fetch::{CoordinatorStats, TimeFetchCoordinator, TimeSample};
pub use utils::{format_countdown, format_hms, TimeFormatter, TimezoneConfig};
pub use version::{SDK_VERSION, BUILD_TIME};
