//! 时钟同步引擎
//!
//! 估算 `服务器时间 − 本地时间` 的偏移量：
//!
//! ```text
//! t0 = 本地时间（请求前）
//! t1 = 本地时间（响应后）
//! rtt = t1 − t0
//! offset = server_epoch_ms + rtt / 2 − t1
//! ```
//!
//! 公式假设上下行时延对称，不对非对称链路做修正。
//!
//! - `now()` 始终返回 `本地时间 + 当前偏移`，同步进行中也不阻塞
//! - 同步失败时保留上一次成功的偏移量，只把 `connected` 置为 false
//! - 连续失败达到阈值后熔断，`sync()` 不再发起请求，直到一次成功
//! - 从未成功同步时偏移量为 0（未补偿的本地时间）

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::{datetime_from_ms, LocalClock};
use crate::config::ClockSyncConfig;
use crate::error::{ContestClockError, Result};
use crate::events::{event_builders, EventManager};
use crate::lifecycle::LifecycleHook;
use crate::rate_limiter::SyncThrottle;
use crate::scheduler::ScheduledTask;
use crate::time_fetch::{TimeFetchCoordinator, TimeSample};

/// 偏移量估计（`server_time − local_time`，毫秒）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetEstimate {
    pub offset_ms: i64,
    pub round_trip_ms: i64,
    /// 产生该估计时的本地时间
    pub measured_at_local_ms: i64,
}

impl OffsetEstimate {
    pub fn from_sample(sample: &TimeSample) -> Self {
        Self {
            offset_ms: sample.server_epoch_ms + sample.round_trip_ms / 2
                - sample.observed_at_local_ms,
            round_trip_ms: sample.round_trip_ms,
            measured_at_local_ms: sample.observed_at_local_ms,
        }
    }
}

/// 同步健康状态
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncHealth {
    pub connected: bool,
    pub consecutive_failures: u32,
    /// 最近一次成功同步的服务器时间
    pub last_sync_at: Option<DateTime<Utc>>,
}

/// 供 UI 使用的只读快照
///
/// `connected == false` 时倒计时可能不准确，应提示用户。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncHealthSnapshot {
    pub connected: bool,
    pub offset_ms: i64,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub circuit_open: bool,
    pub round_trip_ms: Option<i64>,
}

impl SyncHealthSnapshot {
    /// 生成状态摘要（用于日志打印）
    pub fn summary(&self) -> String {
        let last_sync = self
            .last_sync_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "从未同步".to_string());
        let rtt = self
            .round_trip_ms
            .map(|r| format!("{}ms", r))
            .unwrap_or_else(|| "-".to_string());

        format!(
            "【时钟同步】\n\
             已连接: {}\n\
             偏移量: {}ms\n\
             往返时延: {}\n\
             上次同步: {}\n\
             连续失败: {}{}",
            self.connected,
            self.offset_ms,
            rtt,
            last_sync,
            self.consecutive_failures,
            if self.circuit_open { "（已熔断）" } else { "" }
        )
    }

    pub fn to_json_pretty(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// 一次 `sync()` 调用的结果；同步失败不会以错误形式抛出
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// 同步成功，偏移量已更新
    Synced(OffsetEstimate),
    /// 请求失败，沿用上一次偏移量
    Failed(ContestClockError),
    /// 距离上次尝试太近，已跳过
    RateLimited { wait: Duration },
    /// 熔断中，未发起请求
    CircuitOpen { failures: u32 },
}

impl SyncOutcome {
    pub fn is_synced(&self) -> bool {
        matches!(self, SyncOutcome::Synced(_))
    }
}

#[derive(Debug, Default)]
struct EngineState {
    offset: Option<OffsetEstimate>,
    last_sample: Option<TimeSample>,
    health: SyncHealth,
}

/// 时钟同步引擎
pub struct ClockSyncEngine {
    coordinator: Arc<TimeFetchCoordinator>,
    clock: Arc<dyn LocalClock>,
    endpoint_url: String,
    config: ClockSyncConfig,
    throttle: SyncThrottle,
    state: RwLock<EngineState>,
    events: Arc<EventManager>,
}

impl ClockSyncEngine {
    pub fn new(
        coordinator: Arc<TimeFetchCoordinator>,
        clock: Arc<dyn LocalClock>,
        endpoint_url: impl Into<String>,
        config: ClockSyncConfig,
        events: Arc<EventManager>,
    ) -> Self {
        Self {
            coordinator,
            clock,
            endpoint_url: endpoint_url.into(),
            throttle: SyncThrottle::new(config.min_sync_interval_ms),
            config,
            state: RwLock::new(EngineState::default()),
            events,
        }
    }

    /// 当前偏移量（从未同步成功时为 0）
    pub fn offset_ms(&self) -> i64 {
        self.state.read().offset.map(|o| o.offset_ms).unwrap_or(0)
    }

    /// 当前服务器时间（毫秒）
    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms() + self.offset_ms()
    }

    /// 当前服务器时间
    pub fn now(&self) -> DateTime<Utc> {
        datetime_from_ms(self.now_ms())
    }

    /// 本地时钟
    pub fn local_clock(&self) -> Arc<dyn LocalClock> {
        Arc::clone(&self.clock)
    }

    pub fn offset(&self) -> Option<OffsetEstimate> {
        self.state.read().offset
    }

    pub fn last_sample(&self) -> Option<TimeSample> {
        self.state.read().last_sample
    }

    pub fn health(&self) -> SyncHealth {
        self.state.read().health.clone()
    }

    pub fn is_circuit_open(&self) -> bool {
        self.state.read().health.consecutive_failures >= self.config.failure_threshold
    }

    /// 健康状态快照
    pub fn sync_health(&self) -> SyncHealthSnapshot {
        let state = self.state.read();
        SyncHealthSnapshot {
            connected: state.health.connected,
            offset_ms: state.offset.map(|o| o.offset_ms).unwrap_or(0),
            last_sync_at: state.health.last_sync_at,
            consecutive_failures: state.health.consecutive_failures,
            circuit_open: state.health.consecutive_failures >= self.config.failure_threshold,
            round_trip_ms: state.offset.map(|o| o.round_trip_ms),
        }
    }

    /// 尽力同步一次
    pub async fn sync(&self) -> SyncOutcome {
        self.run_sync(false).await
    }

    /// 显式重新同步
    ///
    /// 熔断中也会尝试一次（仍受最小间隔限制）：成功则恢复，失败则保持熔断。
    pub async fn request_resync(&self) -> SyncOutcome {
        self.run_sync(true).await
    }

    async fn run_sync(&self, explicit: bool) -> SyncOutcome {
        let failures = self.state.read().health.consecutive_failures;
        if failures >= self.config.failure_threshold && !explicit {
            debug!("时钟同步熔断中，跳过: 连续失败 {} 次", failures);
            return SyncOutcome::CircuitOpen { failures };
        }

        let t0 = self.clock.now_ms();
        if let Err(wait) = self.throttle.check_attempt(t0) {
            return SyncOutcome::RateLimited { wait };
        }

        let result = self.coordinator.fetch_server_time(&self.endpoint_url).await;
        let t1 = self.clock.now_ms();

        match result {
            Ok(fetched) => {
                let sample = TimeSample {
                    server_epoch_ms: fetched.server_epoch_ms,
                    observed_at_local_ms: t1,
                    round_trip_ms: (t1 - t0).max(0),
                };
                let estimate = OffsetEstimate::from_sample(&sample);
                let server_now = t1 + estimate.offset_ms;

                let previous_failures = {
                    let mut state = self.state.write();
                    let previous = state.health.consecutive_failures;
                    state.offset = Some(estimate);
                    state.last_sample = Some(sample);
                    state.health = SyncHealth {
                        connected: true,
                        consecutive_failures: 0,
                        last_sync_at: Some(datetime_from_ms(server_now)),
                    };
                    previous
                };

                if previous_failures >= self.config.failure_threshold {
                    info!("✅ 时钟同步恢复，熔断解除");
                }
                info!(
                    "✅ 时钟同步成功: offset={}ms, rtt={}ms",
                    estimate.offset_ms, estimate.round_trip_ms
                );
                self.events.emit(event_builders::sync_succeeded(
                    estimate.offset_ms,
                    estimate.round_trip_ms,
                    server_now,
                ));
                SyncOutcome::Synced(estimate)
            }
            Err(error) => {
                let failures = {
                    let mut state = self.state.write();
                    state.health.connected = false;
                    state.health.consecutive_failures += 1;
                    state.health.consecutive_failures
                };
                let server_now = self.now_ms();

                warn!(
                    "⚠️ 时钟同步失败（沿用偏移 {}ms）: 连续失败 {} 次, error={}",
                    self.offset_ms(),
                    failures,
                    error
                );
                self.events.emit(event_builders::sync_failed(
                    error.to_string(),
                    failures,
                    server_now,
                ));
                if failures == self.config.failure_threshold {
                    warn!("⚠️ 时钟同步已熔断: 连续失败 {} 次，停止自动同步", failures);
                    self.events
                        .emit(event_builders::circuit_opened(failures, server_now));
                }
                SyncOutcome::Failed(error)
            }
        }
    }

    /// 启动定时同步：立即同步一次，之后按固定间隔重新同步
    ///
    /// 返回的任务句柄被丢弃时停止。
    pub fn start(self: &Arc<Self>, token: CancellationToken) -> ScheduledTask {
        let engine = Arc::clone(self);
        ScheduledTask::spawn(
            "clock-sync",
            self.config.resync_interval(),
            token,
            move || {
                let engine = Arc::clone(&engine);
                async move {
                    engine.sync().await;
                }
            },
        )
    }
}

#[async_trait]
impl LifecycleHook for ClockSyncEngine {
    async fn on_background(&self) -> Result<()> {
        Ok(())
    }

    /// 挂起期间本地时钟可能漂移，回到前台时重新同步
    async fn on_foreground(&self) -> Result<()> {
        match self.request_resync().await {
            SyncOutcome::Failed(e) => Err(e),
            _ => Ok(()),
        }
    }
}
