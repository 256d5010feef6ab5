//! 比赛倒计时状态机
//!
//! 状态流转：
//!
//! ```text
//! loading ──┬──> not_started ──> in_progress ──> ended
//!           ├──> in_progress ──> ended
//!           └──> ended
//! ```
//!
//! - `loading` 只在比赛窗口尚未获取到时出现，之后不会再回到 `loading`
//! - 阶段只前进不后退，`ended` 为终态
//! - 每秒一次本地 tick：用缓存的比赛窗口和同步后的 `now()` 重新计算，不发网络请求
//! - 每 5 分钟重新拉取一次比赛窗口；拉取成功时优先采用服务器返回的计时块，
//!   拉取失败时沿用上一次的窗口继续本地计算

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock_sync::ClockSyncEngine;
use crate::config::ContestTimerConfig;
use crate::error::{ContestClockError, Result};
use crate::events::{event_builders, EventManager};
use crate::http_client::{ContestInfo, ContestTiming, TimeApi};
use crate::scheduler::ScheduledTask;

/// 比赛阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Loading,
    NotStarted,
    InProgress,
    Ended,
}

impl Phase {
    fn rank(self) -> u8 {
        match self {
            Phase::Loading => 0,
            Phase::NotStarted => 1,
            Phase::InProgress => 2,
            Phase::Ended => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Loading => "loading",
            Phase::NotStarted => "not_started",
            Phase::InProgress => "in_progress",
            Phase::Ended => "ended",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Ended)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 比赛时间窗口（获取后不可变，刷新时整体替换）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContestWindow {
    pub contest_id: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: i64,
}

impl ContestWindow {
    pub fn new(contest_id: u64, start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Result<Self> {
        if end_time < start_time {
            return Err(ContestClockError::InvalidData(format!(
                "contest {} ends before it starts: {} < {}",
                contest_id, end_time, start_time
            )));
        }
        Ok(Self {
            contest_id,
            start_time,
            end_time,
            duration_seconds: (end_time - start_time).num_seconds(),
        })
    }

    /// 从服务器返回的比赛信息构造；服务器给出的时长为 0 时按起止时间计算
    pub fn from_info(info: &ContestInfo) -> Result<Self> {
        let mut window = Self::new(info.id, info.start_time, info.end_time)?;
        if info.duration_seconds > 0 {
            window.duration_seconds = info.duration_seconds;
        }
        Ok(window)
    }

    /// 用于进度计算的时长
    pub fn effective_duration_seconds(&self) -> i64 {
        if self.duration_seconds > 0 {
            self.duration_seconds
        } else {
            (self.end_time - self.start_time).num_seconds()
        }
    }
}

/// 计时器状态快照
///
/// 每次计算整体替换，不做部分更新。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerState {
    pub status: Phase,
    pub time_to_start_seconds: Option<i64>,
    pub time_remaining_seconds: Option<i64>,
    pub time_to_end_seconds: Option<i64>,
    pub can_submit: bool,
    pub is_accessible: bool,
    pub last_update: Option<DateTime<Utc>>,
}

impl TimerState {
    pub fn loading() -> Self {
        Self {
            status: Phase::Loading,
            time_to_start_seconds: None,
            time_remaining_seconds: None,
            time_to_end_seconds: None,
            can_submit: false,
            is_accessible: false,
            last_update: None,
        }
    }

    /// 根据服务器返回的计时块生成状态
    ///
    /// 阶段判定：距开始 > 0 为未开始；否则可提交、剩余 > 0 或距结束 > 0 为进行中；其余为已结束。
    pub fn from_server_timing(timing: &ContestTiming, now: DateTime<Utc>) -> Self {
        let to_start = timing.time_to_start_seconds.unwrap_or(0).max(0);
        let remaining = timing.time_remaining_seconds.map(|s| s.max(0));
        let to_end = timing.time_to_end_seconds.map(|s| s.max(0));

        let status = if to_start > 0 {
            Phase::NotStarted
        } else if timing.can_submit || remaining.or(to_end).unwrap_or(0) > 0 {
            Phase::InProgress
        } else {
            Phase::Ended
        };

        match status {
            Phase::NotStarted => Self {
                status,
                time_to_start_seconds: Some(to_start),
                time_remaining_seconds: None,
                time_to_end_seconds: to_end,
                can_submit: false,
                is_accessible: timing.is_accessible,
                last_update: Some(now),
            },
            Phase::InProgress => Self {
                status,
                time_to_start_seconds: None,
                time_remaining_seconds: Some(remaining.or(to_end).unwrap_or(0)),
                time_to_end_seconds: to_end.or(remaining),
                can_submit: timing.can_submit,
                is_accessible: true,
                last_update: Some(now),
            },
            _ => Self {
                status: Phase::Ended,
                time_to_start_seconds: None,
                time_remaining_seconds: Some(0),
                time_to_end_seconds: Some(0),
                can_submit: false,
                is_accessible: true,
                last_update: Some(now),
            },
        }
    }

    fn has_server_timing(timing: &ContestTiming) -> bool {
        timing.time_to_start_seconds.is_some()
            || timing.time_remaining_seconds.is_some()
            || timing.time_to_end_seconds.is_some()
    }
}

/// 毫秒差向下取整为秒，负数按 0 处理
fn floor_seconds(delta_ms: i64) -> i64 {
    delta_ms.max(0) / 1000
}

/// 由 `(now, window)` 计算状态；相同输入总是得到相同结果
pub fn evaluate(now: DateTime<Utc>, window: &ContestWindow) -> TimerState {
    let now_ms = now.timestamp_millis();
    let start_ms = window.start_time.timestamp_millis();
    let end_ms = window.end_time.timestamp_millis();

    if now_ms < start_ms {
        TimerState {
            status: Phase::NotStarted,
            time_to_start_seconds: Some(floor_seconds(start_ms - now_ms)),
            time_remaining_seconds: None,
            time_to_end_seconds: Some(floor_seconds(end_ms - now_ms)),
            can_submit: false,
            is_accessible: false,
            last_update: Some(now),
        }
    } else if now_ms <= end_ms {
        let remaining = floor_seconds(end_ms - now_ms);
        TimerState {
            status: Phase::InProgress,
            time_to_start_seconds: None,
            time_remaining_seconds: Some(remaining),
            time_to_end_seconds: Some(remaining),
            can_submit: true,
            is_accessible: true,
            last_update: Some(now),
        }
    } else {
        TimerState {
            status: Phase::Ended,
            time_to_start_seconds: None,
            time_remaining_seconds: Some(0),
            time_to_end_seconds: Some(0),
            can_submit: false,
            is_accessible: true,
            last_update: Some(now),
        }
    }
}

/// 比赛进度百分比，仅在进行中时有意义，其余阶段为 0
pub fn progress_percent(state: &TimerState, window: &ContestWindow) -> f64 {
    if state.status != Phase::InProgress {
        return 0.0;
    }
    let duration = window.effective_duration_seconds();
    if duration <= 0 {
        return 0.0;
    }
    let remaining = state.time_remaining_seconds.unwrap_or(0);
    ((duration - remaining) as f64 / duration as f64 * 100.0).clamp(0.0, 100.0)
}

pub type StatusChangeCallback = Arc<dyn Fn(Phase) + Send + Sync>;
pub type TimeExpiredCallback = Arc<dyn Fn() + Send + Sync>;

/// 计时器回调
///
/// 回调在状态计算过程中同步调用，不应在回调内再调用同一个计时器的 `tick()` 或 `refresh_window()`。
/// `state()`、`window()`、`progress_percent()` 和 `refresh_failures()` 不经过计算锁，可以在回调内读取。
#[derive(Clone, Default)]
pub struct TimerCallbacks {
    on_status_change: Option<StatusChangeCallback>,
    on_time_expired: Option<TimeExpiredCallback>,
}

impl TimerCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每次阶段变更时调用（包括离开 loading 的首次判定）
    pub fn on_status_change<F>(mut self, callback: F) -> Self
    where
        F: Fn(Phase) + Send + Sync + 'static,
    {
        self.on_status_change = Some(Arc::new(callback));
        self
    }

    /// 进行中 → 已结束 时调用，每个计时器只调用一次
    pub fn on_time_expired<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_time_expired = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for TimerCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerCallbacks")
            .field("on_status_change", &self.on_status_change.is_some())
            .field("on_time_expired", &self.on_time_expired.is_some())
            .finish()
    }
}

#[derive(Debug)]
struct TimerInner {
    current: TimerState,
    expired_notified: bool,
}

/// 单场比赛的倒计时状态机
pub struct ContestTimer {
    contest_id: u64,
    clock: Arc<ClockSyncEngine>,
    api: Arc<dyn TimeApi>,
    events: Arc<EventManager>,
    config: ContestTimerConfig,
    callbacks: TimerCallbacks,
    /// 串行化所有状态计算
    inner: Mutex<TimerInner>,
    /// 只在持有 `inner` 时写入
    window: RwLock<Option<ContestWindow>>,
    state_tx: watch::Sender<TimerState>,
    refresh_failures: AtomicU32,
}

impl ContestTimer {
    pub fn new(
        contest_id: u64,
        clock: Arc<ClockSyncEngine>,
        api: Arc<dyn TimeApi>,
        events: Arc<EventManager>,
        config: ContestTimerConfig,
        callbacks: TimerCallbacks,
    ) -> Self {
        let (state_tx, _) = watch::channel(TimerState::loading());
        Self {
            contest_id,
            clock,
            api,
            events,
            config,
            callbacks,
            inner: Mutex::new(TimerInner {
                current: TimerState::loading(),
                expired_notified: false,
            }),
            window: RwLock::new(None),
            state_tx,
            refresh_failures: AtomicU32::new(0),
        }
    }

    pub fn contest_id(&self) -> u64 {
        self.contest_id
    }

    /// 当前状态
    pub fn state(&self) -> TimerState {
        self.state_tx.borrow().clone()
    }

    /// 订阅状态变化
    pub fn subscribe_state(&self) -> watch::Receiver<TimerState> {
        self.state_tx.subscribe()
    }

    /// 最近一次获取到的比赛窗口
    pub fn window(&self) -> Option<ContestWindow> {
        self.window.read().clone()
    }

    /// 当前进度百分比
    pub fn progress_percent(&self) -> f64 {
        match self.window() {
            Some(window) => progress_percent(&self.state(), &window),
            None => 0.0,
        }
    }

    /// 连续拉取比赛窗口失败的次数
    pub fn refresh_failures(&self) -> u32 {
        self.refresh_failures.load(Ordering::SeqCst)
    }

    /// 本地 tick：用缓存窗口和同步后的当前时间重新计算
    ///
    /// 窗口尚未获取时保持 loading。
    pub fn tick(&self) -> TimerState {
        let mut inner = self.inner.lock();
        let window = self.window.read().clone();
        match window {
            Some(window) => {
                let next = evaluate(self.clock.now(), &window);
                self.apply(&mut inner, next)
            }
            None => inner.current.clone(),
        }
    }

    /// 从服务器重新拉取比赛窗口
    ///
    /// 成功时优先采用服务器计时块；失败时沿用上一次的窗口重新计算一次，并返回错误。
    pub async fn refresh_window(&self) -> Result<TimerState> {
        let result = self
            .api
            .fetch_contest_time(self.contest_id)
            .await
            .and_then(|response| {
                let window = ContestWindow::from_info(&response.contest)?;
                Ok((window, response.timing))
            });

        match result {
            Ok((window, timing)) => {
                let mut inner = self.inner.lock();
                self.refresh_failures.store(0, Ordering::SeqCst);
                *self.window.write() = Some(window.clone());

                let now = self.clock.now();
                let next = if TimerState::has_server_timing(&timing) {
                    TimerState::from_server_timing(&timing, now)
                } else {
                    evaluate(now, &window)
                };
                debug!(
                    "比赛 {} 窗口已刷新: {} ~ {}",
                    self.contest_id, window.start_time, window.end_time
                );
                Ok(self.apply(&mut inner, next))
            }
            Err(e) => {
                let failures = self.refresh_failures.fetch_add(1, Ordering::SeqCst) + 1;
                let has_window = self.window.read().is_some();
                warn!(
                    "⚠️ 比赛 {} 时间获取失败（连续 {} 次，{}）: {}",
                    self.contest_id,
                    failures,
                    if has_window { "沿用上次窗口" } else { "尚无窗口" },
                    e
                );
                self.tick();
                Err(e)
            }
        }
    }

    /// 应用一次计算结果并发出阶段变更通知；调用方持有 `inner`
    fn apply(&self, inner: &mut TimerInner, next: TimerState) -> TimerState {
        let previous = inner.current.status;
        if next.status.rank() < previous.rank() {
            debug!(
                "比赛 {} 忽略阶段回退: {} → {}",
                self.contest_id, previous, next.status
            );
            return inner.current.clone();
        }

        let transitions: Vec<(Phase, Phase)> = match (previous, next.status) {
            (from, to) if from == to => Vec::new(),
            // 一次计算跨过了整场比赛，补发中间的阶段
            (Phase::NotStarted, Phase::Ended) => vec![
                (Phase::NotStarted, Phase::InProgress),
                (Phase::InProgress, Phase::Ended),
            ],
            (from, to) => vec![(from, to)],
        };

        inner.current = next.clone();
        self.state_tx.send_replace(next.clone());

        let timestamp = next
            .last_update
            .map(|t| t.timestamp_millis())
            .unwrap_or_else(|| self.clock.now_ms());

        for (from, to) in transitions {
            info!("🔄 比赛 {} 阶段变更: {} → {}", self.contest_id, from, to);
            self.events.emit(event_builders::contest_status_changed(
                self.contest_id,
                from,
                to,
                timestamp,
            ));
            if let Some(callback) = &self.callbacks.on_status_change {
                callback(to);
            }

            if from == Phase::InProgress && to == Phase::Ended && !inner.expired_notified {
                inner.expired_notified = true;
                info!("⏰ 比赛 {} 时间到", self.contest_id);
                self.events
                    .emit(event_builders::contest_time_expired(self.contest_id, timestamp));
                if let Some(callback) = &self.callbacks.on_time_expired {
                    callback();
                }
            }
        }

        next
    }

    /// 启动本地 tick 与窗口刷新两个周期任务
    ///
    /// 两个任务各自持有 `token` 的子令牌，返回的句柄被丢弃时一并停止。
    pub fn start(self: &Arc<Self>, token: CancellationToken) -> ContestTimerHandle {
        let refresher = Arc::clone(self);
        let refresh = ScheduledTask::spawn(
            format!("contest-{}-refresh", self.contest_id),
            self.config.refresh_interval(),
            token.child_token(),
            move || {
                let timer = Arc::clone(&refresher);
                async move {
                    let _ = timer.refresh_window().await;
                }
            },
        );

        let ticker = Arc::clone(self);
        let tick = ScheduledTask::spawn(
            format!("contest-{}-tick", self.contest_id),
            self.config.tick_interval(),
            token.child_token(),
            move || {
                let timer = Arc::clone(&ticker);
                async move {
                    timer.tick();
                }
            },
        );

        ContestTimerHandle {
            timer: Arc::clone(self),
            token,
            tick: Some(tick),
            refresh: Some(refresh),
        }
    }
}

/// 运行中的计时器句柄，丢弃时停止全部周期任务
pub struct ContestTimerHandle {
    timer: Arc<ContestTimer>,
    token: CancellationToken,
    tick: Option<ScheduledTask>,
    refresh: Option<ScheduledTask>,
}

impl ContestTimerHandle {
    pub fn timer(&self) -> &Arc<ContestTimer> {
        &self.timer
    }

    pub fn contest_id(&self) -> u64 {
        self.timer.contest_id()
    }

    pub fn state(&self) -> TimerState {
        self.timer.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<TimerState> {
        self.timer.subscribe_state()
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 停止并等待周期任务退出
    pub async fn stop(mut self) {
        self.token.cancel();
        let tasks = [self.tick.take(), self.refresh.take()];
        for task in tasks.into_iter().flatten() {
            task.stop().await;
        }
        debug!("比赛 {} 计时器已停止", self.timer.contest_id());
    }
}

impl Drop for ContestTimerHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
