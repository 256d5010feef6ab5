//! 统一入口 - ContestClock
//!
//! 分层结构：
//! ```text
//! ContestClock
//!   ├── TimeFetchCoordinator (共享缓存 + 请求合并，整个进程一份)
//!   ├── ClockSyncEngine      (偏移量 + 熔断，定时重新同步)
//!   ├── ContestTimer × N     (每场比赛一个，由 watch_contest 创建)
//!   ├── EventManager         (事件广播)
//!   └── LifecycleManager     (前后台切换)
//! ```
//!
//! 所有周期任务挂在同一个根取消令牌下，`shutdown()` 一次性全部停止。

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::clock::{LocalClock, SystemLocalClock};
use crate::clock_sync::{ClockSyncEngine, SyncHealthSnapshot, SyncOutcome};
use crate::config::ContestClockConfig;
use crate::contest_timer::{ContestTimer, ContestTimerHandle, TimerCallbacks};
use crate::error::{ContestClockError, Result};
use crate::events::EventManager;
use crate::http_client::{HttpTimeApi, TimeApi};
use crate::lifecycle::{LifecycleHook, LifecycleManager};
use crate::scheduler::ScheduledTask;
use crate::time_fetch::TimeFetchCoordinator;
use crate::utils::TimeFormatter;
use crate::version::version_summary;

pub struct ContestClock {
    config: ContestClockConfig,
    api: Arc<dyn TimeApi>,
    coordinator: Arc<TimeFetchCoordinator>,
    engine: Arc<ClockSyncEngine>,
    events: Arc<EventManager>,
    formatter: TimeFormatter,
    lifecycle_manager: Arc<RwLock<LifecycleManager>>,
    root_token: CancellationToken,
    sync_task: Mutex<Option<ScheduledTask>>,
    shutting_down: AtomicBool,
}

impl ContestClock {
    /// 使用 HTTP 接口和系统时钟创建
    pub fn new(config: ContestClockConfig) -> Result<Self> {
        config.validate()?;
        let api = Arc::new(HttpTimeApi::new(&config)?);
        Self::with_parts(config, api, Arc::new(SystemLocalClock))
    }

    /// 使用自定义时间接口和本地时钟创建（测试、演示或自定义传输层）
    pub fn with_parts(
        config: ContestClockConfig,
        api: Arc<dyn TimeApi>,
        clock: Arc<dyn LocalClock>,
    ) -> Result<Self> {
        config.validate()?;
        info!("正在初始化 {}", version_summary());

        let formatter = TimeFormatter::from_offset_seconds(config.timezone_offset_seconds);
        info!("显示时区偏移: {} 秒", formatter.offset_seconds());

        let events = Arc::new(EventManager::new(config.event_capacity));
        let coordinator = TimeFetchCoordinator::new(
            Arc::clone(&api),
            Arc::clone(&clock),
            config.clock_sync.cache_ttl_ms,
        );
        let engine = Arc::new(ClockSyncEngine::new(
            Arc::clone(&coordinator),
            clock,
            config.server_time_url(),
            config.clock_sync.clone(),
            Arc::clone(&events),
        ));

        let mut lifecycle_manager = LifecycleManager::new();
        lifecycle_manager.register_hook(engine.clone());

        info!("✅ ContestClock 初始化完成: {}", config.server_time_url());

        Ok(Self {
            config,
            api,
            coordinator,
            engine,
            events,
            formatter,
            lifecycle_manager: Arc::new(RwLock::new(lifecycle_manager)),
            root_token: CancellationToken::new(),
            sync_task: Mutex::new(None),
            shutting_down: AtomicBool::new(false),
        })
    }

    fn check_running(&self) -> Result<()> {
        if self.is_shutting_down() {
            return Err(ContestClockError::ShuttingDown);
        }
        Ok(())
    }

    /// 启动定时同步（立即同步一次）；重复调用无副作用
    pub fn start(&self) -> Result<()> {
        self.check_running()?;
        let mut task = self.sync_task.lock();
        if task.is_none() {
            *task = Some(self.engine.start(self.root_token.child_token()));
        }
        Ok(())
    }

    /// 当前服务器时间（同步，永不失败）
    pub fn now(&self) -> DateTime<Utc> {
        self.engine.now()
    }

    pub fn now_ms(&self) -> i64 {
        self.engine.now_ms()
    }

    pub fn sync_health(&self) -> SyncHealthSnapshot {
        self.engine.sync_health()
    }

    /// 显式重新同步（熔断中也会尝试一次）
    pub async fn resync(&self) -> SyncOutcome {
        self.engine.request_resync().await
    }

    pub fn clock_sync(&self) -> &Arc<ClockSyncEngine> {
        &self.engine
    }

    pub fn coordinator(&self) -> &Arc<TimeFetchCoordinator> {
        &self.coordinator
    }

    pub fn events(&self) -> &Arc<EventManager> {
        &self.events
    }

    pub fn formatter(&self) -> &TimeFormatter {
        &self.formatter
    }

    pub fn config(&self) -> &ContestClockConfig {
        &self.config
    }

    /// 创建比赛计时器（不启动周期任务）
    pub fn contest_timer(&self, contest_id: u64, callbacks: TimerCallbacks) -> Arc<ContestTimer> {
        Arc::new(ContestTimer::new(
            contest_id,
            Arc::clone(&self.engine),
            Arc::clone(&self.api),
            Arc::clone(&self.events),
            self.config.contest_timer.clone(),
            callbacks,
        ))
    }

    /// 创建并启动比赛计时器
    ///
    /// 句柄被丢弃或 `shutdown()` 时计时器停止。
    pub fn watch_contest(
        &self,
        contest_id: u64,
        callbacks: TimerCallbacks,
    ) -> Result<ContestTimerHandle> {
        self.check_running()?;
        let timer = self.contest_timer(contest_id, callbacks);
        info!("开始跟踪比赛 {}", contest_id);
        Ok(timer.start(self.root_token.child_token()))
    }

    /// 注册生命周期回调 Hook
    pub async fn register_lifecycle_hook(&self, hook: Arc<dyn LifecycleHook>) -> Result<()> {
        self.check_running()?;
        self.lifecycle_manager.write().await.register_hook(hook);
        Ok(())
    }

    /// 宿主切换到后台（标签页隐藏、App 进入后台）
    pub async fn notify_background(&self) -> Result<()> {
        self.check_running()?;
        info!("🔄 切换到后台，触发生命周期事件");
        self.lifecycle_manager.read().await.notify_background().await
    }

    /// 宿主回到前台；时钟同步引擎会重新同步
    pub async fn notify_foreground(&self) -> Result<()> {
        self.check_running()?;
        info!("🔄 回到前台，触发生命周期事件");
        self.lifecycle_manager.read().await.notify_foreground().await
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// 停止定时同步和所有比赛计时器，清空共享缓存
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("正在关闭 ContestClock...");

        self.root_token.cancel();
        let task = self.sync_task.lock().take();
        if let Some(task) = task {
            task.stop().await;
        }
        self.coordinator.clear();

        info!("ContestClock 关闭完成");
    }
}

impl Drop for ContestClock {
    fn drop(&mut self) {
        self.root_token.cancel();
    }
}
