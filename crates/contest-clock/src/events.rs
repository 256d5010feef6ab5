//! 事件系统模块
//!
//! 功能包括：
//! - 时钟同步成功/失败、熔断事件
//! - 比赛阶段变更事件
//! - 比赛时间到事件
//! - 事件广播和订阅机制
//!
//! 发布是同步的：同一次状态计算产生的事件按发生顺序依次发出，
//! 不依赖任何 UI 框架的重渲染时机。

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::contest_timer::Phase;

/// SDK 事件类型
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClockEvent {
    /// 时钟同步成功
    SyncSucceeded {
        offset_ms: i64,
        round_trip_ms: i64,
        timestamp: i64,
    },
    /// 时钟同步失败（沿用上一次的偏移量）
    SyncFailed {
        error: String,
        consecutive_failures: u32,
        timestamp: i64,
    },
    /// 连续失败达到阈值，停止自动同步
    CircuitOpened { failures: u32, timestamp: i64 },
    /// 比赛阶段变更
    ContestStatusChanged {
        contest_id: u64,
        old_status: Phase,
        new_status: Phase,
        timestamp: i64,
    },
    /// 比赛结束（进行中 → 已结束，每个计时器只发一次）
    ContestTimeExpired { contest_id: u64, timestamp: i64 },
}

impl ClockEvent {
    /// 获取事件类型名称
    pub fn event_type(&self) -> &'static str {
        match self {
            ClockEvent::SyncSucceeded { .. } => "sync_succeeded",
            ClockEvent::SyncFailed { .. } => "sync_failed",
            ClockEvent::CircuitOpened { .. } => "circuit_opened",
            ClockEvent::ContestStatusChanged { .. } => "contest_status_changed",
            ClockEvent::ContestTimeExpired { .. } => "contest_time_expired",
        }
    }

    /// 获取事件相关的比赛ID
    pub fn contest_id(&self) -> Option<u64> {
        match self {
            ClockEvent::ContestStatusChanged { contest_id, .. }
            | ClockEvent::ContestTimeExpired { contest_id, .. } => Some(*contest_id),
            _ => None,
        }
    }

    /// 获取事件时间戳（服务器时间，毫秒）
    pub fn timestamp(&self) -> i64 {
        match self {
            ClockEvent::SyncSucceeded { timestamp, .. }
            | ClockEvent::SyncFailed { timestamp, .. }
            | ClockEvent::CircuitOpened { timestamp, .. }
            | ClockEvent::ContestStatusChanged { timestamp, .. }
            | ClockEvent::ContestTimeExpired { timestamp, .. } => *timestamp,
        }
    }
}

/// 事件过滤器
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// 事件类型过滤
    pub event_types: Option<Vec<String>>,
    /// 比赛ID过滤
    pub contest_ids: Option<Vec<u64>>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event_types(mut self, event_types: Vec<String>) -> Self {
        self.event_types = Some(event_types);
        self
    }

    pub fn with_contest_ids(mut self, contest_ids: Vec<u64>) -> Self {
        self.contest_ids = Some(contest_ids);
        self
    }

    /// 检查事件是否匹配过滤器
    pub fn matches(&self, event: &ClockEvent) -> bool {
        if let Some(ref types) = self.event_types {
            if !types.iter().any(|t| t == event.event_type()) {
                return false;
            }
        }

        if let Some(ref ids) = self.contest_ids {
            match event.contest_id() {
                Some(id) if ids.contains(&id) => {}
                _ => return false,
            }
        }

        true
    }
}

/// 事件监听器类型
pub type EventListener = Arc<dyn Fn(&ClockEvent) + Send + Sync>;

/// 事件统计信息
#[derive(Debug, Clone, Default)]
pub struct EventStats {
    /// 总事件数
    pub total_events: u64,
    /// 按类型分组的事件数
    pub events_by_type: HashMap<String, u64>,
    /// 监听器数量
    pub listener_count: usize,
    /// 最后事件时间
    pub last_event_time: Option<i64>,
}

/// 事件管理器
pub struct EventManager {
    /// 广播发送器
    sender: broadcast::Sender<ClockEvent>,
    /// 事件监听器映射（"*" 表示全部事件）
    listeners: RwLock<HashMap<String, Vec<EventListener>>>,
    /// 事件统计
    stats: RwLock<EventStats>,
}

impl EventManager {
    /// 创建新的事件管理器
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);

        Self {
            sender,
            listeners: RwLock::new(HashMap::new()),
            stats: RwLock::new(EventStats::default()),
        }
    }

    /// 发布事件
    pub fn emit(&self, event: ClockEvent) {
        debug!("Emitting event: {}", event.event_type());

        {
            let mut stats = self.stats.write();
            stats.total_events += 1;
            *stats
                .events_by_type
                .entry(event.event_type().to_string())
                .or_insert(0) += 1;
            stats.last_event_time = Some(event.timestamp());
        }

        // 无订阅者时 send 会失败，属正常场景
        if let Err(e) = self.sender.send(event.clone()) {
            debug!("Failed to broadcast event (no active receivers): {}", e);
        }

        // 先复制出监听器再调用，监听器内部可以再注册监听器
        let to_call: Vec<EventListener> = {
            let listeners = self.listeners.read();
            listeners
                .get(event.event_type())
                .into_iter()
                .chain(listeners.get("*"))
                .flatten()
                .cloned()
                .collect()
        };
        for listener in to_call {
            listener(&event);
        }
    }

    /// 订阅事件
    pub fn subscribe(&self) -> broadcast::Receiver<ClockEvent> {
        self.sender.subscribe()
    }

    /// 订阅特定类型的事件
    pub fn subscribe_filtered(&self, filter: EventFilter) -> FilteredEventReceiver {
        FilteredEventReceiver::new(self.sender.subscribe(), filter)
    }

    /// 添加事件监听器
    pub fn add_listener<F>(&self, event_type: &str, listener: F)
    where
        F: Fn(&ClockEvent) + Send + Sync + 'static,
    {
        let count = {
            let mut listeners = self.listeners.write();
            listeners
                .entry(event_type.to_string())
                .or_default()
                .push(Arc::new(listener));
            listeners.values().map(|v| v.len()).sum()
        };
        self.stats.write().listener_count = count;

        info!("Added listener for event type: {}", event_type);
    }

    /// 移除所有监听器
    pub fn clear_listeners(&self) {
        self.listeners.write().clear();
        self.stats.write().listener_count = 0;

        info!("Cleared all event listeners");
    }

    /// 获取事件统计
    pub fn get_stats(&self) -> EventStats {
        self.stats.read().clone()
    }

    /// 获取活跃订阅者数量
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// 过滤事件接收器
pub struct FilteredEventReceiver {
    receiver: broadcast::Receiver<ClockEvent>,
    filter: EventFilter,
}

impl FilteredEventReceiver {
    pub fn new(receiver: broadcast::Receiver<ClockEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// 接收下一个匹配的事件
    pub async fn recv(&mut self) -> Result<ClockEvent, broadcast::error::RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// 尝试接收事件（非阻塞）
    pub fn try_recv(&mut self) -> Result<ClockEvent, broadcast::error::TryRecvError> {
        loop {
            let event = self.receiver.try_recv()?;
            if self.filter.matches(&event) {
                return Ok(event);
            }
        }
    }
}

/// 事件生成器 - 辅助函数
pub mod event_builders {
    use super::*;

    pub fn sync_succeeded(offset_ms: i64, round_trip_ms: i64, timestamp: i64) -> ClockEvent {
        ClockEvent::SyncSucceeded {
            offset_ms,
            round_trip_ms,
            timestamp,
        }
    }

    pub fn sync_failed(error: String, consecutive_failures: u32, timestamp: i64) -> ClockEvent {
        ClockEvent::SyncFailed {
            error,
            consecutive_failures,
            timestamp,
        }
    }

    pub fn circuit_opened(failures: u32, timestamp: i64) -> ClockEvent {
        ClockEvent::CircuitOpened { failures, timestamp }
    }

    pub fn contest_status_changed(
        contest_id: u64,
        old_status: Phase,
        new_status: Phase,
        timestamp: i64,
    ) -> ClockEvent {
        ClockEvent::ContestStatusChanged {
            contest_id,
            old_status,
            new_status,
            timestamp,
        }
    }

    pub fn contest_time_expired(contest_id: u64, timestamp: i64) -> ClockEvent {
        ClockEvent::ContestTimeExpired {
            contest_id,
            timestamp,
        }
    }
}
