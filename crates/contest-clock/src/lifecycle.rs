//! SDK 生命周期管理
//!
//! 管理宿主前后台切换（浏览器标签页隐藏/显示、App 前后台），统一触发各模块的状态切换。
//! 挂起期间本地时钟可能漂移或被系统校正，回到前台时时钟同步引擎会重新同步。

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// 生命周期回调 Hook
///
/// 各模块通过实现此 trait 来响应生命周期变化
#[async_trait]
pub trait LifecycleHook: Send + Sync {
    /// 切换到后台时调用
    async fn on_background(&self) -> Result<()>;

    /// 切换到前台时调用
    async fn on_foreground(&self) -> Result<()>;
}

/// 生命周期管理器
#[derive(Default)]
pub struct LifecycleManager {
    hooks: Vec<Arc<dyn LifecycleHook>>,
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    /// 获取已注册的 Hook 数量
    pub fn hook_count(&self) -> usize {
        self.hooks.len()
    }

    /// 注册生命周期回调 Hook
    pub fn register_hook(&mut self, hook: Arc<dyn LifecycleHook>) {
        self.hooks.push(hook);
        info!("✅ 生命周期 Hook 已注册: 当前共 {} 个", self.hooks.len());
    }

    /// 通知所有 Hook：切换到后台
    ///
    /// 按注册顺序执行，某个 Hook 失败时记录错误并继续执行其他 Hook，最后返回第一个错误
    pub async fn notify_background(&self) -> Result<()> {
        info!("🔄 通知所有模块：切换到后台");

        let mut first_error = None;
        for (index, hook) in self.hooks.iter().enumerate() {
            if let Err(e) = hook.on_background().await {
                warn!("⚠️ Hook #{} 后台切换失败: {}", index, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// 通知所有 Hook：切换到前台
    ///
    /// 按注册顺序执行，某个 Hook 失败时记录错误并继续执行其他 Hook，最后返回第一个错误
    pub async fn notify_foreground(&self) -> Result<()> {
        info!("🔄 通知所有模块：切换到前台");

        let mut first_error = None;
        for (index, hook) in self.hooks.iter().enumerate() {
            if let Err(e) = hook.on_foreground().await {
                warn!("⚠️ Hook #{} 前台切换失败: {}", index, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
