//! 可取消的周期任务
//!
//! 每个周期任务绑定一个 [`CancellationToken`]，[`ScheduledTask`] 被丢弃时自动取消，
//! 保证计时器释放后不会留下后台循环。首次执行在启动时立即进行。

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// 周期任务句柄
pub struct ScheduledTask {
    name: String,
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ScheduledTask {
    /// 启动周期任务
    ///
    /// 必须在 tokio 运行时内调用。`token` 可以是某个父令牌的 `child_token()`，
    /// 父令牌取消时任务一并停止。
    pub fn spawn<F, Fut>(
        name: impl Into<String>,
        period: Duration,
        token: CancellationToken,
        mut job: F,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let task_name = name.clone();
        let task_token = token.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = task_token.cancelled() => break,
                    _ = interval.tick() => {}
                }

                tokio::select! {
                    biased;
                    _ = task_token.cancelled() => break,
                    _ = job() => {}
                }
            }

            debug!("周期任务已停止: {}", task_name);
        });

        info!("周期任务已启动: {} (间隔 {:?})", name, period);

        Self {
            name,
            token,
            handle: Some(handle),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 取消任务（不等待退出）
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// 取消并等待任务退出
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
