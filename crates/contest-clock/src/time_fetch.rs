//! 服务器时间拉取协调器
//!
//! 进程内唯一的一份"样本缓存 + 在途请求表"，按端点 URL 分组：
//! - 缓存有效期内直接返回外推后的样本，不发请求
//! - 同一端点已有在途请求时，后来者等待同一个请求，所有等待者拿到同一个结果
//! - 成功时整体替换缓存条目；失败不写缓存
//!
//! 协调器以 `Arc` 注入到各个 [`crate::ClockSyncEngine`]，不使用全局静态变量。

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clock::LocalClock;
use crate::error::{ContestClockError, Result};
use crate::http_client::TimeApi;

/// 一次成功同步得到的时间样本，创建后不再修改
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSample {
    /// 服务器时间（UTC 毫秒）
    pub server_epoch_ms: i64,
    /// 收到响应时的本地时间（UTC 毫秒）
    pub observed_at_local_ms: i64,
    /// 往返时延（毫秒）
    pub round_trip_ms: i64,
}

/// 缓存条目
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedSample {
    pub sample: TimeSample,
    /// 写入缓存时的本地时间
    pub stored_at_ms: i64,
}

impl CachedSample {
    pub fn is_valid(&self, now_ms: i64, ttl_ms: i64) -> bool {
        now_ms >= self.stored_at_ms && now_ms - self.stored_at_ms < ttl_ms
    }

    /// 按本地流逝时间外推服务器时间
    pub fn extrapolate(&self, now_ms: i64) -> TimeSample {
        TimeSample {
            server_epoch_ms: self.sample.server_epoch_ms + (now_ms - self.stored_at_ms),
            observed_at_local_ms: now_ms,
            round_trip_ms: 0,
        }
    }
}

type InFlight = Shared<BoxFuture<'static, Result<TimeSample>>>;

#[derive(Default)]
struct CoordinatorState {
    cache: HashMap<String, CachedSample>,
    in_flight: HashMap<String, InFlight>,
    stats: CoordinatorStats,
}

/// 协调器统计信息
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    /// 实际发出的网络请求数
    pub network_requests: u64,
    /// 缓存命中次数
    pub cache_hits: u64,
    /// 合并到在途请求的次数
    pub coalesced_waits: u64,
    /// 网络请求失败次数
    pub failures: u64,
}

/// 服务器时间拉取协调器
pub struct TimeFetchCoordinator {
    api: Arc<dyn TimeApi>,
    clock: Arc<dyn LocalClock>,
    cache_ttl_ms: i64,
    state: Arc<Mutex<CoordinatorState>>,
}

impl TimeFetchCoordinator {
    /// 创建协调器
    ///
    /// 一个进程只应创建一个实例，并共享给所有同步引擎。
    pub fn new(api: Arc<dyn TimeApi>, clock: Arc<dyn LocalClock>, cache_ttl_ms: i64) -> Arc<Self> {
        Arc::new(Self {
            api,
            clock,
            cache_ttl_ms,
            state: Arc::new(Mutex::new(CoordinatorState::default())),
        })
    }

    /// 拉取服务器时间
    ///
    /// 命中缓存或合并到在途请求时不会产生新的网络请求。
    pub async fn fetch_server_time(&self, url: &str) -> Result<TimeSample> {
        let request = {
            let mut state = self.state.lock();
            let now = self.clock.now_ms();

            if let Some(cached) = state.cache.get(url).copied() {
                if cached.is_valid(now, self.cache_ttl_ms) {
                    state.stats.cache_hits += 1;
                    debug!("时间样本命中缓存: url={}, age={}ms", url, now - cached.stored_at_ms);
                    return Ok(cached.extrapolate(now));
                }
            }

            if let Some(in_flight) = state.in_flight.get(url).cloned() {
                state.stats.coalesced_waits += 1;
                debug!("合并到在途时间请求: url={}", url);
                in_flight
            } else {
                state.stats.network_requests += 1;
                let request = self.start_request(url.to_string());
                state.in_flight.insert(url.to_string(), request.clone());
                request
            }
        };

        request.await
    }

    /// 发起请求；完成时（成功或失败）由请求自身清理在途标记，只执行一次
    fn start_request(&self, url: String) -> InFlight {
        let api = Arc::clone(&self.api);
        let clock = Arc::clone(&self.clock);
        let state = Arc::clone(&self.state);

        async move {
            let t0 = clock.now_ms();
            let result = api.fetch_server_time(&url).await;
            let t1 = clock.now_ms();

            let result = result.and_then(|response| {
                if response.epoch_ms <= 0 {
                    return Err(ContestClockError::InvalidData(format!(
                        "服务器时间无效: epoch_ms={}",
                        response.epoch_ms
                    )));
                }
                Ok(TimeSample {
                    server_epoch_ms: response.epoch_ms,
                    observed_at_local_ms: t1,
                    round_trip_ms: (t1 - t0).max(0),
                })
            });

            let mut state = state.lock();
            state.in_flight.remove(&url);
            match &result {
                Ok(sample) => {
                    state.cache.insert(
                        url.clone(),
                        CachedSample {
                            sample: *sample,
                            stored_at_ms: t1,
                        },
                    );
                    debug!("时间样本已缓存: url={}, rtt={}ms", url, sample.round_trip_ms);
                }
                Err(e) => {
                    state.stats.failures += 1;
                    warn!("⚠️ 拉取服务器时间失败: url={}, error={}", url, e);
                }
            }
            result
        }
        .boxed()
        .shared()
    }

    /// 读取缓存条目（不论是否过期）
    pub fn cached(&self, url: &str) -> Option<CachedSample> {
        self.state.lock().cache.get(url).copied()
    }

    /// 端点是否有在途请求
    pub fn is_in_flight(&self, url: &str) -> bool {
        self.state.lock().in_flight.contains_key(url)
    }

    pub fn stats(&self) -> CoordinatorStats {
        self.state.lock().stats.clone()
    }

    /// 清空缓存（关闭 SDK 时调用）；在途请求照常完成
    pub fn clear(&self) {
        let mut state = self.state.lock();
        let count = state.cache.len();
        state.cache.clear();
        info!("时间样本缓存已清空: {} 个端点", count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::test_support::ScriptedTimeApi;

    const URL: &str = "http://judge.test/contests/time";
    const T0: i64 = 1_704_103_200_000;

    fn setup() -> (ManualClock, Arc<ScriptedTimeApi>, Arc<TimeFetchCoordinator>) {
        let clock = ManualClock::new(T0);
        let api = Arc::new(ScriptedTimeApi::new(clock.clone()));
        let coordinator = TimeFetchCoordinator::new(api.clone(), Arc::new(clock.clone()), 10_000);
        (clock, api, coordinator)
    }

    #[tokio::test]
    async fn test_fetch_stores_sample_and_measures_rtt() {
        let (clock, api, coordinator) = setup();
        api.set_server_offset_ms(2_000);
        api.set_round_trip_ms(100);

        let sample = coordinator.fetch_server_time(URL).await.unwrap();
        assert_eq!(sample.round_trip_ms, 100);
        assert_eq!(sample.observed_at_local_ms, T0 + 100);
        // 服务器在往返中点采样
        assert_eq!(sample.server_epoch_ms, T0 + 50 + 2_000);
        assert_eq!(clock.now_ms(), T0 + 100);

        let cached = coordinator.cached(URL).unwrap();
        assert_eq!(cached.sample, sample);
        assert!(!coordinator.is_in_flight(URL));
    }

    #[tokio::test]
    async fn test_cache_hit_extrapolates_without_request() {
        let (clock, api, coordinator) = setup();
        let first = coordinator.fetch_server_time(URL).await.unwrap();

        clock.advance_ms(3_000);
        let second = coordinator.fetch_server_time(URL).await.unwrap();

        assert_eq!(api.server_calls(), 1);
        assert_eq!(second.server_epoch_ms, first.server_epoch_ms + 3_000);
        assert_eq!(second.round_trip_ms, 0);
        assert_eq!(coordinator.stats().cache_hits, 1);
    }

    #[tokio::test]
    async fn test_expired_cache_triggers_new_request() {
        let (clock, api, coordinator) = setup();
        coordinator.fetch_server_time(URL).await.unwrap();

        clock.advance_ms(10_000);
        coordinator.fetch_server_time(URL).await.unwrap();
        assert_eq!(api.server_calls(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_fetches_share_one_request() {
        let (_clock, api, coordinator) = setup();
        let gate = api.gate();

        let release = async {
            tokio::task::yield_now().await;
            gate.add_permits(1);
        };
        let (a, b, _) = tokio::join!(
            coordinator.fetch_server_time(URL),
            coordinator.fetch_server_time(URL),
            release
        );

        assert_eq!(api.server_calls(), 1);
        assert_eq!(a.unwrap(), b.unwrap());
        let stats = coordinator.stats();
        assert_eq!(stats.network_requests, 1);
        assert_eq!(stats.coalesced_waits, 1);
        assert!(!coordinator.is_in_flight(URL));
    }

    #[tokio::test]
    async fn test_failure_shared_by_waiters_and_not_cached() {
        let (_clock, api, coordinator) = setup();
        api.fail_next(1);
        let gate = api.gate();

        let release = async {
            tokio::task::yield_now().await;
            gate.add_permits(1);
        };
        let (a, b, _) = tokio::join!(
            coordinator.fetch_server_time(URL),
            coordinator.fetch_server_time(URL),
            release
        );

        assert!(a.unwrap_err().is_network());
        assert!(b.unwrap_err().is_network());
        assert_eq!(api.server_calls(), 1);
        assert!(coordinator.cached(URL).is_none());
        assert!(!coordinator.is_in_flight(URL));
        assert_eq!(coordinator.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_endpoints_are_cached_separately() {
        let (_clock, api, coordinator) = setup();
        coordinator.fetch_server_time(URL).await.unwrap();
        coordinator.fetch_server_time("http://other.test/contests/time").await.unwrap();
        assert_eq!(api.server_calls(), 2);
    }

    #[tokio::test]
    async fn test_invalid_epoch_rejected() {
        let (_clock, api, coordinator) = setup();
        api.set_fixed_epoch_ms(Some(0));
        let err = coordinator.fetch_server_time(URL).await.unwrap_err();
        assert!(matches!(err, ContestClockError::InvalidData(_)));
        assert!(coordinator.cached(URL).is_none());
    }

    #[tokio::test]
    async fn test_clear_drops_cache() {
        let (_clock, api, coordinator) = setup();
        coordinator.fetch_server_time(URL).await.unwrap();
        coordinator.clear();
        coordinator.fetch_server_time(URL).await.unwrap();
        assert_eq!(api.server_calls(), 2);
    }
}
