//! 单元测试用的脚本化时间接口

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::clock::{LocalClock, ManualClock};
use crate::error::{ContestClockError, Result};
use crate::http_client::{
    ContestInfo, ContestTimeResponse, ContestTiming, ServerTimeResponse, TimeApi,
};

/// 服务器时钟 = 本地时钟 + server_offset_ms；每次请求把本地时钟推进 round_trip_ms，
/// 服务器在往返中点取时间。
pub(crate) struct ScriptedTimeApi {
    clock: ManualClock,
    server_offset_ms: AtomicI64,
    round_trip_ms: AtomicI64,
    fixed_epoch_ms: Mutex<Option<i64>>,
    server_failures: AtomicUsize,
    server_calls: AtomicUsize,
    contest_calls: AtomicUsize,
    contest: Mutex<Option<(DateTime<Utc>, DateTime<Utc>)>>,
    contest_timing: Mutex<VecDeque<ContestTiming>>,
    contest_failures: AtomicUsize,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl ScriptedTimeApi {
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            server_offset_ms: AtomicI64::new(0),
            round_trip_ms: AtomicI64::new(0),
            fixed_epoch_ms: Mutex::new(None),
            server_failures: AtomicUsize::new(0),
            server_calls: AtomicUsize::new(0),
            contest_calls: AtomicUsize::new(0),
            contest: Mutex::new(None),
            contest_timing: Mutex::new(VecDeque::new()),
            contest_failures: AtomicUsize::new(0),
            gate: Mutex::new(None),
        }
    }

    pub fn set_server_offset_ms(&self, offset: i64) {
        self.server_offset_ms.store(offset, Ordering::SeqCst);
    }

    pub fn set_round_trip_ms(&self, rtt: i64) {
        self.round_trip_ms.store(rtt, Ordering::SeqCst);
    }

    pub fn set_fixed_epoch_ms(&self, epoch: Option<i64>) {
        *self.fixed_epoch_ms.lock() = epoch;
    }

    /// 接下来 n 次服务器时间请求失败
    pub fn fail_next(&self, n: usize) {
        self.server_failures.store(n, Ordering::SeqCst);
    }

    /// 接下来 n 次比赛时间请求失败
    pub fn fail_next_contest(&self, n: usize) {
        self.contest_failures.store(n, Ordering::SeqCst);
    }

    pub fn set_contest(&self, start: DateTime<Utc>, end: DateTime<Utc>) {
        *self.contest.lock() = Some((start, end));
    }

    /// 下一次比赛时间响应使用给定的计时块，而不是按服务器时钟计算
    pub fn push_contest_timing(&self, timing: ContestTiming) {
        self.contest_timing.lock().push_back(timing);
    }

    /// 让后续请求停在闸门处，直到测试放行
    pub fn gate(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock() = Some(gate.clone());
        gate
    }

    pub fn server_calls(&self) -> usize {
        self.server_calls.load(Ordering::SeqCst)
    }

    pub fn contest_calls(&self) -> usize {
        self.contest_calls.load(Ordering::SeqCst)
    }

    fn server_now_ms(&self) -> i64 {
        self.clock.now_ms() + self.server_offset_ms.load(Ordering::SeqCst)
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl TimeApi for ScriptedTimeApi {
    async fn fetch_server_time(&self, url: &str) -> Result<ServerTimeResponse> {
        self.server_calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let rtt = self.round_trip_ms.load(Ordering::SeqCst);
        self.clock.advance_ms(rtt / 2);
        let fixed = *self.fixed_epoch_ms.lock();
        let epoch_ms = fixed.unwrap_or_else(|| self.server_now_ms());
        self.clock.advance_ms(rtt - rtt / 2);

        if Self::take_failure(&self.server_failures) {
            return Err(ContestClockError::Network(format!("connection refused: {}", url)));
        }

        Ok(ServerTimeResponse {
            epoch_ms,
            iso: String::new(),
            timezone: "UTC".to_string(),
        })
    }

    async fn fetch_contest_time(&self, contest_id: u64) -> Result<ContestTimeResponse> {
        self.contest_calls.fetch_add(1, Ordering::SeqCst);

        if Self::take_failure(&self.contest_failures) {
            return Err(ContestClockError::HttpStatus {
                status: 502,
                url: format!("/contests/{}/time", contest_id),
            });
        }

        let (start, end) = (*self.contest.lock())
            .ok_or_else(|| ContestClockError::NotFound(format!("contest {}", contest_id)))?;

        let now_ms = self.server_now_ms();
        let timing = self.contest_timing.lock().pop_front().unwrap_or_else(|| {
            let start_ms = start.timestamp_millis();
            let end_ms = end.timestamp_millis();
            let running = now_ms >= start_ms && now_ms <= end_ms;
            ContestTiming {
                time_to_start_seconds: Some(((start_ms - now_ms).max(0)) / 1000),
                time_to_end_seconds: Some(((end_ms - now_ms).max(0)) / 1000),
                time_remaining_seconds: Some(if now_ms < start_ms {
                    (end_ms - start_ms) / 1000
                } else {
                    ((end_ms - now_ms).max(0)) / 1000
                }),
                is_accessible: now_ms >= start_ms,
                can_submit: running,
            }
        });

        Ok(ContestTimeResponse {
            server_time: ServerTimeResponse {
                epoch_ms: now_ms,
                iso: String::new(),
                timezone: "UTC".to_string(),
            },
            contest: ContestInfo {
                id: contest_id,
                name: format!("Contest {}", contest_id),
                status: String::new(),
                start_time: start,
                end_time: end,
                duration_seconds: (end - start).num_seconds(),
            },
            timing,
        })
    }
}
