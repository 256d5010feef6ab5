//! 比赛倒计时演示
//!
//! 使用手动时钟和进程内的模拟时间接口，不依赖真实后端：
//! 服务器比本地快 90 秒，比赛在服务器时间 3 秒后开始，持续 5 秒。

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use contest_clock::{
    format_hms, ClockEvent, ContestClock, ContestClockConfig, ContestClockError, ContestInfo,
    ContestTimeResponse, ContestTiming, LocalClock, ManualClock, ServerTimeResponse, TimeApi,
    TimerCallbacks,
};
use std::sync::Arc;

const SERVER_AHEAD_MS: i64 = 90_000;

struct DemoTimeApi {
    clock: ManualClock,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl DemoTimeApi {
    fn server_now(&self) -> ServerTimeResponse {
        let epoch_ms = self.clock.now_ms() + SERVER_AHEAD_MS;
        ServerTimeResponse {
            epoch_ms,
            iso: String::new(),
            timezone: "UTC".to_string(),
        }
    }
}

#[async_trait]
impl TimeApi for DemoTimeApi {
    async fn fetch_server_time(&self, _url: &str) -> contest_clock::Result<ServerTimeResponse> {
        // 模拟 80ms 往返
        self.clock.advance_ms(40);
        let response = self.server_now();
        self.clock.advance_ms(40);
        Ok(response)
    }

    async fn fetch_contest_time(
        &self,
        contest_id: u64,
    ) -> contest_clock::Result<ContestTimeResponse> {
        if contest_id != 1 {
            return Err(ContestClockError::NotFound(format!("contest {}", contest_id)));
        }
        Ok(ContestTimeResponse {
            server_time: self.server_now(),
            contest: ContestInfo {
                id: contest_id,
                name: "Demo Round".to_string(),
                status: "scheduled".to_string(),
                start_time: self.start,
                end_time: self.end,
                duration_seconds: (self.end - self.start).num_seconds(),
            },
            // 不带计时块，由本地按窗口计算
            timing: ContestTiming::default(),
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("\n==============================================");
    println!("⏱️ 比赛倒计时演示");
    println!("==============================================\n");

    let clock = ManualClock::new(Utc::now().timestamp_millis());
    let server_now = Utc::now() + ChronoDuration::milliseconds(SERVER_AHEAD_MS);
    let api = Arc::new(DemoTimeApi {
        clock: clock.clone(),
        start: server_now + ChronoDuration::seconds(3),
        end: server_now + ChronoDuration::seconds(8),
    });

    let config = ContestClockConfig::builder()
        .base_url("https://judge.example.com/api")
        .timezone_offset_seconds(Some(8 * 3600))
        .build();
    let sdk = ContestClock::with_parts(config, api, Arc::new(clock.clone()))?;

    sdk.events().add_listener("*", |event: &ClockEvent| {
        println!("  📣 事件: {}", event.event_type());
    });

    let outcome = sdk.resync().await;
    println!("同步结果: synced={}", outcome.is_synced());
    println!("{}\n", sdk.sync_health().summary());

    let callbacks = TimerCallbacks::new()
        .on_status_change(|phase| println!("  🔄 阶段变更 → {}", phase))
        .on_time_expired(|| println!("  ⏰ 比赛时间到"));
    let timer = sdk.contest_timer(1, callbacks);
    timer.refresh_window().await?;

    for _ in 0..10 {
        clock.advance_ms(1_000);
        let state = timer.tick();
        let countdown = state
            .time_to_start_seconds
            .or(state.time_remaining_seconds)
            .unwrap_or(0);
        println!(
            "[{}] {:<12} {}  进度 {:>5.1}%",
            sdk.formatter().format_time(sdk.now_ms()),
            state.status.as_str(),
            format_hms(countdown),
            timer.progress_percent()
        );
    }

    sdk.shutdown().await;

    println!("\n==============================================");
    println!("✅ 演示完成");
    println!("==============================================\n");
    Ok(())
}
