//! HTTP 客户端模块 - 服务器时间与比赛时间接口
//!
//! 只消费后端的两个只读接口：
//! - `GET {base}/contests/time`
//! - `GET {base}/contests/{id}/time`

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::ContestClockConfig;
use crate::error::{ContestClockError, Result};

/// 服务器当前时间（`GET /contests/time` 的响应，也嵌在比赛时间响应里）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerTimeResponse {
    pub epoch_ms: i64,
    #[serde(default)]
    pub iso: String,
    #[serde(default)]
    pub timezone: String,
}

/// 比赛基础信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContestInfo {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(deserialize_with = "deserialize_iso_utc")]
    pub start_time: DateTime<Utc>,
    #[serde(deserialize_with = "deserialize_iso_utc")]
    pub end_time: DateTime<Utc>,
    pub duration_seconds: i64,
}

/// 服务端按其时钟算好的计时字段
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContestTiming {
    #[serde(default)]
    pub time_to_start_seconds: Option<i64>,
    #[serde(default)]
    pub time_to_end_seconds: Option<i64>,
    #[serde(default)]
    pub time_remaining_seconds: Option<i64>,
    #[serde(default)]
    pub is_accessible: bool,
    #[serde(default)]
    pub can_submit: bool,
}

/// `GET /contests/{id}/time` 的响应
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContestTimeResponse {
    pub server_time: ServerTimeResponse,
    pub contest: ContestInfo,
    #[serde(default)]
    pub timing: ContestTiming,
}

/// 解析 ISO 8601 时间；不带时区的时间按 UTC 处理
fn deserialize_iso_utc<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_iso_utc(&raw).map_err(serde::de::Error::custom)
}

pub(crate) fn parse_iso_utc(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| ContestClockError::InvalidData(format!("无法解析时间 {}: {}", raw, e)))
}

/// 时间接口
///
/// 生产环境用 [`HttpTimeApi`]，测试里换成脚本化实现。
#[async_trait]
pub trait TimeApi: Send + Sync {
    /// 拉取服务器当前时间
    async fn fetch_server_time(&self, url: &str) -> Result<ServerTimeResponse>;

    /// 拉取某场比赛的时间窗口与服务端计时
    async fn fetch_contest_time(&self, contest_id: u64) -> Result<ContestTimeResponse>;
}

/// 基于 reqwest 的时间接口实现
pub struct HttpTimeApi {
    client: Client,
    config: ContestClockConfig,
}

impl HttpTimeApi {
    /// 创建新的 HTTP 客户端
    pub fn new(config: &ContestClockConfig) -> Result<Self> {
        let mut builder = Client::builder();

        if let Some(timeout) = config.http_client.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(timeout));
        }

        if let Some(timeout) = config.http_client.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(timeout));
        }

        let client = builder
            .build()
            .map_err(|e| ContestClockError::Config(format!("创建 HTTP 客户端失败: {}", e)))?;

        info!("✅ HTTP 客户端已创建 (base_url: {})", config.base_url);

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!("⚠️ 请求失败，HTTP 状态码: {}, url: {}", status, url);
            return Err(ContestClockError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl TimeApi for HttpTimeApi {
    async fn fetch_server_time(&self, url: &str) -> Result<ServerTimeResponse> {
        self.get_json(url).await
    }

    async fn fetch_contest_time(&self, contest_id: u64) -> Result<ContestTimeResponse> {
        let url = self.config.contest_time_url(contest_id);
        self.get_json(&url).await
    }
}
