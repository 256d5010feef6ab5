/// SDK 错误类型
///
/// 需要 `Clone`：合并后的同一个在途请求，其结果要分发给所有等待者。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContestClockError {
    /// 传输层失败（连接失败、超时、读取响应失败）
    #[error("Network error: {0}")]
    Network(String),

    /// 服务端返回非 2xx 状态码
    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    /// 服务端数据无效（时间戳无法解析等）
    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Shutting down")]
    ShuttingDown,
}

impl ContestClockError {
    /// 是否属于网络类错误（传输失败或 HTTP 状态码失败）
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            ContestClockError::Network(_) | ContestClockError::HttpStatus { .. }
        )
    }
}

impl From<serde_json::Error> for ContestClockError {
    fn from(error: serde_json::Error) -> Self {
        ContestClockError::Json(error.to_string())
    }
}

impl From<reqwest::Error> for ContestClockError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            ContestClockError::InvalidData(error.to_string())
        } else if let Some(status) = error.status() {
            ContestClockError::HttpStatus {
                status: status.as_u16(),
                url: error.url().map(|u| u.to_string()).unwrap_or_default(),
            }
        } else {
            ContestClockError::Network(error.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, ContestClockError>;
