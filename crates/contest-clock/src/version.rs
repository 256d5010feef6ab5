//! SDK 版本与构建元信息
//!
//! - **SDK Version** → Cargo.toml（唯一权威源）
//! - **Build Time** → build.rs 中由 vergen 生成

/// SDK semver，来自 Cargo.toml
///
/// 禁止手写版本号，必须用 `env!("CARGO_PKG_VERSION")` 与 Cargo.toml 保持同步。
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// build time（由 vergen 在 build.rs 中生成）
pub const BUILD_TIME: &str = env!("VERGEN_BUILD_TIMESTAMP");

/// 版本摘要，用于启动日志
pub fn version_summary() -> String {
    format!("contest-clock {} (built {})", SDK_VERSION, BUILD_TIME)
}
