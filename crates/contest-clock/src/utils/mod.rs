//! 工具模块

pub mod time;

pub use time::{format_countdown, format_hms, TimeFormatter, TimezoneConfig};
