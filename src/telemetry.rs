//! 日志初始化

use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;
use crate::error::{Result, WatchError};

/// 安装全局 tracing subscriber
///
/// `RUST_LOG` 优先于配置中的级别；已经安装过 subscriber 时返回错误。
pub fn init_tracing(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| WatchError::config(format!("invalid log level {}: {}", config.level, e)))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| WatchError::config(format!("tracing subscriber: {}", e)))
}
