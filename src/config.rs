use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::discovery::ServiceAttr;
use crate::error::{Result, WatchError};
use crate::retry::RetryConfig;

/// 默认服务根路径
pub const DEFAULT_SERVICE_ROOT: &str = "/gxregistry";

/// 默认事件通道容量
pub const DEFAULT_EVENT_CHANNEL_SIZE: usize = 32;

/// 默认停止等待时长
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub registry: RegistryConfig,
    pub watch: WatchOptions,
    pub log: LogConfig,
}

/// 协调服务后端
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    #[default]
    Memory,
    Etcd,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub backend: BackendType,
    pub endpoints: Vec<String>,
    /// 服务注册根路径
    pub root: String,
    /// 临时节点租约（秒）
    pub ttl: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::Memory,
            endpoints: vec!["http://127.0.0.1:2379".to_string()],
            root: DEFAULT_SERVICE_ROOT.to_string(),
            ttl: 10,
        }
    }
}

impl RegistryConfig {
    pub fn with_backend(mut self, backend: BackendType) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_endpoints(mut self, endpoints: Vec<String>) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_ttl(mut self, ttl: u64) -> Self {
        self.ttl = ttl.max(1);
        self
    }
}

/// watcher 选项
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchOptions {
    /// 监听的根路径
    pub root: String,
    /// 服务过滤条件，空字段不参与匹配
    pub filter: ServiceAttr,
    /// 事件通道容量
    pub event_channel_size: usize,
    /// `stop` 等待监听任务退出的最长时长（毫秒）
    pub shutdown_timeout_ms: u64,
    pub retry: RetryConfig,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            root: DEFAULT_SERVICE_ROOT.to_string(),
            filter: ServiceAttr::default(),
            event_channel_size: DEFAULT_EVENT_CHANNEL_SIZE,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT.as_millis() as u64,
            retry: RetryConfig::default(),
        }
    }
}

impl WatchOptions {
    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_filter(mut self, filter: ServiceAttr) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_event_channel_size(mut self, size: usize) -> Self {
        self.event_channel_size = size.max(1);
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// 日志级别过滤，`RUST_LOG` 优先
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl WatcherConfig {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: WatcherConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !self.watch.root.starts_with('/') {
            return Err(WatchError::config(format!(
                "watch.root must be absolute: {}",
                self.watch.root
            )));
        }
        if self.watch.event_channel_size == 0 {
            return Err(WatchError::config("watch.event_channel_size must be positive"));
        }
        if self.registry.backend == BackendType::Etcd && self.registry.endpoints.is_empty() {
            return Err(WatchError::config("registry.endpoints is empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::BackoffStrategy;

    #[test]
    fn test_defaults() {
        let config = WatcherConfig::default();
        assert_eq!(config.watch.root, "/gxregistry");
        assert_eq!(config.watch.event_channel_size, 32);
        assert_eq!(config.watch.shutdown_timeout(), Duration::from_secs(5));
        assert_eq!(config.registry.backend, BackendType::Memory);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_from_toml_str() {
        let config = WatcherConfig::from_toml_str(
            r#"
            [registry]
            backend = "etcd"
            endpoints = ["http://10.0.0.1:2379"]
            root = "/services"

            [watch]
            root = "/services"
            event_channel_size = 8

            [watch.filter]
            service = "order"
            group = "prod"

            [watch.retry]
            strategy = "exponential"
            base_delay_ms = 100

            [log]
            level = "debug"
            json = true
            "#,
        )
        .unwrap();

        assert_eq!(config.registry.backend, BackendType::Etcd);
        assert_eq!(config.registry.ttl, 10);
        assert_eq!(config.watch.root, "/services");
        assert_eq!(config.watch.event_channel_size, 8);
        assert_eq!(config.watch.filter.service, "order");
        assert_eq!(config.watch.filter.group, "prod");
        assert_eq!(config.watch.retry.strategy, BackoffStrategy::Exponential);
        assert_eq!(config.watch.retry.base_delay_ms, 100);
        assert!(config.log.json);
    }

    #[test]
    fn test_invalid_config() {
        let err = WatcherConfig::from_toml_str("[watch]\nroot = \"relative\"").unwrap_err();
        assert!(matches!(err, WatchError::Config(_)));

        let err = WatcherConfig::from_toml_str("[watch]\nevent_channel_size = 0").unwrap_err();
        assert!(matches!(err, WatchError::Config(_)));

        let err = WatcherConfig::from_toml_str("[watch\n").unwrap_err();
        assert!(matches!(err, WatchError::Config(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = WatcherConfig::load_from_file("/nonexistent/watcher.toml").unwrap_err();
        assert!(matches!(err, WatchError::Io(_)));
    }
}
