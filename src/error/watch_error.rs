//! 监听器统一错误类型

use super::code::ErrorCode;
use thiserror::Error;

/// 协调服务客户端错误
///
/// 由 `CoordinationClient` 的实现返回，区分瞬时错误（会话抖动）和结构性错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinationError {
    /// 与协调服务的连接已断开
    #[error("连接断开")]
    ConnectionLoss,

    /// 会话已过期
    #[error("会话已过期")]
    SessionExpired,

    /// 请求超时
    #[error("请求超时")]
    Timeout,

    /// 节点不存在
    #[error("节点不存在: {0}")]
    NoNode(String),

    /// 节点已存在
    #[error("节点已存在: {0}")]
    NodeExists(String),

    /// 节点下仍有子节点
    #[error("节点非空: {0}")]
    NotEmpty(String),

    /// 客户端已关闭
    #[error("客户端已关闭")]
    Closed,

    /// 路径格式错误
    #[error("路径格式错误: {0}")]
    InvalidPath(String),

    /// 后端返回的其他错误
    #[error("后端错误: {0}")]
    Backend(String),
}

impl CoordinationError {
    /// 创建后端错误
    pub fn backend(msg: impl Into<String>) -> Self {
        CoordinationError::Backend(msg.into())
    }

    /// 获取错误代码
    pub fn code(&self) -> ErrorCode {
        match self {
            CoordinationError::ConnectionLoss => ErrorCode::ConnectionLost,
            CoordinationError::SessionExpired => ErrorCode::SessionExpired,
            CoordinationError::Timeout => ErrorCode::ConnectionTimeout,
            CoordinationError::NoNode(_) => ErrorCode::NodeNotFound,
            CoordinationError::NodeExists(_) => ErrorCode::NodeExists,
            CoordinationError::NotEmpty(_) => ErrorCode::NodeNotEmpty,
            CoordinationError::Closed => ErrorCode::ConnectionClosed,
            CoordinationError::InvalidPath(_) => ErrorCode::InvalidPath,
            CoordinationError::Backend(_) => ErrorCode::InternalError,
        }
    }

    /// 判断是否为瞬时错误（等待重连或退避后可以重试）
    pub fn is_transient(&self) -> bool {
        self.code().is_retryable()
    }

    /// 判断是否为节点不存在
    pub fn is_no_node(&self) -> bool {
        matches!(self, CoordinationError::NoNode(_))
    }
}

/// 监听器统一错误类型
#[derive(Error, Debug, Clone)]
pub enum WatchError {
    /// 协调服务错误
    #[error("协调服务错误: {0}")]
    Coordination(#[from] CoordinationError),

    /// watcher 已停止，之后不会再有任何事件
    #[error("watcher 已停止")]
    Stopped,

    /// 构造 watcher 时传入了不匹配的注册中心类型
    #[error("注册中心类型不匹配: {0}")]
    RegistryMismatch(String),

    /// 服务记录无法解码
    #[error("服务记录无效: {0}")]
    InvalidRecord(String),

    /// 服务路径无法解析
    #[error("路径无效: {0}")]
    InvalidPath(String),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(String),
}

impl WatchError {
    /// 创建服务记录无效错误
    pub fn invalid_record(reason: impl Into<String>) -> Self {
        WatchError::InvalidRecord(reason.into())
    }

    /// 创建路径无效错误
    pub fn invalid_path(reason: impl Into<String>) -> Self {
        WatchError::InvalidPath(reason.into())
    }

    /// 创建配置错误
    pub fn config(reason: impl Into<String>) -> Self {
        WatchError::Config(reason.into())
    }

    /// 获取错误代码
    pub fn code(&self) -> ErrorCode {
        match self {
            WatchError::Coordination(e) => e.code(),
            WatchError::Stopped => ErrorCode::WatcherStopped,
            WatchError::RegistryMismatch(_) => ErrorCode::RegistryMismatch,
            WatchError::InvalidRecord(_) => ErrorCode::DeserializationError,
            WatchError::InvalidPath(_) => ErrorCode::InvalidPath,
            WatchError::Config(_) => ErrorCode::ConfigurationError,
            WatchError::Io(_) => ErrorCode::InternalError,
        }
    }

    /// 判断是否为 watcher 停止导致的终止（区别于真正的错误）
    pub fn is_stopped(&self) -> bool {
        matches!(self, WatchError::Stopped)
    }

    /// 判断是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        match self {
            WatchError::Coordination(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, WatchError>;
