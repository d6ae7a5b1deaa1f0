//! 错误代码和错误类别定义

use serde::{Deserialize, Serialize};
use std::fmt;

/// 错误代码枚举
///
/// 错误代码按类别分组，每个类别占用1000个代码范围：
/// - 1000-1999: 连接/会话相关错误
/// - 2000-2999: 命名空间（节点）相关错误
/// - 3000-3999: 序列化相关错误
/// - 4000-4999: 生命周期相关错误
/// - 6000-6999: 系统相关错误
/// - 9000-9999: 通用错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u32)]
pub enum ErrorCode {
    // ============================================================
    // 连接/会话相关错误 (1000-1999)
    // ============================================================
    ConnectionLost = 1000,
    ConnectionTimeout = 1001,
    ConnectionClosed = 1002,
    SessionExpired = 1003,

    // ============================================================
    // 命名空间相关错误 (2000-2999)
    // ============================================================
    NodeNotFound = 2000,
    NodeExists = 2001,
    NodeNotEmpty = 2002,
    InvalidPath = 2003,

    // ============================================================
    // 序列化相关错误 (3000-3999)
    // ============================================================
    SerializationError = 3000,
    DeserializationError = 3001,

    // ============================================================
    // 生命周期相关错误 (4000-4999)
    // ============================================================
    WatcherStopped = 4000,
    RegistryMismatch = 4001,

    // ============================================================
    // 系统相关错误 (6000-6999)
    // ============================================================
    InternalError = 6000,
    ConfigurationError = 6003,

    // ============================================================
    // 通用错误 (9000-9999)
    // ============================================================
    GeneralError = 9000,
    UnknownError = 9999,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ErrorCode {
    /// 获取错误代码的数字值
    #[inline]
    pub fn as_u32(&self) -> u32 {
        *self as u32
    }

    /// 从数字值创建错误代码
    pub fn from_u32(code: u32) -> Option<Self> {
        match code {
            1000 => Some(ErrorCode::ConnectionLost),
            1001 => Some(ErrorCode::ConnectionTimeout),
            1002 => Some(ErrorCode::ConnectionClosed),
            1003 => Some(ErrorCode::SessionExpired),
            2000 => Some(ErrorCode::NodeNotFound),
            2001 => Some(ErrorCode::NodeExists),
            2002 => Some(ErrorCode::NodeNotEmpty),
            2003 => Some(ErrorCode::InvalidPath),
            3000 => Some(ErrorCode::SerializationError),
            3001 => Some(ErrorCode::DeserializationError),
            4000 => Some(ErrorCode::WatcherStopped),
            4001 => Some(ErrorCode::RegistryMismatch),
            6000 => Some(ErrorCode::InternalError),
            6003 => Some(ErrorCode::ConfigurationError),
            9000 => Some(ErrorCode::GeneralError),
            9999 => Some(ErrorCode::UnknownError),
            _ => None,
        }
    }

    /// 获取错误代码的英文标识符
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConnectionLost => "CONNECTION_LOST",
            ErrorCode::ConnectionTimeout => "CONNECTION_TIMEOUT",
            ErrorCode::ConnectionClosed => "CONNECTION_CLOSED",
            ErrorCode::SessionExpired => "SESSION_EXPIRED",
            ErrorCode::NodeNotFound => "NODE_NOT_FOUND",
            ErrorCode::NodeExists => "NODE_EXISTS",
            ErrorCode::NodeNotEmpty => "NODE_NOT_EMPTY",
            ErrorCode::InvalidPath => "INVALID_PATH",
            ErrorCode::SerializationError => "SERIALIZATION_ERROR",
            ErrorCode::DeserializationError => "DESERIALIZATION_ERROR",
            ErrorCode::WatcherStopped => "WATCHER_STOPPED",
            ErrorCode::RegistryMismatch => "REGISTRY_MISMATCH",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorCode::GeneralError => "GENERAL_ERROR",
            ErrorCode::UnknownError => "UNKNOWN_ERROR",
        }
    }

    /// 获取错误代码的类别（用于错误分类）
    pub fn category(&self) -> ErrorCategory {
        match self.as_u32() {
            1000..=1999 => ErrorCategory::Connection,
            2000..=2999 => ErrorCategory::Namespace,
            3000..=3999 => ErrorCategory::Serialization,
            4000..=4999 => ErrorCategory::Lifecycle,
            6000..=6999 => ErrorCategory::System,
            _ => ErrorCategory::General,
        }
    }

    /// 判断是否为可重试的错误
    ///
    /// 连接类错误在会话恢复后重试即可，其余错误重试没有意义
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::ConnectionLost
                | ErrorCode::ConnectionTimeout
                | ErrorCode::SessionExpired
                | ErrorCode::InternalError
        )
    }
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Connection,
    Namespace,
    Serialization,
    Lifecycle,
    System,
    General,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Connection => write!(f, "CONNECTION"),
            ErrorCategory::Namespace => write!(f, "NAMESPACE"),
            ErrorCategory::Serialization => write!(f, "SERIALIZATION"),
            ErrorCategory::Lifecycle => write!(f, "LIFECYCLE"),
            ErrorCategory::System => write!(f, "SYSTEM"),
            ErrorCategory::General => write!(f, "GENERAL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_round_trip_through_u32() {
        for code in [
            ErrorCode::ConnectionLost,
            ErrorCode::NodeNotFound,
            ErrorCode::DeserializationError,
            ErrorCode::WatcherStopped,
            ErrorCode::UnknownError,
        ] {
            assert_eq!(ErrorCode::from_u32(code.as_u32()), Some(code));
        }
        assert_eq!(ErrorCode::from_u32(1234), None);
    }

    #[test]
    fn test_category_and_retryable() {
        assert_eq!(ErrorCode::SessionExpired.category(), ErrorCategory::Connection);
        assert_eq!(ErrorCode::NodeExists.category(), ErrorCategory::Namespace);
        assert_eq!(ErrorCode::RegistryMismatch.category(), ErrorCategory::Lifecycle);
        assert!(ErrorCode::ConnectionLost.is_retryable());
        assert!(!ErrorCode::NodeNotFound.is_retryable());
        assert!(!ErrorCode::WatcherStopped.is_retryable());
        assert_eq!(ErrorCode::NodeNotEmpty.to_string(), "NODE_NOT_EMPTY");
    }
}
