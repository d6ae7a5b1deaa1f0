//! 错误类型转换实现
//!
//! 提供各种错误类型之间的转换

use super::WatchError;
use std::io;

impl From<io::Error> for WatchError {
    fn from(err: io::Error) -> Self {
        WatchError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for WatchError {
    fn from(err: serde_json::Error) -> Self {
        WatchError::invalid_record(format!("JSON 解码错误: {}", err))
    }
}

impl From<serde_urlencoded::de::Error> for WatchError {
    fn from(err: serde_urlencoded::de::Error) -> Self {
        WatchError::invalid_path(format!("属性解码错误: {}", err))
    }
}

impl From<serde_urlencoded::ser::Error> for WatchError {
    fn from(err: serde_urlencoded::ser::Error) -> Self {
        WatchError::invalid_path(format!("属性编码错误: {}", err))
    }
}

impl From<toml::de::Error> for WatchError {
    fn from(err: toml::de::Error) -> Self {
        WatchError::config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_conversions_keep_category() {
        let err: WatchError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert_eq!(err.code(), ErrorCode::DeserializationError);

        let err: WatchError = io::Error::other("disk").into();
        assert!(matches!(err, WatchError::Io(_)));

        let err: WatchError = toml::from_str::<toml::Table>("= broken").unwrap_err().into();
        assert_eq!(err.code(), ErrorCode::ConfigurationError);
    }
}
