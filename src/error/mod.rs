//! 错误处理模块
//!
//! 错误分三层：
//! - `CoordinationError`：协调服务客户端返回的错误，区分瞬时与结构性错误
//! - `WatchError`：监听器对外暴露的错误，包括停止信号和构造期的致命错误
//! - `ErrorCode`：按类别分段的错误代码

pub mod code;
pub mod conversions;
pub mod watch_error;

// 重新导出公共类型
pub use code::{ErrorCategory, ErrorCode};
pub use watch_error::{CoordinationError, Result, WatchError};
