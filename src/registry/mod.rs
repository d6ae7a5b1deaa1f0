//! 服务注册模块
//!
//! `Registry` 是对外的注册中心抽象；watcher 只能建立在
//! `CoordinationRegistry` 之上，它持有协调服务客户端、重连通知器和关闭信号。

pub mod coordination;
pub mod notifier;
pub mod trait_def;

pub use coordination::CoordinationRegistry;
pub use notifier::{RECONNECT_CHANNEL_SIZE, ReconnectNotifier, ReconnectWaiter};
pub use trait_def::Registry;
