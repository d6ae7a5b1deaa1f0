//! Flare Namespace Watcher
//!
//! Recursive watcher over a ZooKeeper/etcd style coordination namespace:
//! service paths under a root, instance nodes under each service path,
//! delivered to consumers as a stream of added/removed service records.

pub mod config;
pub mod coordination;
pub mod discovery;
pub mod error;
pub mod registry;
pub mod retry;
pub mod telemetry;
pub mod watcher;

// Re-exports
pub use config::{BackendType, LogConfig, RegistryConfig, WatchOptions, WatcherConfig};
pub use coordination::{
    CoordinationClient, CreateMode, MemoryCoordinator, NodeEvent, NodeEventKind, SessionState,
};
pub use discovery::{EventKind, EventResult, ServiceAttr, ServiceRecord, ServiceRole};
pub use error::{CoordinationError, ErrorCategory, ErrorCode, Result, WatchError};
pub use registry::{CoordinationRegistry, ReconnectNotifier, Registry};
pub use retry::{BackoffStrategy, RetryConfig, RetryPolicy};
pub use telemetry::init_tracing;
pub use watcher::Watcher;

#[cfg(feature = "etcd")]
pub use coordination::{EtcdCoordinator, EtcdCoordinatorConfig};
