//! 协调服务客户端抽象
//!
//! watcher 只依赖这里定义的一组原语：一次性的 children / exists watch、
//! 同步的 get / create / delete，以及会话状态。所有后端（内存、etcd）都实现
//! `CoordinationClient`。
//!
//! 一次性 watch 的语义与 ZooKeeper 一致：注册后最多触发一次，之后必须重新注册；
//! 已经注册的 watch 无法取消。

pub mod memory;

#[cfg(feature = "etcd")]
pub mod etcd;

pub use memory::MemoryCoordinator;

#[cfg(feature = "etcd")]
pub use etcd::{EtcdCoordinator, EtcdCoordinatorConfig};

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};
use tracing::debug;

use crate::error::CoordinationError;

/// 协调服务调用结果
pub type CoordinationResult<T> = std::result::Result<T, CoordinationError>;

/// 一次性 watch 句柄
///
/// 最多产生一个通知；发送端被丢弃（客户端关闭）时按 `NotWatching` 处理
pub type WatchHandle = oneshot::Receiver<NodeEvent>;

/// 会话状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connected,
    HasSession,
}

impl SessionState {
    /// 会话是否可用
    pub fn is_live(&self) -> bool {
        matches!(self, SessionState::Connected | SessionState::HasSession)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::HasSession => write!(f, "has_session"),
        }
    }
}

/// 节点通知类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeEventKind {
    NodeCreated,
    NodeDeleted,
    NodeDataChanged,
    NodeChildrenChanged,
    /// watch 已失效（会话过期或客户端关闭），不代表节点被删除
    NotWatching,
}

impl fmt::Display for NodeEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeEventKind::NodeCreated => "node_created",
            NodeEventKind::NodeDeleted => "node_deleted",
            NodeEventKind::NodeDataChanged => "node_data_changed",
            NodeEventKind::NodeChildrenChanged => "node_children_changed",
            NodeEventKind::NotWatching => "not_watching",
        };
        write!(f, "{}", s)
    }
}

/// 一次性 watch 触发时投递的通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEvent {
    pub kind: NodeEventKind,
    pub path: String,
    pub state: SessionState,
}

impl NodeEvent {
    pub fn new(kind: NodeEventKind, path: impl Into<String>, state: SessionState) -> Self {
        Self {
            kind,
            path: path.into(),
            state,
        }
    }

    /// 发送端已丢弃时使用的占位通知
    pub fn not_watching(path: impl Into<String>) -> Self {
        Self::new(NodeEventKind::NotWatching, path, SessionState::Disconnected)
    }
}

/// 节点创建模式
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CreateMode {
    #[default]
    Persistent,
    /// 随会话消失
    Ephemeral,
}

/// 协调服务客户端
///
/// 连接管理、会话重建由实现自行负责；watcher 只通过 `session_events`
/// 感知会话恢复。
#[async_trait]
pub trait CoordinationClient: Send + Sync + 'static {
    /// 获取子节点名列表
    async fn get_children(&self, path: &str) -> CoordinationResult<Vec<String>>;

    /// 获取子节点名列表，并注册一次性 children watch
    async fn get_children_w(&self, path: &str) -> CoordinationResult<(Vec<String>, WatchHandle)>;

    /// 检查节点是否存在，并注册一次性 exists watch
    ///
    /// 节点不存在时同样注册 watch（等待创建），返回 `false`
    async fn exists_w(&self, path: &str) -> CoordinationResult<(bool, WatchHandle)>;

    /// 读取节点数据
    async fn get(&self, path: &str) -> CoordinationResult<Vec<u8>>;

    /// 创建节点，父节点必须存在
    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> CoordinationResult<()>;

    /// 删除节点，节点必须没有子节点
    async fn delete(&self, path: &str) -> CoordinationResult<()>;

    /// 尽力删除空节点，失败只记录日志
    async fn delete_if_empty(&self, path: &str) {
        match self.delete(path).await {
            Ok(()) => debug!(path = %path, "deleted empty node"),
            Err(e) => debug!(path = %path, error = %e, "node not deleted"),
        }
    }

    /// 当前会话状态
    fn session_state(&self) -> SessionState;

    /// 订阅会话状态变化
    fn session_events(&self) -> watch::Receiver<SessionState>;
}

/// 拼接父路径和子节点名
pub fn join_path(parent: &str, child: &str) -> String {
    if parent.ends_with('/') {
        format!("{}{}", parent, child)
    } else {
        format!("{}/{}", parent, child)
    }
}

/// 获取父路径，根路径没有父路径
pub fn parent_path(path: &str) -> Option<&str> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&path[..idx]),
        None => None,
    }
}

/// 检查路径格式：以 `/` 开头，不以 `/` 结尾（根路径除外），不含空段
pub fn validate_path(path: &str) -> CoordinationResult<()> {
    let valid = path == "/"
        || (path.starts_with('/') && !path.ends_with('/') && !path[1..].split('/').any(str::is_empty));
    if valid {
        Ok(())
    } else {
        Err(CoordinationError::InvalidPath(path.to_string()))
    }
}
