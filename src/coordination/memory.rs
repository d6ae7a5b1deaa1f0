//! 内存协调服务
//!
//! 单进程内的层级存储，按 ZooKeeper 的规则触发一次性 watch：
//! - 创建节点：该节点的 exists watch 收到 `NodeCreated`，父节点的 children watch
//!   收到 `NodeChildrenChanged`
//! - 删除节点：该节点的 exists / children watch 收到 `NodeDeleted`，父节点的
//!   children watch 收到 `NodeChildrenChanged`
//! - 修改数据：该节点的 exists watch 收到 `NodeDataChanged`
//!
//! `insert_node` / `remove_node` / `set_data` 模拟其他客户端对命名空间的修改，
//! 不受本客户端连接状态影响；`disconnect` / `expire_session` / `reconnect`
//! 模拟会话抖动。临时节点不会随会话过期被清理。

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info};

use super::{
    CoordinationClient, CoordinationResult, CreateMode, NodeEvent, NodeEventKind, SessionState,
    WatchHandle, parent_path, validate_path,
};
use crate::error::CoordinationError;

type Watches = HashMap<String, Vec<oneshot::Sender<NodeEvent>>>;

/// 注册一次性 watch，顺带清理接收端已丢弃的旧 watch
fn arm(watches: &mut Watches, path: &str) -> WatchHandle {
    let (tx, rx) = oneshot::channel();
    let pending = watches.entry(path.to_string()).or_default();
    pending.retain(|tx| !tx.is_closed());
    pending.push(tx);
    rx
}

#[derive(Debug, Clone)]
struct Node {
    data: Vec<u8>,
    mode: CreateMode,
}

struct Inner {
    nodes: BTreeMap<String, Node>,
    child_watches: Watches,
    exist_watches: Watches,
    connected: bool,
    /// 接下来这么多次客户端调用直接返回 `ConnectionLoss`
    fail_next: usize,
}

impl Inner {
    fn exists(&self, path: &str) -> bool {
        path == "/" || self.nodes.contains_key(path)
    }

    fn children(&self, path: &str) -> Vec<String> {
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{}/", path)
        };
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, _)| {
                let rest = &key[prefix.len()..];
                (!rest.contains('/')).then(|| rest.to_string())
            })
            .collect()
    }

    fn fire(watches: &mut Watches, path: &str, kind: NodeEventKind, state: SessionState) {
        if let Some(senders) = watches.remove(path) {
            for tx in senders {
                let _ = tx.send(NodeEvent::new(kind, path, state));
            }
        }
    }

    fn create(
        &mut self,
        path: &str,
        data: &[u8],
        mode: CreateMode,
        state: SessionState,
    ) -> CoordinationResult<()> {
        validate_path(path)?;
        if self.exists(path) {
            return Err(CoordinationError::NodeExists(path.to_string()));
        }
        let parent = parent_path(path).unwrap_or("/");
        if !self.exists(parent) {
            return Err(CoordinationError::NoNode(parent.to_string()));
        }

        self.nodes.insert(
            path.to_string(),
            Node {
                data: data.to_vec(),
                mode,
            },
        );
        Self::fire(&mut self.exist_watches, path, NodeEventKind::NodeCreated, state);
        Self::fire(
            &mut self.child_watches,
            parent,
            NodeEventKind::NodeChildrenChanged,
            state,
        );
        Ok(())
    }

    fn delete(&mut self, path: &str, state: SessionState) -> CoordinationResult<()> {
        validate_path(path)?;
        if path == "/" || !self.nodes.contains_key(path) {
            return Err(CoordinationError::NoNode(path.to_string()));
        }
        if !self.children(path).is_empty() {
            return Err(CoordinationError::NotEmpty(path.to_string()));
        }

        self.nodes.remove(path);
        Self::fire(&mut self.exist_watches, path, NodeEventKind::NodeDeleted, state);
        Self::fire(&mut self.child_watches, path, NodeEventKind::NodeDeleted, state);
        if let Some(parent) = parent_path(path) {
            Self::fire(
                &mut self.child_watches,
                parent,
                NodeEventKind::NodeChildrenChanged,
                state,
            );
        }
        Ok(())
    }
}

/// 内存协调服务
pub struct MemoryCoordinator {
    inner: Mutex<Inner>,
    state: watch::Sender<SessionState>,
}

impl MemoryCoordinator {
    /// 创建一个已建立会话的空命名空间
    pub fn new() -> Self {
        let (state, _) = watch::channel(SessionState::HasSession);
        Self {
            inner: Mutex::new(Inner {
                nodes: BTreeMap::new(),
                child_watches: HashMap::new(),
                exist_watches: HashMap::new(),
                connected: true,
                fail_next: 0,
            }),
            state,
        }
    }

    fn current_state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// 客户端调用前的连接检查
    fn check_connected(&self, inner: &mut Inner) -> CoordinationResult<()> {
        if !inner.connected {
            return Err(CoordinationError::ConnectionLoss);
        }
        if inner.fail_next > 0 {
            inner.fail_next -= 1;
            return Err(CoordinationError::ConnectionLoss);
        }
        Ok(())
    }

    // ============================================================
    // 模拟其他客户端对命名空间的修改
    // ============================================================

    /// 创建节点（父节点不存在时自动创建为空的持久节点）
    pub fn insert_node(&self, path: &str, data: &[u8]) -> CoordinationResult<()> {
        validate_path(path)?;
        let state = self.current_state();
        let mut inner = self.inner.lock();

        let mut missing = Vec::new();
        let mut cursor = parent_path(path);
        while let Some(p) = cursor {
            if inner.exists(p) {
                break;
            }
            missing.push(p.to_string());
            cursor = parent_path(p);
        }
        for p in missing.iter().rev() {
            inner.create(p, &[], CreateMode::Persistent, state)?;
        }
        inner.create(path, data, CreateMode::Persistent, state)
    }

    /// 删除节点
    pub fn remove_node(&self, path: &str) -> CoordinationResult<()> {
        let state = self.current_state();
        self.inner.lock().delete(path, state)
    }

    /// 修改节点数据
    pub fn set_data(&self, path: &str, data: &[u8]) -> CoordinationResult<()> {
        let state = self.current_state();
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        match inner.nodes.get_mut(path) {
            Some(node) => {
                node.data = data.to_vec();
                Inner::fire(
                    &mut inner.exist_watches,
                    path,
                    NodeEventKind::NodeDataChanged,
                    state,
                );
                Ok(())
            }
            None => Err(CoordinationError::NoNode(path.to_string())),
        }
    }

    /// 节点是否存在
    pub fn contains(&self, path: &str) -> bool {
        self.inner.lock().exists(path)
    }

    /// 节点的创建模式
    pub fn node_mode(&self, path: &str) -> Option<CreateMode> {
        self.inner.lock().nodes.get(path).map(|node| node.mode)
    }

    /// 尚未触发的 watch 数量
    pub fn pending_watches(&self) -> usize {
        let inner = self.inner.lock();
        inner.child_watches.values().map(Vec::len).sum::<usize>()
            + inner.exist_watches.values().map(Vec::len).sum::<usize>()
    }

    // ============================================================
    // 模拟会话抖动
    // ============================================================

    /// 连接断开，已注册的 watch 保留
    pub fn disconnect(&self) {
        self.inner.lock().connected = false;
        self.state.send_replace(SessionState::Disconnected);
        info!("memory coordinator disconnected");
    }

    /// 会话过期，所有已注册的 watch 收到 `NotWatching`
    pub fn expire_session(&self) {
        {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            inner.connected = false;
            let dropped: Vec<_> = inner
                .child_watches
                .drain()
                .chain(inner.exist_watches.drain())
                .collect();
            for (path, senders) in dropped {
                for tx in senders {
                    let _ = tx.send(NodeEvent::new(
                        NodeEventKind::NotWatching,
                        path.clone(),
                        SessionState::Disconnected,
                    ));
                }
            }
        }
        self.state.send_replace(SessionState::Disconnected);
        info!("memory coordinator session expired");
    }

    /// 重新建立会话
    pub fn reconnect(&self) {
        self.inner.lock().connected = true;
        self.state.send_replace(SessionState::HasSession);
        info!("memory coordinator reconnected");
    }

    /// 让接下来 `n` 次客户端调用失败，不改变会话状态
    pub fn fail_next_calls(&self, n: usize) {
        self.inner.lock().fail_next = n;
    }
}

impl Default for MemoryCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoordinationClient for MemoryCoordinator {
    async fn get_children(&self, path: &str) -> CoordinationResult<Vec<String>> {
        validate_path(path)?;
        let mut inner = self.inner.lock();
        self.check_connected(&mut inner)?;
        if !inner.exists(path) {
            return Err(CoordinationError::NoNode(path.to_string()));
        }
        Ok(inner.children(path))
    }

    async fn get_children_w(&self, path: &str) -> CoordinationResult<(Vec<String>, WatchHandle)> {
        validate_path(path)?;
        let mut inner = self.inner.lock();
        self.check_connected(&mut inner)?;
        if !inner.exists(path) {
            return Err(CoordinationError::NoNode(path.to_string()));
        }

        let rx = arm(&mut inner.child_watches, path);
        debug!(path = %path, "children watch registered");
        Ok((inner.children(path), rx))
    }

    async fn exists_w(&self, path: &str) -> CoordinationResult<(bool, WatchHandle)> {
        validate_path(path)?;
        let mut inner = self.inner.lock();
        self.check_connected(&mut inner)?;

        let rx = arm(&mut inner.exist_watches, path);
        Ok((inner.exists(path), rx))
    }

    async fn get(&self, path: &str) -> CoordinationResult<Vec<u8>> {
        validate_path(path)?;
        let mut inner = self.inner.lock();
        self.check_connected(&mut inner)?;
        inner
            .nodes
            .get(path)
            .map(|node| node.data.clone())
            .ok_or_else(|| CoordinationError::NoNode(path.to_string()))
    }

    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> CoordinationResult<()> {
        let state = self.current_state();
        let mut inner = self.inner.lock();
        self.check_connected(&mut inner)?;
        inner.create(path, data, mode, state)
    }

    async fn delete(&self, path: &str) -> CoordinationResult<()> {
        let state = self.current_state();
        let mut inner = self.inner.lock();
        self.check_connected(&mut inner)?;
        inner.delete(path, state)
    }

    fn session_state(&self) -> SessionState {
        self.current_state()
    }

    fn session_events(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_children_and_watch_on_create() {
        let zk = MemoryCoordinator::new();
        zk.insert_node("/root/svc/inst-1", b"1").unwrap();

        let (children, handle) = zk.get_children_w("/root/svc").await.unwrap();
        assert_eq!(children, vec!["inst-1".to_string()]);
        assert_eq!(zk.get_children("/root").await.unwrap(), vec!["svc".to_string()]);

        zk.insert_node("/root/svc/inst-2", b"2").unwrap();
        let event = handle.await.unwrap();
        assert_eq!(event.kind, NodeEventKind::NodeChildrenChanged);
        assert_eq!(event.path, "/root/svc");
        assert_eq!(zk.pending_watches(), 0);
    }

    #[tokio::test]
    async fn test_exists_watch_sees_data_change_then_delete() {
        let zk = MemoryCoordinator::new();
        zk.insert_node("/a", b"x").unwrap();

        let (exists, handle) = zk.exists_w("/a").await.unwrap();
        assert!(exists);
        zk.set_data("/a", b"y").unwrap();
        assert_eq!(handle.await.unwrap().kind, NodeEventKind::NodeDataChanged);
        assert_eq!(zk.get("/a").await.unwrap(), b"y".to_vec());

        let (_, handle) = zk.exists_w("/a").await.unwrap();
        zk.remove_node("/a").unwrap();
        assert_eq!(handle.await.unwrap().kind, NodeEventKind::NodeDeleted);

        let (exists, _handle) = zk.exists_w("/a").await.unwrap();
        assert!(!exists);
    }

    #[tokio::test]
    async fn test_abandoned_watches_are_pruned() {
        let zk = MemoryCoordinator::new();
        zk.insert_node("/a", b"x").unwrap();

        for _ in 0..5 {
            let (_, handle) = zk.exists_w("/a").await.unwrap();
            drop(handle);
            let (_, handle) = zk.get_children_w("/a").await.unwrap();
            drop(handle);
        }
        assert_eq!(zk.pending_watches(), 2);

        let (_, handle) = zk.exists_w("/a").await.unwrap();
        assert_eq!(zk.pending_watches(), 2);
        zk.remove_node("/a").unwrap();
        assert_eq!(handle.await.unwrap().kind, NodeEventKind::NodeDeleted);
    }

    #[tokio::test]
    async fn test_structural_errors() {
        let zk = MemoryCoordinator::new();
        zk.insert_node("/a/b", b"").unwrap();

        assert_eq!(
            zk.create("/x/y", b"", CreateMode::Persistent).await,
            Err(CoordinationError::NoNode("/x".to_string()))
        );
        assert_eq!(
            zk.create("/a", b"", CreateMode::Persistent).await,
            Err(CoordinationError::NodeExists("/a".to_string()))
        );
        assert_eq!(
            zk.delete("/a").await,
            Err(CoordinationError::NotEmpty("/a".to_string()))
        );
        assert!(zk.get_children_w("/missing").await.unwrap_err().is_no_node());

        zk.delete_if_empty("/a").await;
        assert!(zk.contains("/a"));
        zk.delete("/a/b").await.unwrap();
        zk.delete_if_empty("/a").await;
        assert!(!zk.contains("/a"));
    }

    #[tokio::test]
    async fn test_session_transitions() {
        let zk = MemoryCoordinator::new();
        zk.insert_node("/a", b"").unwrap();
        let mut events = zk.session_events();

        let (_, pending) = zk.get_children_w("/a").await.unwrap();
        zk.disconnect();
        assert_eq!(zk.session_state(), SessionState::Disconnected);
        assert_eq!(
            zk.get_children("/a").await,
            Err(CoordinationError::ConnectionLoss)
        );
        events.changed().await.unwrap();
        assert_eq!(*events.borrow_and_update(), SessionState::Disconnected);

        zk.expire_session();
        assert_eq!(pending.await.unwrap().kind, NodeEventKind::NotWatching);

        zk.reconnect();
        events.changed().await.unwrap();
        assert!(events.borrow_and_update().is_live());
        assert!(zk.get_children("/a").await.is_ok());
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let zk = MemoryCoordinator::new();
        zk.fail_next_calls(2);
        assert!(zk.get_children("/").await.is_err());
        assert!(zk.get("/x").await.unwrap_err().is_transient());
        assert!(zk.get_children("/").await.is_ok());
        assert!(zk.session_state().is_live());
    }
}
