//! etcd 协调服务客户端
//!
//! 在 etcd 的扁平键空间上模拟层级命名空间：
//! - 节点路径即键，子节点是以 `<path>/` 为前缀的键的第一段
//! - 一次性 watch 由后台任务实现：从读取时的 revision 之后开始监听，
//!   收到第一个相关事件后投递通知并取消 etcd watch
//! - 临时节点绑定在一个租约上，租约由后台任务续期
//!
//! etcd 没有会话概念，会话状态由最近一次调用结果推断：连接类错误视为断开，
//! 断开期间探测任务定期调用 `status`，成功后恢复为 `HasSession`。

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{
    Client, Compare, CompareOp, ConnectOptions, Event, EventType, GetOptions, GetResponse,
    PutOptions, Txn, TxnOp, WatchOptions,
};
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    CoordinationClient, CoordinationResult, CreateMode, NodeEvent, NodeEventKind, SessionState,
    WatchHandle, parent_path, validate_path,
};
use crate::config::RegistryConfig;
use crate::error::CoordinationError;

/// etcd 客户端配置
#[derive(Debug, Clone)]
pub struct EtcdCoordinatorConfig {
    pub endpoints: Vec<String>,
    /// 临时节点租约（秒）
    pub lease_ttl: i64,
    /// 断开期间的探测间隔
    pub probe_interval: Duration,
    pub connect_timeout: Duration,
}

impl EtcdCoordinatorConfig {
    pub fn new(endpoints: Vec<String>) -> Self {
        Self {
            endpoints,
            lease_ttl: 10,
            probe_interval: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(5),
        }
    }

    pub fn from_registry(config: &RegistryConfig) -> Self {
        Self::new(config.endpoints.clone()).with_lease_ttl(config.ttl as i64)
    }

    pub fn with_lease_ttl(mut self, ttl: i64) -> Self {
        self.lease_ttl = ttl.max(1);
        self
    }

    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }
}

/// etcd 协调服务客户端
pub struct EtcdCoordinator {
    client: Client,
    lease_id: Arc<AtomicI64>,
    state: Arc<watch::Sender<SessionState>>,
    shutdown: CancellationToken,
}

impl EtcdCoordinator {
    /// 连接 etcd，申请临时节点租约并启动续期、探测任务
    pub async fn connect(config: EtcdCoordinatorConfig) -> CoordinationResult<Self> {
        let options = ConnectOptions::new().with_connect_timeout(config.connect_timeout);
        let mut client = Client::connect(config.endpoints.clone(), Some(options))
            .await
            .map_err(map_error)?;
        let lease = client
            .lease_grant(config.lease_ttl, None)
            .await
            .map_err(map_error)?;

        let (state, _) = watch::channel(SessionState::HasSession);
        let coordinator = Self {
            client,
            lease_id: Arc::new(AtomicI64::new(lease.id())),
            state: Arc::new(state),
            shutdown: CancellationToken::new(),
        };

        tokio::spawn(keep_alive(
            coordinator.client.clone(),
            Arc::clone(&coordinator.lease_id),
            config.lease_ttl,
            Arc::clone(&coordinator.state),
            coordinator.shutdown.clone(),
        ));
        tokio::spawn(probe(
            coordinator.client.clone(),
            config.probe_interval,
            Arc::clone(&coordinator.state),
            coordinator.shutdown.clone(),
        ));

        info!(endpoints = ?config.endpoints, lease_id = lease.id(), "connected to etcd");
        Ok(coordinator)
    }

    /// 停止后台任务，已注册的 watch 收到 `NotWatching`
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// 记录调用结果对会话状态的影响
    fn observe<T>(&self, result: Result<T, etcd_client::Error>) -> CoordinationResult<T> {
        match result {
            Ok(value) => {
                set_state(&self.state, SessionState::HasSession);
                Ok(value)
            }
            Err(e) => {
                let err = map_error(e);
                if err.is_transient() {
                    set_state(&self.state, SessionState::Disconnected);
                }
                Err(err)
            }
        }
    }

    async fn list_children(&self, path: &str) -> CoordinationResult<(Vec<String>, i64)> {
        validate_path(path)?;
        let prefix = child_prefix(path);
        let mut client = self.client.clone();
        let resp = self.observe(
            client
                .get(prefix.as_str(), Some(GetOptions::new().with_prefix().with_keys_only()))
                .await,
        )?;

        let mut children: Vec<String> = Vec::new();
        for kv in resp.kvs() {
            let Ok(key) = kv.key_str() else { continue };
            if let Some(child) = key.strip_prefix(&prefix).and_then(|rest| rest.split('/').next())
                && !child.is_empty()
                && !children.iter().any(|c| c == child)
            {
                children.push(child.to_string());
            }
        }

        if children.is_empty() && path != "/" && !self.key_exists(path).await? {
            return Err(CoordinationError::NoNode(path.to_string()));
        }
        Ok((children, revision(&resp)))
    }

    async fn key_exists(&self, path: &str) -> CoordinationResult<bool> {
        let mut client = self.client.clone();
        let resp = self.observe(
            client
                .get(path, Some(GetOptions::new().with_count_only()))
                .await,
        )?;
        Ok(resp.count() > 0)
    }

    /// 从 `start_revision` 开始监听，第一个被 `classify` 识别的事件触发通知
    fn spawn_watch<F>(
        &self,
        key: String,
        options: WatchOptions,
        path: String,
        classify: F,
    ) -> WatchHandle
    where
        F: Fn(&Event) -> Option<NodeEventKind> + Send + 'static,
    {
        let (mut tx, rx) = oneshot::channel();
        let mut client = self.client.clone();
        let state = Arc::clone(&self.state);
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let (mut watcher, mut stream) = match client.watch(key, Some(options)).await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(path = %path, error = %e, "fail to create etcd watch");
                    set_state(&state, SessionState::Disconnected);
                    let _ = tx.send(NodeEvent::not_watching(path));
                    return;
                }
            };

            let kind = loop {
                tokio::select! {
                    _ = tx.closed() => break None,
                    _ = shutdown.cancelled() => break Some(NodeEventKind::NotWatching),
                    message = stream.message() => match message {
                        Ok(Some(resp)) => {
                            if resp.canceled() {
                                break Some(NodeEventKind::NotWatching);
                            }
                            if let Some(kind) = resp.events().iter().find_map(&classify) {
                                break Some(kind);
                            }
                        }
                        Ok(None) | Err(_) => break Some(NodeEventKind::NotWatching),
                    },
                }
            };

            if let Err(e) = watcher.cancel().await {
                debug!(path = %path, error = %e, "fail to cancel etcd watch");
            }
            if let Some(kind) = kind {
                let current = *state.borrow();
                let _ = tx.send(NodeEvent::new(kind, path, current));
            }
        });

        rx
    }
}

#[async_trait]
impl CoordinationClient for EtcdCoordinator {
    async fn get_children(&self, path: &str) -> CoordinationResult<Vec<String>> {
        Ok(self.list_children(path).await?.0)
    }

    async fn get_children_w(&self, path: &str) -> CoordinationResult<(Vec<String>, WatchHandle)> {
        let (children, rev) = self.list_children(path).await?;
        let node = path.to_string();
        let prefix = child_prefix(path);
        let handle = self.spawn_watch(
            path.to_string(),
            WatchOptions::new().with_prefix().with_start_revision(rev + 1),
            path.to_string(),
            move |event| {
                let kv = event.kv()?;
                let key = kv.key_str().ok()?;
                if key == node {
                    return matches!(event.event_type(), EventType::Delete)
                        .then_some(NodeEventKind::NodeDeleted);
                }
                let rest = key.strip_prefix(&prefix)?;
                if rest.is_empty() || rest.contains('/') {
                    return None;
                }
                match event.event_type() {
                    EventType::Delete => Some(NodeEventKind::NodeChildrenChanged),
                    EventType::Put if kv.create_revision() == kv.mod_revision() => {
                        Some(NodeEventKind::NodeChildrenChanged)
                    }
                    EventType::Put => None,
                }
            },
        );
        Ok((children, handle))
    }

    async fn exists_w(&self, path: &str) -> CoordinationResult<(bool, WatchHandle)> {
        validate_path(path)?;
        let mut client = self.client.clone();
        let resp = self.observe(
            client
                .get(path, Some(GetOptions::new().with_count_only()))
                .await,
        )?;
        let exists = resp.count() > 0;
        let handle = self.spawn_watch(
            path.to_string(),
            WatchOptions::new().with_start_revision(revision(&resp) + 1),
            path.to_string(),
            |event| match event.event_type() {
                EventType::Delete => Some(NodeEventKind::NodeDeleted),
                EventType::Put => match event.kv() {
                    Some(kv) if kv.create_revision() == kv.mod_revision() => {
                        Some(NodeEventKind::NodeCreated)
                    }
                    _ => Some(NodeEventKind::NodeDataChanged),
                },
            },
        );
        Ok((exists, handle))
    }

    async fn get(&self, path: &str) -> CoordinationResult<Vec<u8>> {
        validate_path(path)?;
        let mut client = self.client.clone();
        let resp = self.observe(client.get(path, None).await)?;
        resp.kvs()
            .first()
            .map(|kv| kv.value().to_vec())
            .ok_or_else(|| CoordinationError::NoNode(path.to_string()))
    }

    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> CoordinationResult<()> {
        validate_path(path)?;
        if path == "/" {
            return Err(CoordinationError::NodeExists(path.to_string()));
        }
        if let Some(parent) = parent_path(path)
            && parent != "/"
            && !self.key_exists(parent).await?
        {
            return Err(CoordinationError::NoNode(parent.to_string()));
        }

        let options = match mode {
            CreateMode::Persistent => None,
            CreateMode::Ephemeral => {
                Some(PutOptions::new().with_lease(self.lease_id.load(Ordering::Acquire)))
            }
        };
        let txn = Txn::new()
            .when(vec![Compare::version(path, CompareOp::Equal, 0)])
            .and_then(vec![TxnOp::put(path, data.to_vec(), options)]);

        let mut client = self.client.clone();
        let resp = self.observe(client.txn(txn).await)?;
        if resp.succeeded() {
            debug!(path = %path, mode = ?mode, "node created");
            Ok(())
        } else {
            Err(CoordinationError::NodeExists(path.to_string()))
        }
    }

    async fn delete(&self, path: &str) -> CoordinationResult<()> {
        validate_path(path)?;
        let prefix = child_prefix(path);
        let mut client = self.client.clone();
        let children = self.observe(
            client
                .get(prefix.as_str(), Some(GetOptions::new().with_prefix().with_count_only()))
                .await,
        )?;
        if children.count() > 0 {
            return Err(CoordinationError::NotEmpty(path.to_string()));
        }

        let resp = self.observe(client.delete(path, None).await)?;
        if resp.deleted() == 0 {
            return Err(CoordinationError::NoNode(path.to_string()));
        }
        Ok(())
    }

    fn session_state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn session_events(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }
}

impl Drop for EtcdCoordinator {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn child_prefix(path: &str) -> String {
    if path == "/" {
        "/".to_string()
    } else {
        format!("{}/", path)
    }
}

fn revision(resp: &GetResponse) -> i64 {
    resp.header().map(|h| h.revision()).unwrap_or(0)
}

fn set_state(state: &watch::Sender<SessionState>, next: SessionState) {
    let changed = state.send_if_modified(|current| {
        if *current == next {
            false
        } else {
            *current = next;
            true
        }
    });
    if changed {
        info!(state = %next, "etcd session state changed");
    }
}

fn map_error(err: etcd_client::Error) -> CoordinationError {
    match err {
        etcd_client::Error::TransportError(_)
        | etcd_client::Error::IoError(_)
        | etcd_client::Error::GRpcStatus(_) => CoordinationError::ConnectionLoss,
        other => CoordinationError::backend(other.to_string()),
    }
}

/// 租约续期，租约过期后重新申请
async fn keep_alive(
    mut client: Client,
    lease_id: Arc<AtomicI64>,
    ttl: i64,
    state: Arc<watch::Sender<SessionState>>,
    shutdown: CancellationToken,
) {
    let interval = Duration::from_secs((ttl / 3).max(1) as u64);
    let mut keeper = None;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        if keeper.is_none() {
            match client.lease_keep_alive(lease_id.load(Ordering::Acquire)).await {
                Ok(pair) => keeper = Some(pair),
                Err(e) => {
                    warn!(error = %e, "fail to open lease keep-alive stream");
                    set_state(&state, SessionState::Disconnected);
                    continue;
                }
            }
        }
        let Some((lease_keeper, stream)) = keeper.as_mut() else {
            continue;
        };

        let expired = match lease_keeper.keep_alive().await {
            Ok(()) => match stream.message().await {
                Ok(Some(resp)) => resp.ttl() <= 0,
                Ok(None) | Err(_) => {
                    warn!("lease keep-alive stream closed");
                    keeper = None;
                    continue;
                }
            },
            Err(e) => {
                warn!(error = %e, "lease keep-alive failed");
                set_state(&state, SessionState::Disconnected);
                keeper = None;
                continue;
            }
        };

        if expired {
            error!(lease_id = lease_id.load(Ordering::Acquire), "lease expired, ephemeral nodes lost");
            keeper = None;
            match client.lease_grant(ttl, None).await {
                Ok(lease) => {
                    lease_id.store(lease.id(), Ordering::Release);
                    info!(lease_id = lease.id(), "new lease granted");
                }
                Err(e) => warn!(error = %e, "fail to grant lease"),
            }
        }
    }
    debug!("lease keep-alive task exit now");
}

/// 断开期间探测连接
async fn probe(
    mut client: Client,
    interval: Duration,
    state: Arc<watch::Sender<SessionState>>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        if state.borrow().is_live() {
            continue;
        }
        match client.status().await {
            Ok(_) => set_state(&state, SessionState::HasSession),
            Err(e) => debug!(error = %e, "etcd still unreachable"),
        }
    }
    debug!("etcd probe task exit now");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_prefix() {
        assert_eq!(child_prefix("/"), "/");
        assert_eq!(child_prefix("/gxregistry"), "/gxregistry/");
    }

    #[test]
    fn test_config_from_registry() {
        let registry = RegistryConfig::default().with_ttl(30);
        let config = EtcdCoordinatorConfig::from_registry(&registry);
        assert_eq!(config.lease_ttl, 30);
        assert_eq!(config.endpoints, registry.endpoints);
    }

    #[test]
    fn test_set_state_only_on_change() {
        let (tx, mut rx) = watch::channel(SessionState::HasSession);
        set_state(&tx, SessionState::HasSession);
        assert!(!rx.has_changed().unwrap());
        set_state(&tx, SessionState::Disconnected);
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), SessionState::Disconnected);
    }
}
