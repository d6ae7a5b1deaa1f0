//! 基于协调服务的注册中心
//!
//! 目录布局：`<root>/<编码后的 ServiceAttr>/<instance_id>`，实例节点为临时节点，
//! 数据为 JSON 编码的 `ServiceRecord`。

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::notifier::ReconnectNotifier;
use super::trait_def::Registry;
use crate::config::{BackendType, RegistryConfig};
use crate::coordination::{
    CoordinationClient, CreateMode, MemoryCoordinator, SessionState, join_path, validate_path,
};
use crate::discovery::ServiceRecord;
use crate::error::{CoordinationError, Result, WatchError};

/// 协调服务注册中心
pub struct CoordinationRegistry {
    client: Arc<dyn CoordinationClient>,
    notifier: Arc<ReconnectNotifier>,
    root: String,
    done: CancellationToken,
}

impl CoordinationRegistry {
    /// 创建注册中心并启动会话监控任务，必须在 tokio 运行时内调用
    pub fn new(client: Arc<dyn CoordinationClient>, config: &RegistryConfig) -> Result<Arc<Self>> {
        validate_path(&config.root).map_err(|e| WatchError::invalid_path(e.to_string()))?;

        let registry = Arc::new(Self {
            client: Arc::clone(&client),
            notifier: Arc::new(ReconnectNotifier::new()),
            root: config.root.clone(),
            done: CancellationToken::new(),
        });

        // 在派生任务之前读取初始状态，之后的变化都会被监控任务观察到
        let mut events = client.session_events();
        let initial = *events.borrow_and_update();
        tokio::spawn(monitor_session(
            events,
            initial,
            Arc::clone(&registry.notifier),
            registry.done.clone(),
        ));

        info!(root = %registry.root, state = %client.session_state(), "coordination registry created");
        Ok(registry)
    }

    /// 按配置创建后端客户端和注册中心
    pub async fn from_config(config: &RegistryConfig) -> Result<Arc<Self>> {
        let client: Arc<dyn CoordinationClient> = match config.backend {
            BackendType::Memory => Arc::new(MemoryCoordinator::new()),
            #[cfg(feature = "etcd")]
            BackendType::Etcd => Arc::new(
                crate::coordination::EtcdCoordinator::connect(
                    crate::coordination::EtcdCoordinatorConfig::from_registry(config),
                )
                .await?,
            ),
            #[cfg(not(feature = "etcd"))]
            BackendType::Etcd => {
                return Err(WatchError::config(
                    "etcd backend requires the `etcd` feature",
                ));
            }
        };
        Self::new(client, config)
    }

    pub fn client(&self) -> Arc<dyn CoordinationClient> {
        Arc::clone(&self.client)
    }

    pub fn notifier(&self) -> Arc<ReconnectNotifier> {
        Arc::clone(&self.notifier)
    }

    /// 注册中心关闭信号
    pub fn done(&self) -> CancellationToken {
        self.done.clone()
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    fn service_path(&self, record: &ServiceRecord) -> Result<String> {
        Ok(join_path(&self.root, &record.attr.marshal_path()?))
    }

    /// 逐级创建持久节点，已存在的节点跳过
    async fn ensure_path(&self, path: &str) -> Result<()> {
        let mut current = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            match self.client.create(&current, &[], CreateMode::Persistent).await {
                Ok(()) | Err(CoordinationError::NodeExists(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Registry for CoordinationRegistry {
    fn name(&self) -> &'static str {
        "coordination"
    }

    async fn register(&self, record: &ServiceRecord) -> Result<()> {
        if self.is_closed() {
            return Err(WatchError::Stopped);
        }
        let service_path = self.service_path(record)?;
        let data = record.encode()?;
        self.ensure_path(&service_path).await?;

        let node = join_path(&service_path, record.node_name());
        match self.client.create(&node, &data, CreateMode::Ephemeral).await {
            Ok(()) => {}
            Err(CoordinationError::NodeExists(_)) => {
                debug!(path = %node, "instance node exists, replace it");
                self.client.delete(&node).await?;
                self.client.create(&node, &data, CreateMode::Ephemeral).await?;
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            path = %node,
            service = %record.attr.service,
            address = %record.address,
            "service instance registered"
        );
        Ok(())
    }

    async fn deregister(&self, record: &ServiceRecord) -> Result<()> {
        let service_path = self.service_path(record)?;
        let node = join_path(&service_path, record.node_name());

        match self.client.delete(&node).await {
            Ok(()) | Err(CoordinationError::NoNode(_)) => {}
            Err(e) => return Err(e.into()),
        }
        self.client.delete_if_empty(&service_path).await;

        info!(path = %node, service = %record.attr.service, "service instance deregistered");
        Ok(())
    }

    fn close(&self) {
        if !self.done.is_cancelled() {
            info!(root = %self.root, "closing coordination registry");
            self.done.cancel();
        }
    }

    fn is_closed(&self) -> bool {
        self.done.is_cancelled()
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl Drop for CoordinationRegistry {
    fn drop(&mut self) {
        self.done.cancel();
    }
}

/// 监控会话状态，每次观察到会话可用时唤醒所有重连等待者
async fn monitor_session(
    mut events: watch::Receiver<SessionState>,
    mut last: SessionState,
    notifier: Arc<ReconnectNotifier>,
    done: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = done.cancelled() => break,
            changed = events.changed() => {
                if changed.is_err() {
                    debug!("session event source closed");
                    break;
                }
                let state = *events.borrow_and_update();
                if state.is_live() {
                    let woken = notifier.notify_all();
                    info!(from = %last, to = %state, woken, "coordination session available");
                } else {
                    warn!(from = %last, to = %state, "coordination session lost");
                }
                last = state;
            }
        }
    }
    debug!("session monitor exit now");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::ServiceAttr;
    use std::time::Duration;

    fn record(service: &str, id: &str) -> ServiceRecord {
        ServiceRecord::new(ServiceAttr::new(service), "127.0.0.1:9000".parse().unwrap())
            .with_instance_id(id)
    }

    #[tokio::test]
    async fn test_register_creates_layout() {
        let memory = Arc::new(MemoryCoordinator::new());
        let registry = CoordinationRegistry::new(memory.clone(), &RegistryConfig::default()).unwrap();

        registry.register(&record("echo", "i-1")).await.unwrap();
        assert!(memory.contains("/gxregistry/service=echo/i-1"));
        assert_eq!(
            memory.node_mode("/gxregistry/service=echo"),
            Some(CreateMode::Persistent)
        );
        assert_eq!(
            memory.node_mode("/gxregistry/service=echo/i-1"),
            Some(CreateMode::Ephemeral)
        );

        // 重复注册覆盖旧数据
        let updated = record("echo", "i-1").with_weight(7);
        registry.register(&updated).await.unwrap();
        let data = memory.get("/gxregistry/service=echo/i-1").await.unwrap();
        assert_eq!(ServiceRecord::decode(&data).unwrap().weight, 7);
    }

    #[tokio::test]
    async fn test_deregister_cleans_empty_service() {
        let memory = Arc::new(MemoryCoordinator::new());
        let registry = CoordinationRegistry::new(memory.clone(), &RegistryConfig::default()).unwrap();
        let a = record("echo", "i-1");
        let b = record("echo", "i-2");
        registry.register(&a).await.unwrap();
        registry.register(&b).await.unwrap();

        registry.deregister(&a).await.unwrap();
        assert!(memory.contains("/gxregistry/service=echo"));
        registry.deregister(&b).await.unwrap();
        assert!(!memory.contains("/gxregistry/service=echo"));

        // 重复注销不报错
        registry.deregister(&b).await.unwrap();
    }

    #[tokio::test]
    async fn test_close_and_downcast() {
        let memory = Arc::new(MemoryCoordinator::new());
        let registry = CoordinationRegistry::new(memory, &RegistryConfig::default()).unwrap();
        let done = registry.done();

        let dynamic: Arc<dyn Registry> = registry.clone();
        assert_eq!(dynamic.name(), "coordination");
        assert!(dynamic.into_any().downcast::<CoordinationRegistry>().is_ok());

        registry.close();
        assert!(registry.is_closed());
        assert!(done.is_cancelled());
        let err = registry.register(&record("echo", "i-1")).await.unwrap_err();
        assert!(err.is_stopped());
    }

    #[tokio::test]
    async fn test_session_recovery_wakes_waiters() {
        let memory = Arc::new(MemoryCoordinator::new());
        let registry = CoordinationRegistry::new(memory.clone(), &RegistryConfig::default()).unwrap();
        let mut waiter = registry.notifier().register("/gxregistry");

        memory.disconnect();
        memory.reconnect();
        tokio::time::timeout(Duration::from_secs(1), waiter.notified())
            .await
            .expect("reconnect should wake waiter");
    }

    #[tokio::test]
    async fn test_invalid_root() {
        let memory = Arc::new(MemoryCoordinator::new());
        let config = RegistryConfig::default().with_root("gxregistry/");
        assert!(CoordinationRegistry::new(memory, &config).is_err());
    }
}
