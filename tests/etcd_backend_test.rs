//! etcd 后端集成测试
//!
//! 这些测试需要运行中的 etcd 服务器实例。
//! 默认情况下，测试会被忽略，需要使用
//! `cargo test --features etcd --test etcd_backend_test -- --ignored` 运行。
//!
//! 启动 etcd 服务器：
//! ```bash
//! # 使用 Docker 启动 etcd
//! docker run -d --name etcd-test -p 2379:2379 -p 2380:2380 \
//!   quay.io/coreos/etcd:v3.5.9 \
//!   etcd --advertise-client-urls=http://127.0.0.1:2379 \
//!        --listen-client-urls=http://0.0.0.0:2379
//! ```

#![cfg(feature = "etcd")]

use std::sync::Arc;

use flare_ns_watcher::{
    CoordinationClient, CoordinationError, CoordinationRegistry, CreateMode, EtcdCoordinator,
    EtcdCoordinatorConfig, EventKind, NodeEventKind, Registry, RegistryConfig, RetryConfig,
    ServiceAttr, ServiceRecord, WatchOptions, Watcher,
};
use tokio::time::{Duration, timeout};

/// etcd 服务器地址
/// 可以通过环境变量 ETCD_ENDPOINTS 覆盖，默认为 http://127.0.0.1:2379
fn etcd_endpoints() -> Vec<String> {
    std::env::var("ETCD_ENDPOINTS")
        .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
        .unwrap_or_else(|_| vec!["http://127.0.0.1:2379".to_string()])
}

/// 每个测试使用独立的根路径
fn test_root(name: &str) -> String {
    format!("/flare-test-{}-{}", name, uuid::Uuid::new_v4().simple())
}

async fn connect() -> Arc<EtcdCoordinator> {
    let config = EtcdCoordinatorConfig::new(etcd_endpoints()).with_lease_ttl(5);
    Arc::new(
        EtcdCoordinator::connect(config)
            .await
            .expect("Failed to connect to etcd"),
    )
}

fn create_test_record(service: &str, instance_id: &str, port: u16) -> ServiceRecord {
    ServiceRecord::new(
        ServiceAttr::new(service).with_version("v1.0.0"),
        format!("127.0.0.1:{}", port).parse().unwrap(),
    )
    .with_instance_id(instance_id)
}

/// 测试：节点的创建、读取和删除
#[tokio::test]
#[ignore]
async fn test_etcd_node_lifecycle() {
    let client = connect().await;
    let root = test_root("lifecycle");
    let child = format!("{}/child", root);

    client
        .create(&root, b"", CreateMode::Persistent)
        .await
        .expect("Failed to create root");
    assert!(matches!(
        client.create(&root, b"", CreateMode::Persistent).await,
        Err(CoordinationError::NodeExists(_))
    ));
    assert!(matches!(
        client.create(&format!("{}/a/b", root), b"", CreateMode::Persistent).await,
        Err(CoordinationError::NoNode(_))
    ));

    client
        .create(&child, b"payload", CreateMode::Ephemeral)
        .await
        .expect("Failed to create child");
    assert_eq!(client.get(&child).await.unwrap(), b"payload".to_vec());
    assert_eq!(client.get_children(&root).await.unwrap(), vec!["child".to_string()]);
    assert!(matches!(
        client.delete(&root).await,
        Err(CoordinationError::NotEmpty(_))
    ));

    client.delete(&child).await.expect("Failed to delete child");
    client.delete(&root).await.expect("Failed to delete root");
    assert!(client.get_children(&root).await.unwrap_err().is_no_node());
}

/// 测试：一次性 watch 的触发
#[tokio::test]
#[ignore]
async fn test_etcd_one_shot_watches() {
    let client = connect().await;
    let root = test_root("watch");
    let child = format!("{}/child", root);
    client.create(&root, b"", CreateMode::Persistent).await.unwrap();

    let (children, handle) = client.get_children_w(&root).await.unwrap();
    assert!(children.is_empty());
    client.create(&child, b"v1", CreateMode::Persistent).await.unwrap();
    let event = timeout(Duration::from_secs(5), handle)
        .await
        .expect("Timed out waiting for children watch")
        .unwrap();
    assert_eq!(event.kind, NodeEventKind::NodeChildrenChanged);

    let (exists, handle) = client.exists_w(&child).await.unwrap();
    assert!(exists);
    client.delete(&child).await.unwrap();
    let event = timeout(Duration::from_secs(5), handle)
        .await
        .expect("Timed out waiting for exists watch")
        .unwrap();
    assert_eq!(event.kind, NodeEventKind::NodeDeleted);

    client.delete(&root).await.unwrap();
}

/// 测试：基于 etcd 的 watcher 收到实例上下线事件
#[tokio::test]
#[ignore]
async fn test_etcd_watcher_events() {
    let client = connect().await;
    let root = test_root("watcher");
    let registry = CoordinationRegistry::new(client, &RegistryConfig::default().with_root(&root))
        .expect("Failed to create registry");

    let options = WatchOptions::default()
        .with_root(&root)
        .with_retry(RetryConfig::default().with_base_delay(Duration::from_millis(100)));
    let watcher = Watcher::start(registry.clone(), options)
        .await
        .expect("Failed to start watcher");

    let record = create_test_record("test-service", "node-1", 8080);
    registry.register(&record).await.expect("Failed to register");

    let added = timeout(Duration::from_secs(5), watcher.next())
        .await
        .expect("Timed out waiting for Added")
        .unwrap();
    assert_eq!(added.kind, EventKind::Added);
    assert_eq!(added.record.instance_id, "node-1");

    registry.deregister(&record).await.expect("Failed to deregister");
    let removed = timeout(Duration::from_secs(5), watcher.next())
        .await
        .expect("Timed out waiting for Removed")
        .unwrap();
    assert_eq!(removed.kind, EventKind::Removed);

    watcher.stop().await;
    registry.close();
}
