//! 监听任务共享的状态

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use super::path_set::PathSet;
use super::relay::EventRelay;
use super::{dir, node};
use crate::config::WatchOptions;
use crate::coordination::CoordinationClient;
use crate::discovery::{EventResult, ServiceRecord};
use crate::registry::ReconnectNotifier;
use crate::retry::RetryPolicy;

pub(crate) struct WatchContext {
    pub(crate) client: Arc<dyn CoordinationClient>,
    pub(crate) notifier: Arc<ReconnectNotifier>,
    pub(crate) options: WatchOptions,
    pub(crate) retry: Arc<dyn RetryPolicy>,
    /// 已经派生过子节点监听的路径，循环退出后仍保留
    pub(crate) dirs: PathSet,
    /// 正在监听删除的实例节点
    pub(crate) nodes: PathSet,
    pub(crate) relay: EventRelay,
    pub(crate) stop: CancellationToken,
    pub(crate) tracker: TaskTracker,
}

impl WatchContext {
    pub(crate) fn is_root(&self, path: &str) -> bool {
        path == self.options.root
    }

    /// 执行一次协调服务调用，停止信号到达时放弃并返回 `None`
    pub(crate) async fn guarded<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.stop.cancelled() => None,
            out = fut => Some(out),
        }
    }

    /// 为 `path` 启动子节点监听任务
    ///
    /// 每个路径在 watcher 生命周期内只监听一次，路径被删除后重新创建也不会再次监听
    pub(crate) fn spawn_dir(self: &Arc<Self>, path: String) -> bool {
        if self.stop.is_cancelled() {
            debug!(path = %path, "watcher stopped, skip watching path");
            return false;
        }
        if !self.dirs.insert(&path) {
            debug!(path = %path, "path has been watched");
            return false;
        }

        let ctx = Arc::clone(self);
        self.tracker.spawn(async move {
            info!(path = %path, "start to watch path");
            dir::watch_dir(&ctx, &path).await;
            info!(path = %path, "watch path task exit now");
        });
        true
    }

    /// 为实例节点启动删除监听任务，节点删除时投递 `Removed`
    pub(crate) fn spawn_node(self: &Arc<Self>, path: String, record: ServiceRecord) -> bool {
        if self.stop.is_cancelled() {
            return false;
        }
        if !self.nodes.insert(&path) {
            debug!(path = %path, "node has been watched");
            return false;
        }

        let ctx = Arc::clone(self);
        self.tracker.spawn(async move {
            if node::watch_service_node(&ctx, &path).await {
                info!(path = %path, instance = %record.instance_id, "service instance removed");
                if let Err(e) = ctx.relay.publish(EventResult::removed(record), &ctx.stop).await {
                    debug!(path = %path, error = %e, "removed event dropped");
                }
            }
            ctx.nodes.remove(&path);
            debug!(path = %path, "node watch task exit now");
        });
        true
    }
}
