//! 命名空间 watcher
//!
//! 以根路径为起点递归监听：根路径下的服务路径、服务路径下的实例节点。
//! 所有监听任务共享一个停止信号和一个有界事件通道，消费方通过 `next` 逐个取出
//! `Added` / `Removed` 事件。
//!
//! 投递语义：
//! - 已存在的实例至少上报一次 `Added`，会话恢复后可能重复上报，消费方按 upsert 处理
//! - 每个被删除的实例恰好上报一次 `Removed`
//! - `stop` 之后 `next` 不再返回事件

mod context;
mod dir;
mod node;
mod path_set;
mod relay;

pub use path_set::PathSet;

use std::fmt;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::config::WatchOptions;
use crate::coordination::validate_path;
use crate::discovery::EventResult;
use crate::error::{Result, WatchError};
use crate::registry::{CoordinationRegistry, Registry};
use context::WatchContext;
use relay::EventRelay;

/// 命名空间 watcher
pub struct Watcher {
    ctx: Arc<WatchContext>,
    registry: Arc<CoordinationRegistry>,
    events: Mutex<mpsc::Receiver<EventResult>>,
}

impl Watcher {
    /// 基于协调服务注册中心启动 watcher
    ///
    /// 启动时先尽力删除空的根路径，再为根路径下已有的服务路径派生监听任务，
    /// 最后派生根路径自身的监听任务。其它类型的注册中心返回
    /// `WatchError::RegistryMismatch`。
    pub async fn start(registry: Arc<dyn Registry>, options: WatchOptions) -> Result<Self> {
        let name = registry.name();
        let registry = registry
            .into_any()
            .downcast::<CoordinationRegistry>()
            .map_err(|_| {
                WatchError::RegistryMismatch(format!(
                    "watcher requires a coordination registry, got {}",
                    name
                ))
            })?;
        if registry.is_closed() {
            return Err(WatchError::Stopped);
        }
        validate_path(&options.root).map_err(|e| WatchError::invalid_path(e.to_string()))?;

        let (relay, events) = EventRelay::channel(options.event_channel_size);
        let ctx = Arc::new(WatchContext {
            client: registry.client(),
            notifier: registry.notifier(),
            retry: options.retry.build(),
            options,
            dirs: PathSet::new(),
            nodes: PathSet::new(),
            relay,
            stop: registry.done().child_token(),
            tracker: TaskTracker::new(),
        });

        let watcher = Self {
            ctx,
            registry,
            events: Mutex::new(events),
        };
        watcher.seed().await;
        Ok(watcher)
    }

    async fn seed(&self) {
        let ctx = &self.ctx;
        let root = ctx.options.root.clone();
        ctx.client.delete_if_empty(&root).await;

        let children = match ctx.client.get_children(&root).await {
            Ok(children) => children,
            Err(e) => {
                warn!(root = %root, error = %e, "fail to get children of root");
                Vec::new()
            }
        };
        for child in &children {
            dir::on_new_service(ctx, &root, child);
        }
        ctx.spawn_dir(root.clone());

        info!(
            root = %root,
            services = children.len(),
            filter = ?ctx.options.filter,
            "watcher started"
        );
    }

    /// 取出下一个事件，没有事件时等待
    ///
    /// watcher 停止后返回 `WatchError::Stopped`，停止信号优先于已缓冲的事件。
    pub async fn next(&self) -> Result<EventResult> {
        let mut events = self.events.lock().await;
        tokio::select! {
            biased;
            _ = self.ctx.stop.cancelled() => Err(WatchError::Stopped),
            event = events.recv() => event.ok_or(WatchError::Stopped),
        }
    }

    /// watcher 未停止、注册中心未关闭且会话可用
    pub fn is_alive(&self) -> bool {
        !self.is_stopped()
            && !self.registry.is_closed()
            && self.ctx.client.session_state().is_live()
    }

    pub fn is_stopped(&self) -> bool {
        self.ctx.stop.is_cancelled()
    }

    /// 停止所有监听任务并等待退出，可重复调用
    ///
    /// 等待超过 `shutdown_timeout` 时只记录告警。
    pub async fn stop(&self) {
        if !self.ctx.stop.is_cancelled() {
            info!(root = %self.ctx.options.root, "stopping watcher");
            self.ctx.stop.cancel();
        }
        self.ctx.tracker.close();

        let timeout = self.ctx.options.shutdown_timeout();
        match tokio::time::timeout(timeout, self.ctx.tracker.wait()).await {
            Ok(()) => info!(root = %self.ctx.options.root, "watcher stopped"),
            Err(_) => warn!(
                root = %self.ctx.options.root,
                remaining = self.ctx.tracker.len(),
                timeout_ms = timeout.as_millis() as u64,
                "watch tasks did not exit in time"
            ),
        }
    }

    pub fn root(&self) -> &str {
        &self.ctx.options.root
    }

    /// 派生过子节点监听的路径
    pub fn watched_paths(&self) -> Vec<String> {
        self.ctx.dirs.snapshot()
    }

    /// 正在监听删除的实例节点
    pub fn watched_nodes(&self) -> Vec<String> {
        self.ctx.nodes.snapshot()
    }

    /// 仍在运行的监听任务数量
    pub fn running_tasks(&self) -> usize {
        self.ctx.tracker.len()
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("root", &self.ctx.options.root)
            .field("stopped", &self.is_stopped())
            .field("watched_paths", &self.ctx.dirs.len())
            .field("watched_nodes", &self.ctx.nodes.len())
            .finish()
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.ctx.stop.cancel();
    }
}
