//! 重连通知
//!
//! 调用协调服务失败的监听循环按路径登记一个通知通道，会话恢复时
//! `notify_all` 唤醒所有登记者，让它们立即重试而不是等到退避结束。
//! 同一路径可以有多个登记者。

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

/// 每个登记者的通知通道容量
pub const RECONNECT_CHANNEL_SIZE: usize = 4;

type Waiters = HashMap<String, Vec<(u64, mpsc::Sender<()>)>>;

/// 重连通知器
#[derive(Default)]
pub struct ReconnectNotifier {
    waiters: Mutex<Waiters>,
    next_id: AtomicU64,
}

impl ReconnectNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为 `path` 登记一个等待者，返回的句柄被丢弃时自动注销
    pub fn register(self: &Arc<Self>, path: &str) -> ReconnectWaiter {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(RECONNECT_CHANNEL_SIZE);
        self.waiters
            .lock()
            .entry(path.to_string())
            .or_default()
            .push((id, tx));
        debug!(path = %path, id, "reconnect waiter registered");

        ReconnectWaiter {
            notifier: Arc::clone(self),
            path: path.to_string(),
            id,
            rx,
        }
    }

    fn unregister(&self, path: &str, id: u64) {
        let mut waiters = self.waiters.lock();
        if let Some(list) = waiters.get_mut(path) {
            list.retain(|(waiter_id, _)| *waiter_id != id);
            if list.is_empty() {
                waiters.remove(path);
            }
        }
    }

    /// 唤醒 `path` 上的所有等待者，返回唤醒数量
    pub fn notify(&self, path: &str) -> usize {
        let waiters = self.waiters.lock();
        waiters
            .get(path)
            .map(|list| list.iter().filter(|(_, tx)| tx.try_send(()).is_ok()).count())
            .unwrap_or(0)
    }

    /// 唤醒所有路径上的等待者，返回唤醒数量
    pub fn notify_all(&self) -> usize {
        let waiters = self.waiters.lock();
        waiters
            .values()
            .flatten()
            .filter(|(_, tx)| tx.try_send(()).is_ok())
            .count()
    }

    /// `path` 上的等待者数量
    pub fn waiter_count(&self, path: &str) -> usize {
        self.waiters.lock().get(path).map(Vec::len).unwrap_or(0)
    }

    /// 所有等待者数量
    pub fn len(&self) -> usize {
        self.waiters.lock().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 登记在通知器上的等待者
pub struct ReconnectWaiter {
    notifier: Arc<ReconnectNotifier>,
    path: String,
    id: u64,
    rx: mpsc::Receiver<()>,
}

impl ReconnectWaiter {
    /// 等待会话恢复通知
    pub async fn notified(&mut self) {
        // 发送端只会在本句柄注销时移除，recv 不会返回 None
        let _ = self.rx.recv().await;
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Drop for ReconnectWaiter {
    fn drop(&mut self) {
        self.notifier.unregister(&self.path, self.id);
    }
}
