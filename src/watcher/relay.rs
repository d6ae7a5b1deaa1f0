//! 事件中转
//!
//! 所有监听任务共享一个有界通道向消费方投递事件；通道满时发送方阻塞，
//! 直到消费方取走事件或 watcher 停止。

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::discovery::EventResult;
use crate::error::{Result, WatchError};

#[derive(Clone)]
pub(crate) struct EventRelay {
    tx: mpsc::Sender<EventResult>,
}

impl EventRelay {
    pub(crate) fn channel(capacity: usize) -> (Self, mpsc::Receiver<EventResult>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// 投递事件，停止信号优先
    pub(crate) async fn publish(&self, event: EventResult, stop: &CancellationToken) -> Result<()> {
        tokio::select! {
            biased;
            _ = stop.cancelled() => Err(WatchError::Stopped),
            sent = self.tx.send(event) => sent.map_err(|_| WatchError::Stopped),
        }
    }
}
