//! 实例节点删除监听

use tracing::{debug, error, warn};

use super::context::WatchContext;
use super::dir::{Retry, wait_for_retry};
use crate::coordination::{NodeEvent, NodeEventKind};

/// 监听实例节点直到删除
///
/// 返回 `true` 表示节点已删除；`false` 表示 watcher 停止、watch 失效或遇到
/// 不可重试的错误，此时不能认为节点已删除。数据变化只重新注册 watch，
/// 连接抖动导致的注册失败按退避策略重试。
pub(crate) async fn watch_service_node(ctx: &WatchContext, path: &str) -> bool {
    let mut failures: u32 = 0;

    loop {
        let (exists, handle) = match ctx.guarded(ctx.client.exists_w(path)).await {
            None => return false,
            Some(Ok(result)) => result,
            Some(Err(e)) if e.is_transient() => {
                failures = ctx.retry.next_failures(failures);
                warn!(path = %path, error = %e, failures, "exists watch failed, retry later");
                match wait_for_retry(ctx, path, failures).await {
                    Retry::Stop => return false,
                    Retry::Reconnected => failures = 0,
                    Retry::Timeout => {}
                }
                continue;
            }
            Some(Err(e)) => {
                error!(path = %path, error = %e, "exists watch failed");
                return false;
            }
        };
        failures = 0;
        if !exists {
            debug!(path = %path, "node already deleted");
            return true;
        }

        tokio::select! {
            biased;
            _ = ctx.stop.cancelled() => return false,
            event = handle => {
                let event = event.unwrap_or_else(|_| NodeEvent::not_watching(path));
                match event.kind {
                    NodeEventKind::NodeDeleted => return true,
                    NodeEventKind::NotWatching => {
                        warn!(path = %path, state = %event.state, "node watch invalidated");
                        return false;
                    }
                    kind => debug!(path = %path, kind = %kind, "node changed, watch again"),
                }
            }
        }
    }
}
