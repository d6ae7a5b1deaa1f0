//! 子节点监听循环
//!
//! 根路径下的子节点是服务路径，每个通过过滤的服务路径派生一个新的循环；
//! 服务路径下的子节点是实例节点，读取记录后投递 `Added` 并派生删除监听。
//!
//! 只对比新增的子节点，删除由实例节点上的 exists watch 负责。
//! 调用失败后按退避策略等待，会话恢复通知可以提前唤醒；失败后的第一次成功
//! 会清空已知子节点，现存实例全部重新上报一次。

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::context::WatchContext;
use crate::coordination::{NodeEvent, NodeEventKind, join_path};
use crate::discovery::{EventResult, ServiceAttr, ServiceRecord};

/// 等待重试的结果
pub(crate) enum Retry {
    Stop,
    Reconnected,
    Timeout,
}

/// 处理单个新增子节点的结果
pub(crate) enum Outcome {
    Done,
    Skipped,
    /// 读取失败但可以重试，整轮对比需要重做
    Transient,
    Stop,
}

pub(crate) async fn watch_dir(ctx: &Arc<WatchContext>, path: &str) {
    let is_root = ctx.is_root(path);
    let mut known: HashSet<String> = HashSet::new();
    let mut failures: u32 = 0;
    let mut recovering = false;

    loop {
        let (children, handle) = match ctx.guarded(ctx.client.get_children_w(path)).await {
            None => return,
            Some(Ok(listed)) => listed,
            Some(Err(e)) if e.is_no_node() => {
                if !is_root {
                    info!(path = %path, "path removed, stop watching");
                    return;
                }
                debug!(path = %path, "root path not exists, wait for creation");
                if !wait_for_creation(ctx, path, &mut failures).await {
                    return;
                }
                continue;
            }
            Some(Err(e)) => {
                failures = ctx.retry.next_failures(failures);
                recovering = true;
                error!(path = %path, error = %e, failures, "watch children failed");
                match wait_for_retry(ctx, path, failures).await {
                    Retry::Stop => return,
                    Retry::Reconnected => failures = 0,
                    Retry::Timeout => {}
                }
                continue;
            }
        };

        if recovering {
            debug!(path = %path, known = known.len(), "reset known children after recovery");
            known.clear();
            recovering = false;
        }
        failures = 0;

        let mut added: Vec<&String> = children.iter().filter(|c| !known.contains(*c)).collect();
        added.sort();
        debug!(path = %path, children = children.len(), added = added.len(), "children fetched");

        let mut retry_round = false;
        for child in added {
            let outcome = if is_root {
                on_new_service(ctx, path, child)
            } else {
                on_new_instance(ctx, path, child).await
            };
            match outcome {
                Outcome::Stop => return,
                Outcome::Transient => {
                    retry_round = true;
                    break;
                }
                Outcome::Done | Outcome::Skipped => {}
            }
        }
        known = children.into_iter().collect();

        if retry_round {
            failures = ctx.retry.next_failures(failures);
            recovering = true;
            match wait_for_retry(ctx, path, failures).await {
                Retry::Stop => return,
                Retry::Reconnected => failures = 0,
                Retry::Timeout => {}
            }
            continue;
        }

        tokio::select! {
            biased;
            _ = ctx.stop.cancelled() => {
                info!(path = %path, "stop signal received");
                return;
            }
            event = handle => {
                let event = event.unwrap_or_else(|_| NodeEvent::not_watching(path));
                match event.kind {
                    NodeEventKind::NodeChildrenChanged => {
                        debug!(path = %path, "children changed");
                    }
                    NodeEventKind::NotWatching => {
                        warn!(path = %path, state = %event.state, "children watch invalidated");
                        recovering = true;
                    }
                    kind => debug!(path = %path, kind = %kind, "ignore event"),
                }
            }
        }
    }
}

/// 根路径下出现新的服务路径
pub(crate) fn on_new_service(ctx: &Arc<WatchContext>, root: &str, child: &str) -> Outcome {
    let attr = match ServiceAttr::unmarshal_path(child) {
        Ok(attr) => attr,
        Err(e) => {
            warn!(root = %root, child = %child, error = %e, "unrecognized service path");
            return Outcome::Skipped;
        }
    };
    if !ctx.options.filter.matches(&attr) {
        debug!(child = %child, "service path filtered out");
        return Outcome::Skipped;
    }
    ctx.spawn_dir(join_path(root, child));
    Outcome::Done
}

/// 服务路径下出现新的实例节点
async fn on_new_instance(ctx: &Arc<WatchContext>, path: &str, child: &str) -> Outcome {
    let node_path = join_path(path, child);
    let data = match ctx.guarded(ctx.client.get(&node_path)).await {
        None => return Outcome::Stop,
        Some(Ok(data)) => data,
        Some(Err(e)) if e.is_no_node() => {
            debug!(path = %node_path, "instance removed before read");
            return Outcome::Skipped;
        }
        Some(Err(e)) if e.is_transient() => {
            warn!(path = %node_path, error = %e, "can not get value of node, retry later");
            return Outcome::Transient;
        }
        Some(Err(e)) => {
            error!(path = %node_path, error = %e, "can not get value of node");
            return Outcome::Skipped;
        }
    };

    let record = match ServiceRecord::decode(&data) {
        Ok(record) => record,
        Err(e) => {
            error!(path = %node_path, error = %e, "invalid service record");
            return Outcome::Skipped;
        }
    };
    if !ctx.options.filter.matches(&record.attr) {
        warn!(path = %node_path, service = %record.attr.service, "service record filtered out");
        return Outcome::Skipped;
    }

    info!(
        path = %node_path,
        instance = %record.instance_id,
        address = %record.address,
        "service instance added"
    );
    if ctx
        .relay
        .publish(EventResult::added(record.clone()), &ctx.stop)
        .await
        .is_err()
    {
        return Outcome::Stop;
    }
    ctx.spawn_node(node_path, record);
    Outcome::Done
}

/// 失败后等待：停止信号、会话恢复通知或退避超时
pub(crate) async fn wait_for_retry(ctx: &WatchContext, path: &str, failures: u32) -> Retry {
    let mut waiter = ctx.notifier.register(path);
    let delay = ctx.retry.backoff_duration(failures);
    debug!(path = %path, failures, delay_ms = delay.as_millis() as u64, "wait before retry");

    tokio::select! {
        biased;
        _ = ctx.stop.cancelled() => Retry::Stop,
        _ = waiter.notified() => {
            info!(path = %path, "session recovered, retry now");
            Retry::Reconnected
        }
        _ = tokio::time::sleep(delay) => Retry::Timeout,
    }
}

/// 根路径尚未创建时等待其出现，返回 `false` 表示应当退出
async fn wait_for_creation(ctx: &WatchContext, path: &str, failures: &mut u32) -> bool {
    match ctx.guarded(ctx.client.exists_w(path)).await {
        None => false,
        Some(Ok((true, _))) => true,
        Some(Ok((false, handle))) => {
            tokio::select! {
                biased;
                _ = ctx.stop.cancelled() => false,
                _ = handle => true,
            }
        }
        Some(Err(e)) => {
            *failures = ctx.retry.next_failures(*failures);
            warn!(path = %path, error = %e, failures = *failures, "exists watch failed");
            match wait_for_retry(ctx, path, *failures).await {
                Retry::Stop => false,
                Retry::Reconnected => {
                    *failures = 0;
                    true
                }
                Retry::Timeout => true,
            }
        }
    }
}
