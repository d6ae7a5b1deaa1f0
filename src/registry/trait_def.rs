//! 服务注册 Trait 定义

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;

use crate::discovery::ServiceRecord;
use crate::error::Result;

/// 服务注册 Trait
#[async_trait]
pub trait Registry: Send + Sync + 'static {
    /// 注册中心名称，用于日志和错误信息
    fn name(&self) -> &'static str;

    /// 注册服务实例
    async fn register(&self, record: &ServiceRecord) -> Result<()>;

    /// 注销服务实例
    async fn deregister(&self, record: &ServiceRecord) -> Result<()>;

    /// 关闭注册中心，基于它创建的 watcher 随之停止
    fn close(&self);

    fn is_closed(&self) -> bool;

    /// 转换为 `Any`，供需要具体实现的组件向下转型
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}
