//! 服务发现数据模型
//!
//! 服务属性（过滤条件）、实例节点中的服务记录，以及推送给消费方的事件。

pub mod attr;
pub mod event;
pub mod record;

pub use attr::{ServiceAttr, ServiceRole};
pub use event::{EventKind, EventResult};
pub use record::ServiceRecord;
