//! 推送给消费方的服务变更事件

use std::fmt;

use crate::discovery::record::ServiceRecord;

/// 事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// 实例上线（可能重复投递，消费方应按 upsert 处理）
    Added,
    /// 实例下线
    Removed,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Added => write!(f, "added"),
            EventKind::Removed => write!(f, "removed"),
        }
    }
}

/// 事件结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventResult {
    pub kind: EventKind,
    pub record: ServiceRecord,
}

impl EventResult {
    pub fn added(record: ServiceRecord) -> Self {
        Self {
            kind: EventKind::Added,
            record,
        }
    }

    pub fn removed(record: ServiceRecord) -> Self {
        Self {
            kind: EventKind::Removed,
            record,
        }
    }

    pub fn is_added(&self) -> bool {
        self.kind == EventKind::Added
    }
}
