//! 服务记录定义
//!
//! 实例节点保存的就是 JSON 编码后的 `ServiceRecord`

use std::collections::HashMap;
use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::discovery::attr::ServiceAttr;
use crate::error::{Result, WatchError};

/// 服务记录（一个运行中的服务实例）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceRecord {
    /// 服务属性（用于过滤）
    pub attr: ServiceAttr,

    /// 实例 ID，同时是实例节点的节点名
    pub instance_id: String,

    /// 服务地址
    pub address: SocketAddr,

    /// 元数据
    #[serde(default)]
    pub metadata: HashMap<String, String>,

    /// 权重（用于负载均衡）
    #[serde(default = "default_weight")]
    pub weight: u32,

    /// 注册时间
    pub registered_at: DateTime<Utc>,
}

fn default_weight() -> u32 {
    100
}

impl ServiceRecord {
    /// 创建新的服务记录，实例 ID 随机生成
    pub fn new(attr: ServiceAttr, address: SocketAddr) -> Self {
        Self {
            attr,
            instance_id: uuid::Uuid::new_v4().to_string(),
            address,
            metadata: HashMap::new(),
            weight: default_weight(),
            registered_at: Utc::now(),
        }
    }

    /// 设置实例 ID
    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = instance_id.into();
        self
    }

    /// 添加元数据
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// 设置权重
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// 实例节点的节点名
    pub fn node_name(&self) -> &str {
        &self.instance_id
    }

    /// 编码为节点数据
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.instance_id.is_empty() || self.instance_id.contains('/') {
            return Err(WatchError::invalid_record(format!(
                "instance id {:?} can not be used as a node name",
                self.instance_id
            )));
        }
        serde_json::to_vec(self).map_err(|e| WatchError::invalid_record(e.to_string()))
    }

    /// 从节点数据解码
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(WatchError::invalid_record("empty node data"));
        }
        Ok(serde_json::from_slice(data)?)
    }
}
