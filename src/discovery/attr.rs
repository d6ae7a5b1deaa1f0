//! 服务属性与过滤条件
//!
//! 服务路径（根节点下的一级子节点）的节点名就是编码后的 `ServiceAttr`，
//! 形如 `group=bj&protocol=grpc&role=provider&service=echo&version=v1`。
//! 不含 `=` 的节点名按纯服务名处理。

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, WatchError};

/// 服务角色
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServiceRole {
    /// 未指定，作为过滤条件时匹配任意角色
    #[default]
    Unknown,
    Consumer,
    Provider,
}

impl ServiceRole {
    pub fn is_unknown(&self) -> bool {
        matches!(self, ServiceRole::Unknown)
    }
}

impl fmt::Display for ServiceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceRole::Unknown => write!(f, "unknown"),
            ServiceRole::Consumer => write!(f, "consumer"),
            ServiceRole::Provider => write!(f, "provider"),
        }
    }
}

/// 服务属性
///
/// 既描述一个服务（编码进服务路径），也作为 watcher 的过滤条件：
/// 过滤条件中非空的字段必须与候选服务完全一致。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(default)]
pub struct ServiceAttr {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub group: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub protocol: String,
    #[serde(skip_serializing_if = "ServiceRole::is_unknown")]
    pub role: ServiceRole,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub service: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub version: String,
}

impl ServiceAttr {
    /// 创建只指定服务名的属性
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            ..Default::default()
        }
    }

    /// 设置分组
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    /// 设置协议
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    /// 设置版本
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// 设置角色
    pub fn with_role(mut self, role: ServiceRole) -> Self {
        self.role = role;
        self
    }

    /// 编码为服务路径的节点名
    pub fn marshal_path(&self) -> Result<String> {
        if self.service.is_empty() {
            return Err(WatchError::invalid_path("service name is empty"));
        }
        Ok(serde_urlencoded::to_string(self)?)
    }

    /// 从服务路径的节点名解码
    pub fn unmarshal_path(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(WatchError::invalid_path("empty node name"));
        }
        if !name.contains('=') {
            return Ok(Self::new(name));
        }

        let attr: ServiceAttr = serde_urlencoded::from_str(name)?;
        if attr.service.is_empty() {
            return Err(WatchError::invalid_path(format!(
                "node name {} carries no service",
                name
            )));
        }
        Ok(attr)
    }

    /// 检查候选服务是否满足过滤条件
    pub fn matches(&self, candidate: &ServiceAttr) -> bool {
        fn field_ok(filter: &str, value: &str) -> bool {
            filter.is_empty() || filter == value
        }

        field_ok(&self.group, &candidate.group)
            && field_ok(&self.service, &candidate.service)
            && field_ok(&self.protocol, &candidate.protocol)
            && field_ok(&self.version, &candidate.version)
            && (self.role.is_unknown() || self.role == candidate.role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marshal_path_skips_empty_fields() {
        let attr = ServiceAttr::new("echo")
            .with_group("bj")
            .with_role(ServiceRole::Provider);
        let name = attr.marshal_path().unwrap();
        assert_eq!(name, "group=bj&role=provider&service=echo");
        assert_eq!(ServiceAttr::unmarshal_path(&name).unwrap(), attr);
    }

    #[test]
    fn test_unmarshal_plain_service_name() {
        let attr = ServiceAttr::unmarshal_path("svc-A").unwrap();
        assert_eq!(attr.service, "svc-A");
        assert!(attr.role.is_unknown());
    }

    #[test]
    fn test_unmarshal_rejects_bad_names() {
        assert!(ServiceAttr::unmarshal_path("").is_err());
        assert!(ServiceAttr::unmarshal_path("group=bj&version=v1").is_err());
        assert!(ServiceAttr::unmarshal_path("service=echo&role=leader").is_err());
        assert!(ServiceAttr::new("").marshal_path().is_err());
    }

    #[test]
    fn test_escaped_values() {
        let attr = ServiceAttr::new("com.demo/echo").with_version("1.0 beta");
        let name = attr.marshal_path().unwrap();
        assert!(!name.contains('/'));
        assert_eq!(ServiceAttr::unmarshal_path(&name).unwrap(), attr);
    }

    #[test]
    fn test_filter_matches() {
        let candidate = ServiceAttr::new("echo")
            .with_group("bj")
            .with_protocol("grpc")
            .with_version("v1")
            .with_role(ServiceRole::Provider);

        assert!(ServiceAttr::default().matches(&candidate));
        assert!(ServiceAttr::new("echo").matches(&candidate));
        assert!(
            ServiceAttr::new("echo")
                .with_role(ServiceRole::Provider)
                .with_version("v1")
                .matches(&candidate)
        );
        assert!(!ServiceAttr::new("ping").matches(&candidate));
        assert!(
            !ServiceAttr::new("echo")
                .with_role(ServiceRole::Consumer)
                .matches(&candidate)
        );
        assert!(!ServiceAttr::new("echo").with_group("sh").matches(&candidate));
    }
}
