//! 设备协议适配层
//!
//! 采集核心只通过 `DeviceClient` / `DeviceSession` 两个 trait 访问设备，
//! `RouterOsClient` 是基于 RouterOS API 的默认实现。

mod routeros;

#[cfg(test)]
pub mod mock;

pub use routeros::RouterOsClient;

use crate::config::DeviceConfig;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// 查询返回的单行数据（字段名 -> 字段值）
pub type Row = HashMap<String, String>;

/// 查询过滤条件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryFilter {
    /// 只返回指定字段
    Proplist(Vec<String>),
}

impl QueryFilter {
    pub fn proplist(fields: &[&str]) -> Self {
        Self::Proplist(fields.iter().map(|f| f.to_string()).collect())
    }

    /// 转换为 API 协议中的单个 word
    pub fn to_word(&self) -> String {
        match self {
            QueryFilter::Proplist(fields) => format!("=.proplist={}", fields.join(",")),
        }
    }
}

/// 协议层错误
#[derive(thiserror::Error, Debug)]
pub enum ProtocolError {
    #[error("连接失败: {0}")]
    Connect(String),

    #[error("认证失败: {0}")]
    Auth(String),

    #[error("超时")]
    Timeout,

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("设备返回错误: {0}")]
    Trap(String),

    #[error("会话已关闭")]
    Closed,

    #[error("协议解析失败: {0}")]
    Decode(String),
}

impl ProtocolError {
    /// 传输层错误，会话已不可用
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ProtocolError::Timeout
                | ProtocolError::Io(_)
                | ProtocolError::Closed
                | ProtocolError::Decode(_)
        )
    }
}

/// 设备协议客户端，负责建立会话
#[async_trait]
pub trait DeviceClient: Send + Sync {
    /// 连接并认证设备
    async fn connect(
        &self,
        device: &DeviceConfig,
        timeout: Duration,
    ) -> Result<Arc<dyn DeviceSession>, ProtocolError>;
}

/// 已认证的设备会话
#[async_trait]
pub trait DeviceSession: Send + Sync {
    /// 执行查询
    async fn query(&self, path: &str, filters: &[QueryFilter]) -> Result<Vec<Row>, ProtocolError>;

    /// 关闭会话（尽力而为）
    async fn close(&self) -> Result<(), ProtocolError>;
}
