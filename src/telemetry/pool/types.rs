//! 连接池相关的类型定义

use crate::config::PoolSettings;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 连接池配置
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// 空闲复用窗口，超过后下次 acquire 重新连接
    pub idle_window: Duration,

    /// 强制过期时间，由后台清理任务关闭
    pub hard_expiry: Duration,

    /// 传给协议层的连接超时
    pub connect_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            idle_window: Duration::from_secs(120),
            hard_expiry: Duration::from_secs(300), // 5 分钟
            connect_timeout: Duration::from_secs(15),
        }
    }
}

impl From<&PoolSettings> for PoolConfig {
    fn from(settings: &PoolSettings) -> Self {
        Self {
            idle_window: settings.idle_window(),
            hard_expiry: settings.hard_expiry(),
            connect_timeout: settings.connect_timeout(),
        }
    }
}

/// 池中会话的信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub device_id: String,
    pub use_count: u64,
    pub idle_seconds: u64,
    pub age_seconds: u64,
}
