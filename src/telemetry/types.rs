//! 采集结果的类型定义
//!
//! 部分失败时字段取零值，不省略字段

use super::format::{format_duration, Quantity};
use super::pool::SessionInfo;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 设备状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    /// 在线，数据完整
    Online,
    /// 无法连接或认证失败
    Offline,
    /// 已连接但查询失败
    Errored,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceStatus::Online => write!(f, "在线"),
            DeviceStatus::Offline => write!(f, "离线"),
            DeviceStatus::Errored => write!(f, "错误"),
        }
    }
}

/// 系统资源
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceMetrics {
    pub identity: String,
    pub board_name: String,
    pub architecture: String,
    pub version: String,
    pub uptime_secs: u64,
    pub uptime: String,
    pub cpu_load: u8,
    pub memory_total: Quantity,
    pub memory_used: Quantity,
    pub memory_used_percent: f64,
    pub disk_total: Quantity,
    pub disk_used: Quantity,
    pub disk_used_percent: f64,
    /// 摄氏度，设备不支持时为 0
    pub temperature: f64,
    /// 伏特，设备不支持时为 0
    pub voltage: f64,
}

impl ResourceMetrics {
    pub fn set_uptime(&mut self, secs: u64) {
        self.uptime_secs = secs;
        self.uptime = format_duration(secs);
    }

    pub fn set_memory(&mut self, total: u64, free: u64) {
        let used = total.saturating_sub(free);
        self.memory_total = Quantity::bytes(total);
        self.memory_used = Quantity::bytes(used);
        self.memory_used_percent = percent(used, total);
    }

    pub fn set_disk(&mut self, total: u64, free: u64) {
        let used = total.saturating_sub(free);
        self.disk_total = Quantity::bytes(total);
        self.disk_used = Quantity::bytes(used);
        self.disk_used_percent = percent(used, total);
    }
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (part as f64 * 1000.0 / total as f64).round() / 10.0
}

/// 活跃会话数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCounts {
    pub ppp: u32,
    pub hotspot: u32,
    pub total: u32,
}

impl SessionCounts {
    pub fn new(ppp: u32, hotspot: u32) -> Self {
        Self {
            ppp,
            hotspot,
            total: ppp + hotspot,
        }
    }
}

/// 单条简单队列
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub name: String,
    pub target: String,
    pub disabled: bool,
    pub max_upload: Quantity,
    pub max_download: Quantity,
    pub upload_bytes: Quantity,
    pub download_bytes: Quantity,
}

/// 队列汇总，合计基于全部队列，列表只保留前若干条
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueSummary {
    pub total: usize,
    pub enabled: usize,
    pub total_max_upload: Quantity,
    pub total_max_download: Quantity,
    pub total_upload_bytes: Quantity,
    pub total_download_bytes: Quantity,
    pub truncated: bool,
    pub queues: Vec<QueueEntry>,
}

/// 队列数量（概览用的轻量查询结果）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCount {
    pub total: usize,
    pub enabled: usize,
}

/// 单个接口的带宽
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterfaceBandwidth {
    pub name: String,
    pub interface_type: String,
    pub running: bool,
    pub rx_rate: Quantity,
    pub tx_rate: Quantity,
    pub rx_bytes: Quantity,
    pub tx_bytes: Quantity,
}

/// 带宽汇总，合计基于全部纳入统计的接口，列表按速率排序截断
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BandwidthSummary {
    pub interface_count: usize,
    pub total_rx: Quantity,
    pub total_tx: Quantity,
    pub interfaces: Vec<InterfaceBandwidth>,
}

/// 接口数量统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceSummary {
    pub total: usize,
    pub running: usize,
    pub disabled: usize,
}

/// 单台设备的聚合结果，每轮新建，返回后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub id: String,
    pub name: String,
    pub host: String,
    pub status: DeviceStatus,
    /// 离线或错误时的原因
    pub message: Option<String>,
    pub resource: ResourceMetrics,
    pub sessions: SessionCounts,
    pub queues: QueueSummary,
    pub bandwidth: BandwidthSummary,
    pub interfaces: InterfaceSummary,
    pub captured_at: DateTime<Utc>,
}

impl DeviceSnapshot {
    /// 全零的快照
    pub fn empty(id: &str, name: &str, host: &str, status: DeviceStatus) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            host: host.to_string(),
            status,
            message: None,
            resource: ResourceMetrics::default(),
            sessions: SessionCounts::default(),
            queues: QueueSummary::default(),
            bandwidth: BandwidthSummary::default(),
            interfaces: InterfaceSummary::default(),
            captured_at: Utc::now(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// 带宽历史中的一个点
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandwidthPoint {
    /// Unix 时间戳（秒）
    pub timestamp: i64,
    pub rx_bps: u64,
    pub tx_bps: u64,
}

/// 健康检查结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub devices: usize,
    pub pooled_sessions: usize,
    pub cache_entries: usize,
    pub tracked_interfaces: usize,
    pub sessions: Vec<SessionInfo>,
}
