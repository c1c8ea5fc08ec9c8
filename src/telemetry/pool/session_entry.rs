//! 池中的单个会话条目

use super::types::SessionInfo;
use crate::protocol::DeviceSession;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// 池化会话，句柄由池独占，只能通过显式关闭释放
pub struct PooledSession {
    /// 设备 ID
    pub device_id: String,

    /// 协议会话句柄
    pub handle: Arc<dyn DeviceSession>,

    /// 创建时间
    pub created_at: Instant,

    /// 最后使用时间
    pub last_used_at: Instant,

    /// 被取用次数
    pub use_count: u64,
}

impl PooledSession {
    /// 连接成功后创建条目，本次取用计为第一次
    pub fn new(device_id: String, handle: Arc<dyn DeviceSession>, now: Instant) -> Self {
        Self {
            device_id,
            handle,
            created_at: now,
            last_used_at: now,
            use_count: 1,
        }
    }

    /// 更新最后使用时间
    pub fn touch(&mut self, now: Instant) {
        self.last_used_at = now;
    }

    /// 取用：更新时间并计数
    pub fn checkout(&mut self, now: Instant) -> Arc<dyn DeviceSession> {
        self.touch(now);
        self.use_count += 1;
        Arc::clone(&self.handle)
    }

    /// 空闲时长
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_used_at)
    }

    /// 是否仍在复用窗口内
    pub fn is_warm(&self, idle_window: Duration, now: Instant) -> bool {
        self.idle_for(now) < idle_window
    }

    /// 是否超过强制过期时间
    pub fn is_expired(&self, hard_expiry: Duration, now: Instant) -> bool {
        self.idle_for(now) > hard_expiry
    }

    pub fn to_info(&self, now: Instant) -> SessionInfo {
        SessionInfo {
            device_id: self.device_id.clone(),
            use_count: self.use_count,
            idle_seconds: self.idle_for(now).as_secs(),
            age_seconds: now.saturating_duration_since(self.created_at).as_secs(),
        }
    }
}
