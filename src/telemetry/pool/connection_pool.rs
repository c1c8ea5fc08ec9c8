//! 连接池实现
//!
//! 统一管理设备会话的建立、复用、驱逐和过期清理

use super::session_entry::PooledSession;
use super::types::{PoolConfig, SessionInfo};
use crate::config::DeviceConfig;
use crate::protocol::{DeviceClient, DeviceSession, ProtocolError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// 单台设备的会话槽位，槽位锁保证同一设备的 acquire / release / evict 串行
type Slot = Arc<Mutex<Option<PooledSession>>>;

/// 连接池
pub struct ConnectionPool {
    /// 协议客户端
    client: Arc<dyn DeviceClient>,

    /// 配置
    config: PoolConfig,

    /// 设备 ID -> 会话槽位，槽位数量受设备数约束，不回收
    slots: RwLock<HashMap<String, Slot>>,
}

impl ConnectionPool {
    /// 创建新的连接池
    pub fn new(client: Arc<dyn DeviceClient>, config: PoolConfig) -> Self {
        Self {
            client,
            config,
            slots: RwLock::new(HashMap::new()),
        }
    }

    async fn slot(&self, device_id: &str) -> Slot {
        if let Some(slot) = self.slots.read().await.get(device_id) {
            return Arc::clone(slot);
        }

        let mut slots = self.slots.write().await;
        Arc::clone(
            slots
                .entry(device_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(None))),
        )
    }

    async fn existing_slot(&self, device_id: &str) -> Option<Slot> {
        self.slots.read().await.get(device_id).cloned()
    }

    /// 获取设备会话
    ///
    /// 复用窗口内直接返回池中句柄；否则关闭旧会话并重新连接。
    /// 连接失败以 `Err` 返回，调用方应将设备视为离线，本轮不再重试。
    pub async fn acquire(
        &self,
        device: &DeviceConfig,
    ) -> Result<Arc<dyn DeviceSession>, ProtocolError> {
        let slot = self.slot(&device.id).await;
        let mut guard = slot.lock().await;
        let now = Instant::now();

        if let Some(entry) = guard.as_mut() {
            if entry.is_warm(self.config.idle_window, now) {
                debug!(device = %device.id, "复用会话 (第 {} 次)", entry.use_count + 1);
                return Ok(entry.checkout(now));
            }
        }

        if let Some(stale) = guard.take() {
            info!(
                device = %device.id,
                "会话空闲 {}s 超过复用窗口，重新连接",
                stale.idle_for(now).as_secs()
            );
            close_quietly(&stale).await;
        }

        match self.client.connect(device, self.config.connect_timeout).await {
            Ok(handle) => {
                info!(device = %device.id, "会话已建立: {}:{}", device.host, device.port);
                *guard = Some(PooledSession::new(
                    device.id.clone(),
                    Arc::clone(&handle),
                    Instant::now(),
                ));
                Ok(handle)
            }
            Err(e) => {
                warn!(device = %device.id, "连接设备失败: {}", e);
                Err(e)
            }
        }
    }

    /// 软释放：只刷新最后使用时间，会话保留在池中
    pub async fn release(&self, device_id: &str) {
        let Some(slot) = self.existing_slot(device_id).await else {
            return;
        };

        if let Some(entry) = slot.lock().await.as_mut() {
            entry.touch(Instant::now());
        }
    }

    /// 强制关闭并移除会话，用于查询失败之后
    ///
    /// 只移除与 `handle` 相同的会话；池中已换成新会话时不做处理。
    pub async fn evict(&self, device_id: &str, handle: &Arc<dyn DeviceSession>) {
        let Some(slot) = self.existing_slot(device_id).await else {
            return;
        };

        let mut guard = slot.lock().await;
        let matches = guard
            .as_ref()
            .is_some_and(|entry| Arc::ptr_eq(&entry.handle, handle));
        if !matches {
            debug!(device = %device_id, "失败的会话已不在池中，跳过驱逐");
            return;
        }

        if let Some(entry) = guard.take() {
            info!(device = %device_id, "驱逐会话");
            close_quietly(&entry).await;
        }
    }

    /// 关闭超过强制过期时间的会话，返回关闭数量
    pub async fn sweep(&self) -> usize {
        let slots: Vec<Slot> = self.slots.read().await.values().cloned().collect();
        let mut closed = 0;

        for slot in slots {
            // 槽位锁只在 acquire / release / evict 期间持有，拿不到锁的留给下一轮
            let Ok(mut guard) = slot.try_lock() else {
                continue;
            };

            let now = Instant::now();
            let expired = guard
                .as_ref()
                .is_some_and(|entry| entry.is_expired(self.config.hard_expiry, now));

            if expired {
                if let Some(entry) = guard.take() {
                    info!(
                        device = %entry.device_id,
                        "清理过期会话，空闲 {}s",
                        entry.idle_for(now).as_secs()
                    );
                    close_quietly(&entry).await;
                    closed += 1;
                }
            }
        }

        if closed > 0 {
            info!("清理了 {} 个过期会话", closed);
        }

        closed
    }

    /// 关闭全部会话，停机时调用
    pub async fn close_all(&self) {
        let slots: Vec<Slot> = self.slots.read().await.values().cloned().collect();
        for slot in slots {
            let taken = slot.lock().await.take();
            if let Some(entry) = taken {
                close_quietly(&entry).await;
            }
        }
    }

    /// 当前池中的会话数
    pub async fn len(&self) -> usize {
        let slots: Vec<Slot> = self.slots.read().await.values().cloned().collect();
        let mut count = 0;
        for slot in slots {
            if slot.lock().await.is_some() {
                count += 1;
            }
        }
        count
    }

    /// 所有池化会话的信息
    pub async fn sessions(&self) -> Vec<SessionInfo> {
        let slots: Vec<Slot> = self.slots.read().await.values().cloned().collect();
        let now = Instant::now();
        let mut infos = Vec::new();
        for slot in slots {
            if let Some(entry) = slot.lock().await.as_ref() {
                infos.push(entry.to_info(now));
            }
        }
        infos
    }
}

/// 尽力关闭，失败只记录日志
async fn close_quietly(entry: &PooledSession) {
    if let Err(e) = entry.handle.close().await {
        warn!(device = %entry.device_id, "关闭会话失败（忽略）: {}", e);
    }
}
