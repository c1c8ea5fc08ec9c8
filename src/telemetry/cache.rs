//! 响应缓存
//!
//! 按 (设备, 类别) 缓存查询结果，减少重复的设备往返

use crate::config::CacheSettings;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

/// 缓存类别，每个类别有独立的新鲜度
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheCategory {
    Overview,
    Bandwidth,
    QueueSummary,
    QueueCount,
    InterfaceStats,
    ResourceStats,
    Sessions,
}

impl CacheCategory {
    pub fn name(&self) -> &'static str {
        match self {
            CacheCategory::Overview => "overview",
            CacheCategory::Bandwidth => "bandwidth",
            CacheCategory::QueueSummary => "queue-summary",
            CacheCategory::QueueCount => "queue-count",
            CacheCategory::InterfaceStats => "interface-stats",
            CacheCategory::ResourceStats => "resource-stats",
            CacheCategory::Sessions => "sessions",
        }
    }

    /// 内置 TTL，未列出的类别返回 None
    fn builtin_ttl(&self) -> Option<Duration> {
        let ms = match self {
            CacheCategory::Overview => 3000,
            CacheCategory::Bandwidth => 2000,
            CacheCategory::QueueSummary => 10_000,
            CacheCategory::InterfaceStats => 5000,
            CacheCategory::ResourceStats => 3000,
            _ => return None,
        };
        Some(Duration::from_millis(ms))
    }
}

impl fmt::Display for CacheCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// 缓存条目
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: serde_json::Value,
    pub captured_at: Instant,
    pub category: CacheCategory,
}

type CacheKey = (String, CacheCategory);

/// 响应缓存
pub struct ResponseCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    ttl_overrides: HashMap<String, Duration>,
    default_ttl: Duration,
    hard_ceiling: Duration,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(&CacheSettings::default())
    }
}

impl ResponseCache {
    pub fn new(settings: &CacheSettings) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl_overrides: settings
                .ttl_ms
                .iter()
                .map(|(name, ms)| (name.clone(), Duration::from_millis(*ms)))
                .collect(),
            default_ttl: Duration::from_millis(settings.default_ttl_ms),
            hard_ceiling: Duration::from_secs(settings.hard_ceiling_secs),
        }
    }

    /// 类别的有效 TTL：配置覆盖 > 内置值 > 默认值
    pub fn ttl(&self, category: &CacheCategory) -> Duration {
        self.ttl_overrides
            .get(category.name())
            .copied()
            .or_else(|| category.builtin_ttl())
            .unwrap_or(self.default_ttl)
    }

    fn is_fresh(&self, entry: &CacheEntry, now: Instant) -> bool {
        let age = now.saturating_duration_since(entry.captured_at);
        age < self.ttl(&entry.category) && age < self.hard_ceiling
    }

    /// 读取缓存，过期视为未命中
    pub async fn get(&self, device_id: &str, category: &CacheCategory) -> Option<serde_json::Value> {
        let entries = self.entries.read().await;
        let entry = entries.get(&(device_id.to_string(), category.clone()))?;

        if self.is_fresh(entry, Instant::now()) {
            debug!(device = %device_id, "缓存命中: {}", category);
            Some(entry.value.clone())
        } else {
            None
        }
    }

    /// 写入缓存，覆盖同键旧值
    pub async fn set(&self, device_id: &str, category: CacheCategory, value: serde_json::Value) {
        let entry = CacheEntry {
            value,
            captured_at: Instant::now(),
            category: category.clone(),
        };
        self.entries
            .write()
            .await
            .insert((device_id.to_string(), category), entry);
    }

    /// 读取并反序列化，格式不符视为未命中
    pub async fn get_as<T: DeserializeOwned>(
        &self,
        device_id: &str,
        category: &CacheCategory,
    ) -> Option<T> {
        let value = self.get(device_id, category).await?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(device = %device_id, "缓存内容无法解析 ({}): {}", category, e);
                None
            }
        }
    }

    /// 序列化后写入
    pub async fn set_as<T: Serialize>(&self, device_id: &str, category: CacheCategory, value: &T) {
        match serde_json::to_value(value) {
            Ok(v) => self.set(device_id, category, v).await,
            Err(e) => warn!(device = %device_id, "缓存写入失败 ({}): {}", category, e),
        }
    }

    /// 移除超过硬上限的条目，返回移除数量
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| now.saturating_duration_since(entry.captured_at) < self.hard_ceiling);
        let removed = before - entries.len();

        if removed > 0 {
            debug!("清理了 {} 条过期缓存", removed);
        }

        removed
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
