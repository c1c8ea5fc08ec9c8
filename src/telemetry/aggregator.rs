//! 设备数据聚合
//!
//! 每台设备独立并发采集，单台设备的失败只影响它自己的结果。

use super::cache::{CacheCategory, ResponseCache};
use super::collector;
use super::history::BandwidthHistory;
use super::pool::{ConnectionPool, PoolConfig};
use super::rate::RateEngine;
use super::types::{
    BandwidthPoint, BandwidthSummary, DeviceSnapshot, DeviceStatus, HealthReport, QueueSummary,
};
use crate::config::{AggregatorSettings, AppConfig, DeviceConfig};
use crate::error::{AppError, Result};
use crate::protocol::{DeviceClient, DeviceSession, ProtocolError};
use futures::stream::{FuturesUnordered, Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

pub struct Aggregator {
    devices: Vec<DeviceConfig>,
    pool: Arc<ConnectionPool>,
    cache: Arc<ResponseCache>,
    rates: Arc<RateEngine>,
    history: Arc<BandwidthHistory>,
    settings: AggregatorSettings,
}

/// 给子查询的错误加上来源
fn labeled<T>(
    result: std::result::Result<T, ProtocolError>,
    what: &str,
) -> std::result::Result<T, String> {
    result.map_err(|e| format!("{}查询失败: {}", what, e))
}

impl Aggregator {
    pub fn new(
        devices: Vec<DeviceConfig>,
        pool: Arc<ConnectionPool>,
        cache: Arc<ResponseCache>,
        rates: Arc<RateEngine>,
        history: Arc<BandwidthHistory>,
        settings: AggregatorSettings,
    ) -> Self {
        Self {
            devices,
            pool,
            cache,
            rates,
            history,
            settings,
        }
    }

    /// 按配置创建全部存储
    pub fn from_config(config: &AppConfig, client: Arc<dyn DeviceClient>) -> Self {
        Self::new(
            config.devices.clone(),
            Arc::new(ConnectionPool::new(client, PoolConfig::from(&config.pool))),
            Arc::new(ResponseCache::new(&config.cache)),
            Arc::new(RateEngine::new(config.rate.min_sample_interval())),
            Arc::new(BandwidthHistory::new(config.aggregator.history_capacity)),
            config.aggregator.clone(),
        )
    }

    pub fn devices(&self) -> &[DeviceConfig] {
        &self.devices
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    fn find_device(&self, device_id: &str) -> Result<&DeviceConfig> {
        self.devices
            .iter()
            .find(|d| d.id == device_id)
            .ok_or_else(|| AppError::DeviceNotFound(device_id.to_string()))
    }

    /// 先查缓存，未命中才执行 `fetch` 并写回
    async fn cached<T, F>(
        &self,
        device_id: &str,
        category: CacheCategory,
        fetch: F,
    ) -> std::result::Result<T, ProtocolError>
    where
        T: Serialize + DeserializeOwned,
        F: Future<Output = std::result::Result<T, ProtocolError>>,
    {
        if let Some(value) = self.cache.get_as::<T>(device_id, &category).await {
            return Ok(value);
        }

        let value = fetch.await?;
        self.cache.set_as(device_id, category, &value).await;
        Ok(value)
    }

    /// 单项查询结束后归还或驱逐会话
    async fn finish<T>(
        &self,
        device: &DeviceConfig,
        handle: &Arc<dyn DeviceSession>,
        result: std::result::Result<T, ProtocolError>,
    ) -> Result<T> {
        match result {
            Ok(value) => {
                self.pool.release(&device.id).await;
                Ok(value)
            }
            Err(e) => {
                warn!(device = %device.id, "查询失败，驱逐会话: {}", e);
                self.pool.evict(&device.id, handle).await;
                Err(e.into())
            }
        }
    }

    fn offline(device: &DeviceConfig, error: &ProtocolError) -> DeviceSnapshot {
        warn!(device = %device.id, "设备离线: {}", error);
        DeviceSnapshot::empty(
            &device.id,
            device.display_name(),
            &device.host,
            DeviceStatus::Offline,
        )
        .with_message(error.to_string())
    }

    async fn errored(
        &self,
        device: &DeviceConfig,
        handle: &Arc<dyn DeviceSession>,
        message: String,
    ) -> DeviceSnapshot {
        warn!(device = %device.id, "采集失败，驱逐会话: {}", message);
        self.pool.evict(&device.id, handle).await;
        DeviceSnapshot::empty(
            &device.id,
            device.display_name(),
            &device.host,
            DeviceStatus::Errored,
        )
        .with_message(message)
    }

    /// 采集接口列表并换算速率，只在缓存未命中时调用，同时记入历史
    async fn fetch_bandwidth(
        &self,
        device_id: &str,
        session: &dyn DeviceSession,
    ) -> std::result::Result<BandwidthSummary, ProtocolError> {
        let rows = collector::fetch_interfaces(session).await?;
        let summary =
            collector::compute_bandwidth(device_id, &rows, &self.rates, self.settings.bandwidth_top_n)
                .await;
        self.history
            .record(device_id, summary.total_rx.value, summary.total_tx.value)
            .await;
        Ok(summary)
    }

    /// 单台设备的概览
    async fn overview_device(&self, device: &DeviceConfig) -> DeviceSnapshot {
        if let Some(snapshot) = self
            .cache
            .get_as::<DeviceSnapshot>(&device.id, &CacheCategory::Overview)
            .await
        {
            return snapshot;
        }

        let handle = match self.pool.acquire(device).await {
            Ok(handle) => handle,
            Err(e) => return Self::offline(device, &e),
        };
        let session = handle.as_ref();

        let (resource, sessions, queues) = tokio::join!(
            self.cached(
                &device.id,
                CacheCategory::ResourceStats,
                collector::fetch_resource(session)
            ),
            self.cached(
                &device.id,
                CacheCategory::Sessions,
                collector::fetch_session_counts(session)
            ),
            self.cached(
                &device.id,
                CacheCategory::QueueCount,
                collector::fetch_queue_count(session)
            ),
        );

        match (
            labeled(resource, "资源"),
            labeled(sessions, "会话"),
            labeled(queues, "队列"),
        ) {
            (Ok(resource), Ok(sessions), Ok(queues)) => {
                self.pool.release(&device.id).await;

                let mut snapshot = DeviceSnapshot::empty(
                    &device.id,
                    device.display_name(),
                    &device.host,
                    DeviceStatus::Online,
                );
                snapshot.resource = resource;
                snapshot.sessions = sessions;
                snapshot.queues = QueueSummary {
                    total: queues.total,
                    enabled: queues.enabled,
                    ..QueueSummary::default()
                };

                self.cache
                    .set_as(&device.id, CacheCategory::Overview, &snapshot)
                    .await;
                snapshot
            }
            (resource, sessions, queues) => {
                let message = [resource.err(), sessions.err(), queues.err()]
                    .into_iter()
                    .flatten()
                    .next()
                    .unwrap_or_default();
                self.errored(device, &handle, message).await
            }
        }
    }

    /// 按完成顺序逐台产出概览
    pub fn overview_stream(&self) -> impl Stream<Item = DeviceSnapshot> + '_ {
        self.devices
            .iter()
            .map(|device| self.overview_device(device))
            .collect::<FuturesUnordered<_>>()
    }

    /// 全部设备的概览，顺序与配置一致，长度总是等于设备数
    pub async fn fleet_overview(&self) -> Vec<DeviceSnapshot> {
        let cycle = Uuid::new_v4();
        async {
            let mut snapshots: Vec<DeviceSnapshot> = self.overview_stream().collect().await;
            snapshots.sort_by_key(|s| self.devices.iter().position(|d| d.id == s.id));

            let online = snapshots
                .iter()
                .filter(|s| s.status == DeviceStatus::Online)
                .count();
            info!("概览完成: {}/{} 台在线", online, snapshots.len());
            snapshots
        }
        .instrument(info_span!("fleet_overview", cycle = %cycle))
        .await
    }

    /// 单台设备的详情
    pub async fn device_detail(&self, device_id: &str) -> Result<DeviceSnapshot> {
        let device = self.find_device(device_id)?;

        let handle = match self.pool.acquire(device).await {
            Ok(handle) => handle,
            Err(e) => return Ok(Self::offline(device, &e)),
        };
        let session = handle.as_ref();
        let id = device.id.as_str();

        let (resource, sessions, queues, bandwidth, interfaces) = tokio::join!(
            self.cached(id, CacheCategory::ResourceStats, collector::fetch_resource(session)),
            self.cached(id, CacheCategory::Sessions, collector::fetch_session_counts(session)),
            self.cached(
                id,
                CacheCategory::QueueSummary,
                collector::fetch_queue_summary(session, self.settings.queue_display_limit)
            ),
            self.cached(id, CacheCategory::Bandwidth, self.fetch_bandwidth(id, session)),
            self.cached(
                id,
                CacheCategory::InterfaceStats,
                collector::fetch_interface_summary(session)
            ),
        );

        // 接口统计可选，但传输层错误仍需驱逐会话
        let interfaces = match interfaces {
            Err(e) if !e.is_transport() => {
                debug!(device = %id, "接口统计不可用: {}", e);
                Ok(Default::default())
            }
            other => other,
        };

        let merged = (|| {
            Ok::<_, String>((
                labeled(resource, "资源")?,
                labeled(sessions, "会话")?,
                labeled(queues, "队列")?,
                labeled(bandwidth, "带宽")?,
                labeled(interfaces, "接口")?,
            ))
        })();

        let (resource, sessions, queues, bandwidth, interfaces) = match merged {
            Ok(parts) => parts,
            Err(message) => return Ok(self.errored(device, &handle, message).await),
        };
        self.pool.release(id).await;

        let mut snapshot =
            DeviceSnapshot::empty(id, device.display_name(), &device.host, DeviceStatus::Online);
        snapshot.resource = resource;
        snapshot.sessions = sessions;
        snapshot.queues = queues;
        snapshot.bandwidth = bandwidth;
        snapshot.interfaces = interfaces;
        Ok(snapshot)
    }

    /// 只取带宽
    pub async fn device_bandwidth(&self, device_id: &str) -> Result<BandwidthSummary> {
        let device = self.find_device(device_id)?;
        if let Some(summary) = self
            .cache
            .get_as::<BandwidthSummary>(&device.id, &CacheCategory::Bandwidth)
            .await
        {
            return Ok(summary);
        }

        let handle = self.pool.acquire(device).await?;
        let result = self
            .cached(
                &device.id,
                CacheCategory::Bandwidth,
                self.fetch_bandwidth(&device.id, handle.as_ref()),
            )
            .await;
        self.finish(device, &handle, result).await
    }

    /// 只取队列
    pub async fn device_queues(&self, device_id: &str) -> Result<QueueSummary> {
        let device = self.find_device(device_id)?;
        if let Some(summary) = self
            .cache
            .get_as::<QueueSummary>(&device.id, &CacheCategory::QueueSummary)
            .await
        {
            return Ok(summary);
        }

        let handle = self.pool.acquire(device).await?;
        let result = self
            .cached(
                &device.id,
                CacheCategory::QueueSummary,
                collector::fetch_queue_summary(handle.as_ref(), self.settings.queue_display_limit),
            )
            .await;
        self.finish(device, &handle, result).await
    }

    pub async fn device_history(&self, device_id: &str) -> Result<Vec<BandwidthPoint>> {
        let device = self.find_device(device_id)?;
        Ok(self.history.get(&device.id).await)
    }

    pub async fn health(&self) -> HealthReport {
        HealthReport {
            devices: self.devices.len(),
            pooled_sessions: self.pool.len().await,
            cache_entries: self.cache.len().await,
            tracked_interfaces: self.rates.tracked().await,
            sessions: self.pool.sessions().await,
        }
    }
}
