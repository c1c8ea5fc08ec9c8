//! 带宽历史
//!
//! 每台设备保留最近若干个汇总点，只存内存，不落盘。

use super::types::BandwidthPoint;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

/// 滚动窗口的带宽历史
pub struct BandwidthHistory {
    capacity: usize,
    points: RwLock<HashMap<String, VecDeque<BandwidthPoint>>>,
}

impl BandwidthHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            points: RwLock::new(HashMap::new()),
        }
    }

    /// 追加一个点，超出容量时丢弃最旧的
    pub async fn record(&self, device_id: &str, rx_bps: u64, tx_bps: u64) {
        let point = BandwidthPoint {
            timestamp: Utc::now().timestamp(),
            rx_bps,
            tx_bps,
        };

        let mut points = self.points.write().await;
        let window = points
            .entry(device_id.to_string())
            .or_insert_with(|| VecDeque::with_capacity(self.capacity));
        if window.len() == self.capacity {
            window.pop_front();
        }
        window.push_back(point);
    }

    /// 按时间顺序返回设备的历史点
    pub async fn get(&self, device_id: &str) -> Vec<BandwidthPoint> {
        self.points
            .read()
            .await
            .get(device_id)
            .map(|w| w.iter().copied().collect())
            .unwrap_or_default()
    }
}
