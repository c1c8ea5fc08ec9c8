//! 接口速率计算
//!
//! 把设备上单调递增的字节计数器换算成 bit/s。计数器变小按设备重启处理，
//! 取当前值作为重启以来的增量。

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// 单个 (设备, 接口) 的上一次采样
#[derive(Debug, Clone)]
pub struct RateSample {
    pub last_rx_bytes: u64,
    pub last_tx_bytes: u64,
    /// 上一次有效采样得到的增量，采样过密时复用
    pub last_rx_delta: u64,
    pub last_tx_delta: u64,
    pub last_sample_at: Instant,
}

/// 速率结果（bit/s）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceRate {
    pub rx_bps: u64,
    pub tx_bps: u64,
}

impl InterfaceRate {
    pub fn total(&self) -> u64 {
        self.rx_bps.saturating_add(self.tx_bps)
    }
}

fn bits_per_second(delta: u64, elapsed_secs: f64) -> u64 {
    if elapsed_secs <= 0.0 {
        return 0;
    }
    (delta as f64 * 8.0 / elapsed_secs).round().max(0.0) as u64
}

fn counter_delta(current: u64, last: u64) -> u64 {
    if current >= last { current - last } else { current }
}

/// 速率引擎
pub struct RateEngine {
    samples: Mutex<HashMap<(String, String), RateSample>>,
    min_sample_interval: Duration,
}

impl Default for RateEngine {
    fn default() -> Self {
        Self::new(Duration::from_millis(2000))
    }
}

impl RateEngine {
    pub fn new(min_sample_interval: Duration) -> Self {
        Self {
            samples: Mutex::new(HashMap::new()),
            min_sample_interval,
        }
    }

    /// 计算接口当前速率
    ///
    /// 首次见到的接口只记录计数器并返回 0。距上次采样不足最小间隔时，
    /// 不更新采样，用上次的增量除以新的间隔近似。
    pub async fn compute_rate(
        &self,
        device_id: &str,
        interface_name: &str,
        current_rx_bytes: u64,
        current_tx_bytes: u64,
    ) -> InterfaceRate {
        let now = Instant::now();
        let key = (device_id.to_string(), interface_name.to_string());
        let mut samples = self.samples.lock().await;

        let Some(sample) = samples.get_mut(&key) else {
            samples.insert(
                key,
                RateSample {
                    last_rx_bytes: current_rx_bytes,
                    last_tx_bytes: current_tx_bytes,
                    last_rx_delta: 0,
                    last_tx_delta: 0,
                    last_sample_at: now,
                },
            );
            return InterfaceRate::default();
        };

        let elapsed = now.saturating_duration_since(sample.last_sample_at);
        let elapsed_secs = elapsed.as_secs_f64();

        // TODO: 过密采样用旧增量除以新间隔，结果偏离真实速率；待确认是否改为直接返回上次速率
        if elapsed < self.min_sample_interval {
            return InterfaceRate {
                rx_bps: bits_per_second(sample.last_rx_delta, elapsed_secs),
                tx_bps: bits_per_second(sample.last_tx_delta, elapsed_secs),
            };
        }

        let rx_delta = counter_delta(current_rx_bytes, sample.last_rx_bytes);
        let tx_delta = counter_delta(current_tx_bytes, sample.last_tx_bytes);

        if current_rx_bytes < sample.last_rx_bytes || current_tx_bytes < sample.last_tx_bytes {
            debug!(
                device = %device_id,
                "接口 {} 计数器回退，按重启处理",
                interface_name
            );
        }

        sample.last_rx_bytes = current_rx_bytes;
        sample.last_tx_bytes = current_tx_bytes;
        sample.last_rx_delta = rx_delta;
        sample.last_tx_delta = tx_delta;
        sample.last_sample_at = now;

        InterfaceRate {
            rx_bps: bits_per_second(rx_delta, elapsed_secs),
            tx_bps: bits_per_second(tx_delta, elapsed_secs),
        }
    }

    /// 已跟踪的接口数
    pub async fn tracked(&self) -> usize {
        self.samples.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_sample_is_zero() {
        let engine = RateEngine::default();
        let rate = engine.compute_rate("r1", "ether1", 123_456, 789).await;
        assert_eq!(rate, InterfaceRate::default());
        assert_eq!(engine.tracked().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_normal_delta() {
        let engine = RateEngine::default();
        engine.compute_rate("r1", "ether1", 1000, 500).await;

        tokio::time::advance(Duration::from_secs(2)).await;
        let rate = engine.compute_rate("r1", "ether1", 2000, 1500).await;

        assert_eq!(rate.rx_bps, 4000);
        assert_eq!(rate.tx_bps, 4000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_counter_reset_uses_current_value() {
        let engine = RateEngine::default();
        engine.compute_rate("r1", "ether1", 5000, 5000).await;

        tokio::time::advance(Duration::from_secs(2)).await;
        let rate = engine.compute_rate("r1", "ether1", 200, 6000).await;

        assert_eq!(rate.rx_bps, 800);
        assert_eq!(rate.tx_bps, 4000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_too_soon_reuses_previous_delta() {
        let engine = RateEngine::default();
        engine.compute_rate("r1", "ether1", 1000, 0).await;
        tokio::time::advance(Duration::from_secs(2)).await;
        engine.compute_rate("r1", "ether1", 2000, 0).await;

        // 1 秒后再次查询：沿用 1000 字节增量，间隔按 1 秒算
        tokio::time::advance(Duration::from_secs(1)).await;
        let rate = engine.compute_rate("r1", "ether1", 999_999, 0).await;
        assert_eq!(rate.rx_bps, 8000);

        // 采样未更新，距上次有效采样满 2 秒后按原基准计算
        tokio::time::advance(Duration::from_secs(1)).await;
        let rate = engine.compute_rate("r1", "ether1", 3000, 0).await;
        assert_eq!(rate.rx_bps, 4000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let engine = RateEngine::default();
        engine.compute_rate("r1", "ether1", 1000, 0).await;
        tokio::time::advance(Duration::from_secs(2)).await;

        let other = engine.compute_rate("r2", "ether1", 9000, 0).await;
        assert_eq!(other, InterfaceRate::default());

        let rate = engine.compute_rate("r1", "ether1", 1500, 0).await;
        assert_eq!(rate.rx_bps, 2000);
    }
}
