//! 后台清理任务

use super::cache::ResponseCache;
use super::pool::ConnectionPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// 周期性清理过期会话和缓存，收到关闭信号后退出
pub struct Sweeper {
    pool: Arc<ConnectionPool>,
    cache: Arc<ResponseCache>,
    interval: Duration,
}

impl Sweeper {
    pub fn new(pool: Arc<ConnectionPool>, cache: Arc<ResponseCache>, interval: Duration) -> Self {
        Self {
            pool,
            cache,
            interval,
        }
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        // interval 不接受 0
        let period = self.interval.max(Duration::from_millis(1));
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("清理任务启动，间隔 {:?}", self.interval);

        loop {
            // 关闭信号优先，避免退出过程中再触发一次清理
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let sessions = self.pool.sweep().await;
                    let entries = self.cache.sweep().await;
                    debug!("清理完成: 会话 {} 个, 缓存 {} 条", sessions, entries);
                }
            }
        }

        info!("清理任务已退出");
    }
}
