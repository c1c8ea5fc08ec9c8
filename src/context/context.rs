use crate::config::AppConfig;
use crate::protocol::DeviceClient;
use crate::telemetry::{Aggregator, Sweeper};
use std::sync::Arc;

/// Context trait，定义 API 层需要的接口
pub trait IContext: Send + Sync {
    fn aggregator(&self) -> &Aggregator;
}

/// 进程级共享状态：配置和聚合器（聚合器持有连接池、缓存、速率引擎和历史）
pub struct Context {
    config: AppConfig,
    aggregator: Aggregator,
}

impl Context {
    /// 创建新的 Context 实例
    pub fn new(config: AppConfig, client: Arc<dyn DeviceClient>) -> Self {
        let aggregator = Aggregator::from_config(&config, client);
        Context { config, aggregator }
    }

    /// 基于同一个连接池和缓存的清理任务
    pub fn sweeper(&self) -> Sweeper {
        Sweeper::new(
            self.aggregator.pool().clone(),
            self.aggregator.cache().clone(),
            self.config.pool.sweep_interval(),
        )
    }
}

impl IContext for Context {
    fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use crate::protocol::mock::MockClient;

    #[tokio::test]
    async fn test_context_wires_devices() {
        let mut config = AppConfig::default();
        config.devices.push(DeviceConfig::new("r1", "10.0.0.1"));
        let ctx = Context::new(config, Arc::new(MockClient::routeros()));

        assert_eq!(ctx.aggregator().devices().len(), 1);
        assert_eq!(ctx.aggregator().health().await.devices, 1);
    }
}
