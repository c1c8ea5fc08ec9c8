//! 配置模块
//!
//! 从 TOML 文件加载采集器配置，支持环境变量覆盖

mod app_config;

pub use app_config::{
    AggregatorSettings, AppConfig, CacheSettings, DeviceConfig, PoolSettings,
};
