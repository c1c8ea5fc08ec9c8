//! 设备遥测核心：连接池、响应缓存、速率计算与聚合

pub mod aggregator;
pub mod cache;
pub mod collector;
pub mod format;
pub mod history;
pub mod pool;
pub mod rate;
pub mod sweeper;
pub mod types;

pub use aggregator::Aggregator;
pub use sweeper::Sweeper;
