//! 连接池模块
//!
//! 每台设备最多持有一个存活会话，空闲窗口内复用，过期后关闭重连

mod connection_pool;
mod session_entry;
mod types;

pub use connection_pool::ConnectionPool;
pub use types::{PoolConfig, SessionInfo};
