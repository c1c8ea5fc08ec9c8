//! 日志初始化：控制台 + 按天滚动的文件

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_DIRECTIVES: &str = "fleetmon_rs=debug,axum=info";
const FILE_PREFIX: &str = "fleetmon.log";

/// 默认过滤规则，`RUST_LOG` 优先
fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}

/// 初始化全局日志，返回的 guard 需要持有到进程退出，否则文件日志会丢失
pub fn init(log_dir: impl AsRef<Path>) -> std::io::Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir.as_ref())?;

    let appender = tracing_appender::rolling::daily(log_dir, FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .try_init()
        .map_err(|e| std::io::Error::other(e.to_string()))?;

    Ok(guard)
}
