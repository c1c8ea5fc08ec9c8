mod api;
mod config;
mod context;
mod error;
mod logger;
mod protocol;
mod telemetry;

use std::sync::Arc;
use anyhow::Context as _;
use tokio::sync::watch;
use tracing::{error, info};

use config::AppConfig;
use context::context::{Context, IContext};
use protocol::RouterOsClient;

const CONFIG_ENV: &str = "FLEETMON_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Ctrl-C 或 SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("监听 Ctrl-C 失败: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("监听 SIGTERM 失败: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("收到停止信号，开始关闭...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path =
        std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = AppConfig::from_file_with_env(&config_path)
        .with_context(|| format!("加载配置失败: {}", config_path))?;

    let _guard = logger::init(&config.server.log_dir).context("初始化日志失败")?;
    info!(
        "启动设备采集服务，配置 {}，共 {} 台设备",
        config_path,
        config.devices.len()
    );

    let bind = config.server.bind.clone();
    let ctx = Arc::new(Context::new(config, Arc::new(RouterOsClient::new())));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = ctx.sweeper().spawn(shutdown_rx);

    let api_server = api::api::ApiServer::new(ctx.clone() as Arc<dyn IContext>);
    let served = api_server.run(&bind, shutdown_signal()).await;

    // 先停清理任务，再关闭池中会话
    let _ = shutdown_tx.send(true);
    if let Err(e) = sweeper.await {
        error!("清理任务异常退出: {:?}", e);
    }
    ctx.aggregator().pool().close_all().await;
    info!("服务已停止");

    served.context("API 服务器运行失败")
}
