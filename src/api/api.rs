use std::future::Future;
use std::sync::Arc;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};
use crate::context::context::IContext;
use crate::error::AppError;
use crate::telemetry::types::{
    BandwidthPoint, BandwidthSummary, DeviceSnapshot, DeviceStatus, HealthReport, QueueSummary,
};

type Ctx = Arc<dyn IContext>;
type Reply<T> = (StatusCode, Json<ApiResponse<T>>);

/// 设备列表响应
#[derive(Debug, Serialize)]
pub struct DevicesResponse {
    pub devices: Vec<DeviceSnapshot>,
    pub count: usize,
    pub online: usize,
}

/// API 响应
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    fn ok(message: impl Into<String>, data: T) -> Reply<T> {
        (
            StatusCode::OK,
            Json(ApiResponse {
                success: true,
                message: message.into(),
                data: Some(data),
            }),
        )
    }

    fn error(err: AppError) -> Reply<T> {
        warn!("请求失败: {}", err);
        let status =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (
            status,
            Json(ApiResponse {
                success: false,
                message: err.to_string(),
                data: None,
            }),
        )
    }

    fn from_result(message: impl Into<String>, result: crate::error::Result<T>) -> Reply<T> {
        match result {
            Ok(data) => Self::ok(message, data),
            Err(e) => Self::error(e),
        }
    }
}

pub struct ApiServer {
    pub app: Router,
}

impl ApiServer {
    pub fn new(ctx: Ctx) -> Self {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        let app = Router::new()
            .route("/api/devices", get(Self::get_devices))
            .route("/api/devices/{id}", get(Self::get_device))
            .route("/api/devices/{id}/bandwidth", get(Self::get_bandwidth))
            .route("/api/devices/{id}/queues", get(Self::get_queues))
            .route("/api/devices/{id}/history", get(Self::get_history))
            .route("/health", get(Self::health))
            .layer(ServiceBuilder::new().layer(cors))
            .with_state(ctx);
        ApiServer { app }
    }

    /// 启动 API 服务器，`shutdown` 完成后停止接收新连接
    pub async fn run(
        self,
        bind: &str,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> crate::error::Result<()> {
        let listener = tokio::net::TcpListener::bind(bind).await?;
        info!("API 服务器运行在 http://{}", bind);

        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }

    /// 全部设备概览
    async fn get_devices(State(ctx): State<Ctx>) -> Reply<DevicesResponse> {
        debug!("收到设备概览请求");
        let devices = ctx.aggregator().fleet_overview().await;
        let online = devices
            .iter()
            .filter(|d| d.status == DeviceStatus::Online)
            .count();
        let count = devices.len();

        ApiResponse::ok(
            format!("共 {} 台设备，{} 台在线", count, online),
            DevicesResponse {
                devices,
                count,
                online,
            },
        )
    }

    /// 设备详情
    async fn get_device(State(ctx): State<Ctx>, Path(id): Path<String>) -> Reply<DeviceSnapshot> {
        debug!("收到设备详情请求: {}", id);
        ApiResponse::from_result("获取设备详情成功", ctx.aggregator().device_detail(&id).await)
    }

    async fn get_bandwidth(
        State(ctx): State<Ctx>,
        Path(id): Path<String>,
    ) -> Reply<BandwidthSummary> {
        debug!("收到带宽请求: {}", id);
        ApiResponse::from_result("获取带宽成功", ctx.aggregator().device_bandwidth(&id).await)
    }

    async fn get_queues(State(ctx): State<Ctx>, Path(id): Path<String>) -> Reply<QueueSummary> {
        debug!("收到队列请求: {}", id);
        ApiResponse::from_result("获取队列成功", ctx.aggregator().device_queues(&id).await)
    }

    async fn get_history(
        State(ctx): State<Ctx>,
        Path(id): Path<String>,
    ) -> Reply<Vec<BandwidthPoint>> {
        ApiResponse::from_result("获取带宽历史成功", ctx.aggregator().device_history(&id).await)
    }

    /// 健康检查
    async fn health(State(ctx): State<Ctx>) -> Reply<HealthReport> {
        ApiResponse::ok("ok", ctx.aggregator().health().await)
    }
}
