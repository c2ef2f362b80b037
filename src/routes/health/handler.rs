use axum::{extract::State, http::StatusCode, response::IntoResponse};

use super::model::{
    AlertsResponse, CacheHealth, HealthResponse, MetricsResponse, PingResponse,
};
use crate::{AppState, alerts::ServiceStatus, utils::success_to_api_response};

/// 存活探针
pub async fn ping() -> impl IntoResponse {
    let now = chrono::Utc::now();

    (
        StatusCode::OK,
        success_to_api_response(PingResponse {
            status: "ok".to_string(),
            timestamp: now.timestamp(),
        }),
    )
}

// 服务健康状态：资源使用率、缓存后端、活动告警
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let system = state.system.latest();
    let alerts = state.alerts.active_alerts();
    let status = ServiceStatus::assess(
        &system,
        state.alerts.thresholds(),
        state.cache.is_demoted(),
        &alerts,
    );

    let response = HealthResponse {
        status,
        timestamp: state.clock.now(),
        cache: CacheHealth {
            backend: state.cache.backend_state(),
            reachable: state.cache.health_check().await,
        },
        system,
        active_alerts: alerts.len(),
        tracked_routes: state.metrics.route_count(),
    };

    let code = match status {
        ServiceStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (code, success_to_api_response(response))
}

// 各路由的指标快照，只读
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let routes = state
        .metrics
        .merged_snapshot_all()
        .await
        .into_iter()
        .map(|(route, metrics)| (route, metrics.view()))
        .collect();

    success_to_api_response(MetricsResponse {
        timestamp: state.clock.now(),
        routes,
    })
}

// 当前告警窗口内的告警
pub async fn alerts(State(state): State<AppState>) -> impl IntoResponse {
    let alerts = state.alerts.active_alerts();

    success_to_api_response(AlertsResponse {
        timestamp: state.clock.now(),
        count: alerts.len(),
        alerts,
    })
}
