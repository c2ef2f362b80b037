pub mod health;

use axum::{Router, routing::get};

use crate::AppState;

/// 运维接口：存活探针、健康状况、指标与告警
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/ping", get(health::ping))
        .route("/health", get(health::health))
        .route("/health/metrics", get(health::metrics))
        .route("/health/alerts", get(health::alerts))
}
