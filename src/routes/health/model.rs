use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    alerts::{AlertRecord, ServiceStatus, SystemUsage},
    cache::CacheBackendState,
    metrics::MetricsView,
    models::RouteKey,
};

/// Ping响应
#[derive(Debug, Serialize)]
pub struct PingResponse {
    /// 服务状态
    pub status: String,
    /// 服务器时间
    pub timestamp: i64,
}

#[derive(Debug, Serialize)]
pub struct CacheHealth {
    pub backend: CacheBackendState,
    pub reachable: bool,
}

/// 服务整体健康状况
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: ServiceStatus,
    pub timestamp: DateTime<Utc>,
    pub cache: CacheHealth,
    pub system: SystemUsage,
    pub active_alerts: usize,
    pub tracked_routes: usize,
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub timestamp: DateTime<Utc>,
    pub routes: BTreeMap<RouteKey, MetricsView>,
}

#[derive(Debug, Serialize)]
pub struct AlertsResponse {
    pub timestamp: DateTime<Utc>,
    pub count: usize,
    pub alerts: Vec<AlertRecord>,
}
