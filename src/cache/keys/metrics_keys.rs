use chrono::{DateTime, Utc};

use super::{CacheKeyBuilder, glob_escape};
use crate::models::RouteKey;

/// 指标镜像键前缀
pub const METRICS_PREFIX: &str = "metrics";

/// 单条样本的镜像键 `metrics:{route}:{timestamp_nanos}`
pub fn metrics_sample_key(route: &RouteKey, at: DateTime<Utc>) -> String {
    let nanos = at
        .timestamp_nanos_opt()
        .unwrap_or_else(|| at.timestamp_micros().saturating_mul(1_000));
    CacheKeyBuilder::new(METRICS_PREFIX)
        .segment(route.as_str())
        .segment(nanos.to_string())
        .build()
}

/// 匹配某个路由所有镜像样本的模式
pub fn metrics_route_pattern(route: &RouteKey) -> String {
    format!("{}:{}:*", METRICS_PREFIX, glob_escape(route.as_str()))
}

/// 匹配所有镜像样本的模式
pub fn metrics_pattern() -> String {
    format!("{}:*", METRICS_PREFIX)
}
