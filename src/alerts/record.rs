use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::models::RouteKey;

/// 系统级告警使用的路由名
pub const SYSTEM_ROUTE: &str = "system";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
    Critical,
}

/// 被检查的指标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertMetric {
    AverageResponseTime,
    P95ResponseTime,
    ErrorRate,
    RequestRate,
    CpuUsage,
    MemoryUsage,
}

impl AlertMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertMetric::AverageResponseTime => "average_response_time",
            AlertMetric::P95ResponseTime => "p95_response_time",
            AlertMetric::ErrorRate => "error_rate",
            AlertMetric::RequestRate => "request_rate",
            AlertMetric::CpuUsage => "cpu_usage",
            AlertMetric::MemoryUsage => "memory_usage",
        }
    }
}

impl fmt::Display for AlertMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一次阈值突破；不做去重，过期后在读取时被过滤掉
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertRecord {
    pub route: RouteKey,
    pub metric: AlertMetric,
    pub observed_value: f64,
    pub threshold: f64,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
}

impl AlertRecord {
    pub fn message(&self) -> String {
        format!(
            "{} for {} is {:.3} (threshold {:.3})",
            self.metric, self.route, self.observed_value, self.threshold
        )
    }
}
