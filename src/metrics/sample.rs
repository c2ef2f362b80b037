use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::RouteKey;

/// 单次请求的原始样本，记录后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSample {
    pub timestamp: DateTime<Utc>,
    pub route: RouteKey,
    pub duration_ms: f64,
    pub status_code: u16,
    pub is_error: bool,
}

impl RequestSample {
    pub fn new(route: RouteKey, duration_ms: f64, status_code: u16, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            route,
            duration_ms: if duration_ms.is_finite() { duration_ms.max(0.0) } else { 0.0 },
            status_code,
            is_error: status_code >= 400,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method;

    #[test]
    fn classifies_4xx_and_5xx_as_errors() {
        let route = RouteKey::new(&Method::GET, "/events");
        let now = Utc::now();
        assert!(!RequestSample::new(route.clone(), 5.0, 399, now).is_error);
        assert!(RequestSample::new(route.clone(), 5.0, 400, now).is_error);
        assert!(RequestSample::new(route.clone(), 5.0, 503, now).is_error);
        assert_eq!(RequestSample::new(route, f64::NAN, 200, now).duration_ms, 0.0);
    }
}
