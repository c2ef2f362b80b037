use chrono::{DateTime, Utc};
use serde::Serialize;

use super::sample::RequestSample;

/// 某个路由在当前窗口内的聚合视图，延迟单位为毫秒
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metrics {
    pub sample_count: usize,
    pub error_count: usize,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub max_latency_ms: f64,
    pub min_latency_ms: f64,
    pub error_rate: f64,
    pub requests_per_second: f64,
    pub oldest: DateTime<Utc>,
    pub newest: DateTime<Utc>,
}

/// 对外暴露的指标投影
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsView {
    pub average_response_time: f64,
    pub p95_response_time: f64,
    pub max_response_time: f64,
    pub min_response_time: f64,
    pub error_rate: f64,
    pub request_rate: f64,
    pub sample_count: usize,
}

impl Metrics {
    /// 空窗口返回 None，而不是全零的指标
    pub fn from_samples<'a, I>(samples: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a RequestSample>,
    {
        let samples: Vec<&RequestSample> = samples.into_iter().collect();
        if samples.is_empty() {
            return None;
        }

        let count = samples.len();
        let mut durations: Vec<f64> = samples.iter().map(|s| s.duration_ms).collect();
        durations.sort_by(|a, b| a.total_cmp(b));

        let error_count = samples.iter().filter(|s| s.is_error).count();
        let sum: f64 = durations.iter().sum();
        let oldest = samples.iter().map(|s| s.timestamp).min()?;
        let newest = samples.iter().map(|s| s.timestamp).max()?;

        Some(Self {
            sample_count: count,
            error_count,
            avg_latency_ms: sum / count as f64,
            p95_latency_ms: durations[nearest_rank_p95(count)],
            max_latency_ms: durations[count - 1],
            min_latency_ms: durations[0],
            error_rate: error_count as f64 / count as f64,
            requests_per_second: requests_per_second(count, oldest, newest),
            oldest,
            newest,
        })
    }

    /// 合并两个来源：线性指标按样本数加权，p95/max 取大，min 取小
    pub fn merge(&self, other: &Metrics) -> Metrics {
        let count = self.sample_count + other.sample_count;
        let weighted = |a: f64, b: f64| {
            (a * self.sample_count as f64 + b * other.sample_count as f64) / count as f64
        };
        let oldest = self.oldest.min(other.oldest);
        let newest = self.newest.max(other.newest);

        Metrics {
            sample_count: count,
            error_count: self.error_count + other.error_count,
            avg_latency_ms: weighted(self.avg_latency_ms, other.avg_latency_ms),
            p95_latency_ms: self.p95_latency_ms.max(other.p95_latency_ms),
            max_latency_ms: self.max_latency_ms.max(other.max_latency_ms),
            min_latency_ms: self.min_latency_ms.min(other.min_latency_ms),
            error_rate: weighted(self.error_rate, other.error_rate),
            requests_per_second: requests_per_second(count, oldest, newest),
            oldest,
            newest,
        }
    }

    pub fn view(&self) -> MetricsView {
        MetricsView {
            average_response_time: self.avg_latency_ms,
            p95_response_time: self.p95_latency_ms,
            max_response_time: self.max_latency_ms,
            min_response_time: self.min_latency_ms,
            error_rate: self.error_rate,
            request_rate: self.requests_per_second,
            sample_count: self.sample_count,
        }
    }
}

/// 最近秩法：升序排序后取下标 `floor(0.95 * n)`，用整数运算避免浮点误差
fn nearest_rank_p95(count: usize) -> usize {
    ((count * 95) / 100).min(count.saturating_sub(1))
}

/// 少于两个样本或时间跨度为零时为 0
fn requests_per_second(count: usize, oldest: DateTime<Utc>, newest: DateTime<Utc>) -> f64 {
    if count < 2 {
        return 0.0;
    }
    let span_secs = (newest - oldest).num_microseconds().unwrap_or(i64::MAX) as f64 / 1_000_000.0;
    if span_secs <= 0.0 {
        return 0.0;
    }
    count as f64 / span_secs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RouteKey;
    use axum::http::Method;
    use chrono::Duration;

    fn samples(durations: &[f64], errors: usize, spacing_ms: i64) -> Vec<RequestSample> {
        let start = Utc::now();
        let route = RouteKey::new(&Method::GET, "/events");
        durations
            .iter()
            .enumerate()
            .map(|(i, ms)| {
                let status = if i < errors { 500 } else { 200 };
                RequestSample::new(
                    route.clone(),
                    *ms,
                    status,
                    start + Duration::milliseconds(spacing_ms * i as i64),
                )
            })
            .collect()
    }

    #[test]
    fn p95_uses_nearest_rank_index() {
        let data = samples(&[10., 20., 30., 40., 50., 60., 70., 80., 90., 100.], 0, 0);
        let metrics = Metrics::from_samples(&data).unwrap();
        assert_eq!(metrics.p95_latency_ms, 100.0);
        assert_eq!(metrics.max_latency_ms, 100.0);
        assert_eq!(metrics.min_latency_ms, 10.0);
        assert_eq!(metrics.avg_latency_ms, 55.0);

        assert_eq!(nearest_rank_p95(1), 0);
        assert_eq!(nearest_rank_p95(20), 19);
        assert_eq!(nearest_rank_p95(100), 95);
    }

    #[test]
    fn p95_ignores_insertion_order() {
        let data = samples(&[100., 10., 90., 20., 80., 30., 70., 40., 60., 50.], 0, 0);
        assert_eq!(Metrics::from_samples(&data).unwrap().p95_latency_ms, 100.0);
    }

    #[test]
    fn error_rate_is_exact() {
        let data = samples(&[1.0; 10], 3, 0);
        let metrics = Metrics::from_samples(&data).unwrap();
        assert_eq!(metrics.error_rate, 0.3);
        assert_eq!(metrics.error_count, 3);
    }

    #[test]
    fn request_rate_uses_sample_span() {
        assert_eq!(
            Metrics::from_samples(&samples(&[1.0], 0, 0)).unwrap().requests_per_second,
            0.0
        );
        assert_eq!(
            Metrics::from_samples(&samples(&[1.0; 4], 0, 0)).unwrap().requests_per_second,
            0.0
        );
        // 5 个样本跨度 2 秒
        let metrics = Metrics::from_samples(&samples(&[1.0; 5], 0, 500)).unwrap();
        assert_eq!(metrics.requests_per_second, 2.5);
    }

    #[test]
    fn empty_window_has_no_metrics() {
        assert!(Metrics::from_samples(&Vec::<RequestSample>::new()).is_none());
    }

    #[test]
    fn merge_weights_by_sample_count() {
        let a = Metrics::from_samples(&samples(&[100.0; 3], 0, 0)).unwrap();
        let b = Metrics::from_samples(&samples(&[200.0], 1, 0)).unwrap();
        let merged = a.merge(&b);

        assert_eq!(merged.sample_count, 4);
        assert_eq!(merged.avg_latency_ms, 125.0);
        assert_eq!(merged.error_rate, 0.25);
        assert_eq!(merged.p95_latency_ms, 200.0);
        assert_eq!(merged.max_latency_ms, 200.0);
        assert_eq!(merged.min_latency_ms, 100.0);
    }
}
