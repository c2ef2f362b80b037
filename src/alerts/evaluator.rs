use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::warn;

use super::record::{AlertMetric, AlertRecord, SYSTEM_ROUTE, Severity};
use super::system::SystemUsage;
use crate::clock::SharedClock;
use crate::config::AlertConfig;
use crate::metrics::Metrics;
use crate::models::RouteKey;

/// 告警阈值，延迟单位为秒，比例为 0..1，资源使用率为百分比
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AlertThresholds {
    pub avg_latency_secs: f64,
    pub p95_latency_secs: f64,
    pub error_rate: f64,
    pub request_rate: f64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub system_critical_percent: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            avg_latency_secs: 1.0,
            p95_latency_secs: 2.0,
            error_rate: 0.05,
            request_rate: 100.0,
            cpu_percent: 80.0,
            memory_percent: 80.0,
            system_critical_percent: 90.0,
        }
    }
}

/// 阈值告警
///
/// `evaluate` 每次都重新计算，突破几个指标就产生几条记录；
/// `active_alerts` 只返回最近 `window` 内的记录，没有显式的“恢复”状态。
/// `max_active` 限制的是每个 (路由, 指标) 的记录数，热点路由不会挤掉其他路由的告警。
pub struct AlertEvaluator {
    thresholds: AlertThresholds,
    window: Duration,
    max_active: usize,
    alerts: Mutex<VecDeque<AlertRecord>>,
    clock: SharedClock,
}

impl AlertEvaluator {
    pub fn new(thresholds: AlertThresholds, window: Duration, max_active: usize, clock: SharedClock) -> Self {
        Self {
            thresholds,
            window,
            max_active: max_active.max(1),
            alerts: Mutex::new(VecDeque::new()),
            clock,
        }
    }

    pub fn from_config(config: &AlertConfig, clock: SharedClock) -> Self {
        let window = Duration::try_seconds(config.window_secs as i64).unwrap_or(Duration::MAX);
        Self::new(config.thresholds, window, config.max_active, clock)
    }

    pub fn thresholds(&self) -> &AlertThresholds {
        &self.thresholds
    }

    pub fn evaluate(&self, route: &RouteKey, metrics: &Metrics) -> Vec<AlertRecord> {
        let now = self.clock.now();
        let t = &self.thresholds;
        let checks = [
            (
                AlertMetric::AverageResponseTime,
                metrics.avg_latency_ms / 1000.0,
                t.avg_latency_secs,
                Severity::Warning,
            ),
            (
                AlertMetric::P95ResponseTime,
                metrics.p95_latency_ms / 1000.0,
                t.p95_latency_secs,
                Severity::Warning,
            ),
            (AlertMetric::ErrorRate, metrics.error_rate, t.error_rate, Severity::Error),
            (
                AlertMetric::RequestRate,
                metrics.requests_per_second,
                t.request_rate,
                Severity::Warning,
            ),
        ];

        let raised: Vec<AlertRecord> = checks
            .into_iter()
            .filter(|(_, observed, threshold, _)| observed > threshold)
            .map(|(metric, observed_value, threshold, severity)| AlertRecord {
                route: route.clone(),
                metric,
                observed_value,
                threshold,
                severity,
                timestamp: now,
            })
            .collect();

        self.store(&raised, now);
        raised
    }

    /// 系统资源告警：超过告警阈值为 warning，超过严重阈值为 critical
    pub fn evaluate_system(&self, usage: &SystemUsage) -> Vec<AlertRecord> {
        let now = self.clock.now();
        let t = &self.thresholds;
        let route = RouteKey::from_raw(SYSTEM_ROUTE);

        let raised: Vec<AlertRecord> = [
            (AlertMetric::CpuUsage, usage.cpu_percent, t.cpu_percent),
            (AlertMetric::MemoryUsage, usage.memory_percent, t.memory_percent),
        ]
        .into_iter()
        .filter(|(_, observed, warn_at)| observed > warn_at)
        .map(|(metric, observed_value, warn_at)| {
            let (severity, threshold) = if observed_value > t.system_critical_percent {
                (Severity::Critical, t.system_critical_percent)
            } else {
                (Severity::Warning, warn_at)
            };
            AlertRecord {
                route: route.clone(),
                metric,
                observed_value,
                threshold,
                severity,
                timestamp: now,
            }
        })
        .collect();

        self.store(&raised, now);
        raised
    }

    /// 最近窗口内的告警，按时间先后
    pub fn active_alerts(&self) -> Vec<AlertRecord> {
        let now = self.clock.now();
        let mut alerts = self.lock();
        Self::expire(&mut alerts, now, self.window);
        alerts.iter().cloned().collect()
    }

    /// 丢弃过期告警，返回丢弃的数量
    pub fn prune_expired(&self) -> usize {
        let now = self.clock.now();
        let mut alerts = self.lock();
        let before = alerts.len();
        Self::expire(&mut alerts, now, self.window);
        before - alerts.len()
    }

    fn store(&self, raised: &[AlertRecord], now: DateTime<Utc>) {
        if raised.is_empty() {
            return;
        }
        for alert in raised {
            warn!(
                target: "performance",
                route = %alert.route,
                metric = %alert.metric,
                observed = alert.observed_value,
                threshold = alert.threshold,
                severity = ?alert.severity,
                "Performance alert raised"
            );
        }

        let mut alerts = self.lock();
        Self::expire(&mut alerts, now, self.window);
        for alert in raised {
            Self::evict_same_series(&mut alerts, alert, self.max_active);
            alerts.push_back(alert.clone());
        }
    }

    /// 上限按 (路由, 指标) 计算，溢出时只丢弃同一序列中最旧的记录
    fn evict_same_series(alerts: &mut VecDeque<AlertRecord>, alert: &AlertRecord, max_active: usize) {
        let same = |a: &AlertRecord| a.route == alert.route && a.metric == alert.metric;
        let mut count = alerts.iter().filter(|a| same(a)).count();
        while count >= max_active {
            match alerts.iter().position(|a| same(a)) {
                Some(index) => {
                    alerts.remove(index);
                    count -= 1;
                }
                None => break,
            }
        }
    }

    fn expire(alerts: &mut VecDeque<AlertRecord>, now: DateTime<Utc>, window: Duration) {
        let Some(cutoff) = now.checked_sub_signed(window) else {
            return;
        };
        while alerts.front().is_some_and(|a| a.timestamp <= cutoff) {
            alerts.pop_front();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<AlertRecord>> {
        self.alerts.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::metrics::{MetricsAggregator, RetentionStrategy};
    use axum::http::Method;
    use std::sync::Arc;

    fn evaluator(clock: Arc<MockClock>) -> AlertEvaluator {
        AlertEvaluator::new(AlertThresholds::default(), Duration::seconds(300), 1000, clock)
    }

    fn usage(cpu: f64, memory: f64) -> SystemUsage {
        SystemUsage {
            cpu_percent: cpu,
            memory_percent: memory,
            memory_used_bytes: 0,
            memory_total_bytes: 0,
        }
    }

    #[test]
    fn slow_route_raises_single_average_alert_that_expires() {
        let clock = Arc::new(MockClock::default());
        let aggregator = MetricsAggregator::new(RetentionStrategy::default(), clock.clone());
        let alerts = evaluator(clock.clone());
        let route = RouteKey::new(&Method::GET, "/events");

        for _ in 0..4 {
            aggregator.record(&route, 1500.0, 200);
        }
        let metrics = aggregator.snapshot(&route).unwrap();
        let raised = alerts.evaluate(&route, &metrics);

        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].metric, AlertMetric::AverageResponseTime);
        assert_eq!(raised[0].metric.as_str(), "average_response_time");
        assert_eq!(raised[0].observed_value, 1.5);
        assert_eq!(raised[0].severity, Severity::Warning);
        assert_eq!(alerts.active_alerts().len(), 1);

        clock.advance_secs(301);
        assert!(alerts.active_alerts().is_empty());
    }

    #[test]
    fn breaches_are_independent() {
        let clock = Arc::new(MockClock::default());
        let aggregator = MetricsAggregator::new(RetentionStrategy::default(), clock.clone());
        let alerts = evaluator(clock);
        let route = RouteKey::new(&Method::GET, "/regions");

        aggregator.record(&route, 3000.0, 500);
        aggregator.record(&route, 3000.0, 200);
        let raised = alerts.evaluate(&route, &aggregator.snapshot(&route).unwrap());

        let metrics: Vec<AlertMetric> = raised.iter().map(|a| a.metric).collect();
        assert_eq!(
            metrics,
            vec![
                AlertMetric::AverageResponseTime,
                AlertMetric::P95ResponseTime,
                AlertMetric::ErrorRate,
            ]
        );
        assert_eq!(raised[2].severity, Severity::Error);
    }

    #[test]
    fn repeated_evaluation_is_not_deduplicated() {
        let clock = Arc::new(MockClock::default());
        let aggregator = MetricsAggregator::new(RetentionStrategy::default(), clock.clone());
        let alerts = evaluator(clock.clone());
        let route = RouteKey::new(&Method::GET, "/events");

        aggregator.record(&route, 1200.0, 200);
        let metrics = aggregator.snapshot(&route).unwrap();
        alerts.evaluate(&route, &metrics);
        clock.advance_secs(200);
        alerts.evaluate(&route, &metrics);
        assert_eq!(alerts.active_alerts().len(), 2);

        clock.advance_secs(150);
        assert_eq!(alerts.active_alerts().len(), 1);
        assert_eq!(alerts.prune_expired(), 0);
    }

    #[test]
    fn system_usage_escalates_to_critical() {
        let clock = Arc::new(MockClock::default());
        let alerts = evaluator(clock);

        assert!(alerts.evaluate_system(&usage(50.0, 60.0)).is_empty());

        let raised = alerts.evaluate_system(&usage(85.0, 95.0));
        assert_eq!(raised.len(), 2);
        assert_eq!(raised[0].metric, AlertMetric::CpuUsage);
        assert_eq!(raised[0].severity, Severity::Warning);
        assert_eq!(raised[1].metric, AlertMetric::MemoryUsage);
        assert_eq!(raised[1].severity, Severity::Critical);
        assert_eq!(raised[1].route.as_str(), SYSTEM_ROUTE);
    }

    #[test]
    fn active_alerts_are_capped() {
        let clock = Arc::new(MockClock::default());
        let alerts = AlertEvaluator::new(AlertThresholds::default(), Duration::seconds(300), 3, clock);

        for _ in 0..5 {
            alerts.evaluate_system(&usage(85.0, 10.0));
        }
        assert_eq!(alerts.active_alerts().len(), 3);
    }

    #[test]
    fn hot_route_does_not_evict_other_routes() {
        let clock = Arc::new(MockClock::default());
        let aggregator = MetricsAggregator::new(RetentionStrategy::default(), clock.clone());
        let alerts = AlertEvaluator::new(AlertThresholds::default(), Duration::seconds(300), 1000, clock.clone());

        let rare = RouteKey::new(&Method::GET, "/rare");
        aggregator.record(&rare, 10.0, 500);
        alerts.evaluate(&rare, &aggregator.snapshot(&rare).unwrap());

        let hot = RouteKey::new(&Method::GET, "/hot");
        aggregator.record(&hot, 10.0, 500);
        let hot_metrics = aggregator.snapshot(&hot).unwrap();
        for _ in 0..1200 {
            alerts.evaluate(&hot, &hot_metrics);
        }
        clock.advance_secs(10);

        let active = alerts.active_alerts();
        assert_eq!(active.iter().filter(|a| a.route == rare).count(), 1);
        assert_eq!(active.iter().filter(|a| a.route == hot).count(), 1000);
    }
}
