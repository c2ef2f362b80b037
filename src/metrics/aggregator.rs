use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::mirror::MetricsMirror;
use super::sample::RequestSample;
use super::snapshot::Metrics;
use super::window::{RetentionStrategy, SampleWindow};
use crate::clock::SharedClock;
use crate::models::RouteKey;

/// 按路由聚合请求样本
///
/// 每个路由一个窗口，写入和计算快照都只锁该路由所在的分片。
/// 启用镜像时样本同时异步写入 CacheStore，见 [`MetricsAggregator::merged_snapshot`]。
pub struct MetricsAggregator {
    windows: DashMap<RouteKey, SampleWindow>,
    retention: RetentionStrategy,
    clock: SharedClock,
    mirror: Option<MetricsMirror>,
}

impl MetricsAggregator {
    pub fn new(retention: RetentionStrategy, clock: SharedClock) -> Self {
        Self {
            windows: DashMap::new(),
            retention,
            clock,
            mirror: None,
        }
    }

    pub fn with_mirror(mut self, mirror: MetricsMirror) -> Self {
        self.mirror = Some(mirror);
        self
    }

    pub fn retention(&self) -> RetentionStrategy {
        self.retention
    }

    pub fn record(&self, route: &RouteKey, duration_ms: f64, status_code: u16) -> RequestSample {
        let now = self.clock.now();
        let sample = RequestSample::new(route.clone(), duration_ms, status_code, now);

        self.windows
            .entry(route.clone())
            .or_default()
            .push(sample.clone(), self.retention, now);

        if let Some(mirror) = &self.mirror {
            mirror.spawn_write(sample.clone());
        }
        sample
    }

    /// 只读快照，过期样本只在计算时跳过，由 `prune` 负责真正移除；窗口为空时返回 None
    pub fn snapshot(&self, route: &RouteKey) -> Option<Metrics> {
        let now = self.clock.now();
        let window = self.windows.get(route)?;
        Metrics::from_samples(window.retained(self.retention, now))
    }

    /// 所有有样本的路由，空路由不出现在结果中
    pub fn snapshot_all(&self) -> BTreeMap<RouteKey, Metrics> {
        let routes: Vec<RouteKey> = self.windows.iter().map(|e| e.key().clone()).collect();
        routes
            .into_iter()
            .filter_map(|route| self.snapshot(&route).map(|m| (route, m)))
            .collect()
    }

    /// 合并进程内窗口与镜像样本；只取比进程内最旧样本更早的镜像，避免重复计数
    pub async fn merged_snapshot(&self, route: &RouteKey) -> Option<Metrics> {
        let local = self.snapshot(route);
        let Some(mirror) = &self.mirror else {
            return local;
        };
        let external = mirror.load(route).await;
        merge_external(local, &external, self.retention, self.clock.now())
    }

    pub async fn merged_snapshot_all(&self) -> BTreeMap<RouteKey, Metrics> {
        let mut merged = self.snapshot_all();
        let Some(mirror) = &self.mirror else {
            return merged;
        };
        let now = self.clock.now();
        for (route, external) in mirror.load_all().await {
            let local = merged.remove(&route);
            if let Some(metrics) = merge_external(local, &external, self.retention, now) {
                merged.insert(route, metrics);
            }
        }
        merged
    }

    /// 按保留策略裁剪窗口并移除空窗口，返回移除的路由数
    pub fn prune(&self) -> usize {
        let now = self.clock.now();
        let before = self.windows.len();
        self.windows.retain(|_, window| {
            window.prune(self.retention, now);
            !window.is_empty()
        });
        before.saturating_sub(self.windows.len())
    }

    pub fn route_count(&self) -> usize {
        self.windows.len()
    }
}

/// 镜像样本按与进程内窗口相同的保留策略裁剪后再合并：
/// 只取比进程内最旧样本更早的样本，总数或时间跨度不超过保留范围
fn merge_external(
    local: Option<Metrics>,
    external: &[RequestSample],
    retention: RetentionStrategy,
    now: DateTime<Utc>,
) -> Option<Metrics> {
    let mut older: Vec<&RequestSample> = match &local {
        Some(local) => external
            .iter()
            .filter(|s| s.timestamp < local.oldest)
            .collect(),
        None => external.iter().collect(),
    };
    older.sort_by_key(|s| s.timestamp);

    match retention {
        RetentionStrategy::Capacity(capacity) => {
            let room = capacity.saturating_sub(local.as_ref().map_or(0, |m| m.sample_count));
            let skip = older.len().saturating_sub(room);
            older.drain(..skip);
        }
        RetentionStrategy::Duration(max_age) => {
            let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
            if let Some(cutoff) = now.checked_sub_signed(max_age) {
                older.retain(|s| s.timestamp > cutoff);
            }
        }
    }

    let external = Metrics::from_samples(older);
    match (local, external) {
        (Some(local), Some(external)) => Some(local.merge(&external)),
        (local, external) => local.or(external),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheSettings, CacheStore};
    use crate::clock::{Clock, MockClock};
    use axum::http::Method;
    use chrono::Utc;
    use std::sync::Arc;
    use std::time::Duration;

    fn route(path: &str) -> RouteKey {
        RouteKey::new(&Method::GET, path)
    }

    #[test]
    fn records_and_snapshots_per_route() {
        let clock = Arc::new(MockClock::default());
        let aggregator = MetricsAggregator::new(RetentionStrategy::default(), clock.clone());

        for (i, ms) in [10.0, 20.0, 30.0].into_iter().enumerate() {
            aggregator.record(&route("/events"), ms, if i == 0 { 500 } else { 200 });
            clock.advance_secs(1);
        }
        aggregator.record(&route("/regions"), 5.0, 200);

        let events = aggregator.snapshot(&route("/events")).unwrap();
        assert_eq!(events.sample_count, 3);
        assert_eq!(events.avg_latency_ms, 20.0);
        assert_eq!(events.error_count, 1);
        assert_eq!(events.requests_per_second, 1.5);

        let all = aggregator.snapshot_all();
        assert_eq!(all.len(), 2);
        assert!(aggregator.snapshot(&route("/unknown")).is_none());
    }

    #[test]
    fn capacity_retention_keeps_latest_samples() {
        let clock = Arc::new(MockClock::default());
        let aggregator = MetricsAggregator::new(RetentionStrategy::Capacity(3), clock);

        for ms in [1000.0, 1.0, 2.0, 3.0] {
            aggregator.record(&route("/events"), ms, 200);
        }
        let metrics = aggregator.snapshot(&route("/events")).unwrap();
        assert_eq!(metrics.sample_count, 3);
        assert_eq!(metrics.max_latency_ms, 3.0);
    }

    #[test]
    fn expired_routes_are_omitted() {
        let clock = Arc::new(MockClock::default());
        let aggregator = MetricsAggregator::new(
            RetentionStrategy::Duration(Duration::from_secs(60)),
            clock.clone(),
        );

        aggregator.record(&route("/events"), 10.0, 200);
        clock.advance_secs(30);
        aggregator.record(&route("/regions"), 10.0, 200);
        clock.advance_secs(31);

        let all = aggregator.snapshot_all();
        assert_eq!(all.len(), 1);
        assert!(all.contains_key(&route("/regions")));

        assert_eq!(aggregator.prune(), 1);
        assert_eq!(aggregator.route_count(), 1);
    }

    #[test]
    fn snapshots_do_not_modify_windows() {
        let clock = Arc::new(MockClock::default());
        let aggregator = MetricsAggregator::new(
            RetentionStrategy::Duration(Duration::from_secs(60)),
            clock.clone(),
        );

        aggregator.record(&route("/events"), 10.0, 200);
        clock.advance_secs(61);

        assert!(aggregator.snapshot(&route("/events")).is_none());
        assert!(aggregator.snapshot_all().is_empty());
        assert_eq!(aggregator.route_count(), 1);
        assert_eq!(aggregator.prune(), 1);
    }

    #[tokio::test]
    async fn merges_older_mirrored_samples() {
        let clock = Arc::new(MockClock::new(Utc::now()));
        let store = Arc::new(CacheStore::in_memory(CacheSettings::default(), clock.clone()));
        let mirror = MetricsMirror::new(store.clone(), Duration::from_secs(3600));

        // 模拟上一个进程写入的样本
        let previous = RequestSample::new(route("/events"), 300.0, 500, clock.now());
        assert!(mirror.write(&previous).await);
        clock.advance_secs(5);

        let aggregator =
            MetricsAggregator::new(RetentionStrategy::default(), clock.clone()).with_mirror(mirror);
        aggregator.record(&route("/events"), 100.0, 200);

        let merged = aggregator.merged_snapshot(&route("/events")).await.unwrap();
        assert_eq!(merged.sample_count, 2);
        assert_eq!(merged.avg_latency_ms, 200.0);
        assert_eq!(merged.error_rate, 0.5);
        assert_eq!(merged.p95_latency_ms, 300.0);

        // 后台镜像写入完成后，同一个样本也不会被重复计数
        tokio::task::yield_now().await;
        let merged = aggregator.merged_snapshot_all().await;
        assert_eq!(merged[&route("/events")].sample_count, 2);
    }

    #[tokio::test]
    async fn mirrored_samples_respect_capacity() {
        let clock = Arc::new(MockClock::new(Utc::now()));
        let store = Arc::new(CacheStore::in_memory(CacheSettings::default(), clock.clone()));
        let mirror = MetricsMirror::new(store.clone(), Duration::from_secs(3600));
        let aggregator = MetricsAggregator::new(RetentionStrategy::Capacity(3), clock.clone())
            .with_mirror(mirror.clone());

        for i in 0..10 {
            let sample = aggregator.record(&route("/events"), i as f64, 200);
            assert!(mirror.write(&sample).await);
            clock.advance_secs(1);
        }

        let merged = aggregator.merged_snapshot(&route("/events")).await.unwrap();
        assert_eq!(merged.sample_count, 3);
        assert_eq!(merged.min_latency_ms, 7.0);
    }

    #[tokio::test]
    async fn restarted_aggregator_fills_capacity_from_mirror() {
        let clock = Arc::new(MockClock::new(Utc::now()));
        let store = Arc::new(CacheStore::in_memory(CacheSettings::default(), clock.clone()));
        let mirror = MetricsMirror::new(store.clone(), Duration::from_secs(3600));

        for i in 0..5 {
            let sample = RequestSample::new(route("/events"), i as f64, 200, clock.now());
            assert!(mirror.write(&sample).await);
            clock.advance_secs(1);
        }

        let aggregator =
            MetricsAggregator::new(RetentionStrategy::Capacity(3), clock.clone()).with_mirror(mirror);
        aggregator.record(&route("/events"), 100.0, 200);

        // 进程内 1 个样本，镜像只补最新的 2 个
        let merged = aggregator.merged_snapshot(&route("/events")).await.unwrap();
        assert_eq!(merged.sample_count, 3);
        assert_eq!(merged.min_latency_ms, 3.0);
    }

    #[tokio::test]
    async fn mirrored_samples_respect_duration() {
        let clock = Arc::new(MockClock::new(Utc::now()));
        let store = Arc::new(CacheStore::in_memory(CacheSettings::default(), clock.clone()));
        let mirror = MetricsMirror::new(store.clone(), Duration::from_secs(3600));

        let stale = RequestSample::new(route("/events"), 900.0, 500, clock.now());
        assert!(mirror.write(&stale).await);
        clock.advance_secs(90);
        let recent = RequestSample::new(route("/events"), 20.0, 200, clock.now());
        assert!(mirror.write(&recent).await);
        clock.advance_secs(10);

        let aggregator = MetricsAggregator::new(
            RetentionStrategy::Duration(Duration::from_secs(60)),
            clock.clone(),
        )
        .with_mirror(mirror);
        aggregator.record(&route("/events"), 10.0, 200);

        let merged = aggregator.merged_snapshot_all().await;
        let events = &merged[&route("/events")];
        assert_eq!(events.sample_count, 2);
        assert_eq!(events.max_latency_ms, 20.0);
        assert_eq!(events.error_count, 0);
    }
}
