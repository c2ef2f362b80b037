use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tracing::debug;

use super::sample::RequestSample;
use crate::cache::CacheStore;
use crate::cache::keys::{metrics_pattern, metrics_route_pattern, metrics_sample_key};
use crate::models::RouteKey;

/// 把每个样本单独写入 CacheStore，进程内窗口被重置后仍可合并回来
#[derive(Clone)]
pub struct MetricsMirror {
    store: Arc<CacheStore>,
    ttl: Duration,
}

impl MetricsMirror {
    pub fn new(store: Arc<CacheStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub async fn write(&self, sample: &RequestSample) -> bool {
        let key = metrics_sample_key(&sample.route, sample.timestamp);
        self.store.set(&key, sample, Some(self.ttl)).await
    }

    /// 在当前运行时上后台写入，不阻塞请求；没有运行时则放弃
    pub fn spawn_write(&self, sample: RequestSample) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!(route = %sample.route, "No runtime available, skipping metrics mirror");
            return;
        };
        let mirror = self.clone();
        handle.spawn(async move {
            if !mirror.write(&sample).await {
                debug!(route = %sample.route, "Failed to mirror metrics sample");
            }
        });
    }

    /// 读取某个路由的镜像样本，按时间升序
    pub async fn load(&self, route: &RouteKey) -> Vec<RequestSample> {
        let keys = self.store.keys(&metrics_route_pattern(route)).await;
        let mut samples = self.fetch(keys).await;
        samples.retain(|s| &s.route == route);
        samples.sort_by_key(|s| s.timestamp);
        samples
    }

    pub async fn load_all(&self) -> BTreeMap<RouteKey, Vec<RequestSample>> {
        let keys = self.store.keys(&metrics_pattern()).await;
        let mut grouped: BTreeMap<RouteKey, Vec<RequestSample>> = BTreeMap::new();
        for sample in self.fetch(keys).await {
            grouped.entry(sample.route.clone()).or_default().push(sample);
        }
        for samples in grouped.values_mut() {
            samples.sort_by_key(|s| s.timestamp);
        }
        grouped
    }

    /// 只读：损坏的样本跳过，不删除键
    async fn fetch(&self, keys: Vec<String>) -> Vec<RequestSample> {
        let reads = keys.iter().map(|key| async move {
            let raw = self.store.get_raw(key).await?;
            serde_json::from_str::<RequestSample>(&raw)
                .inspect_err(|e| debug!(key = %key, error = %e, "Skipping corrupt metrics sample"))
                .ok()
        });
        join_all(reads).await.into_iter().flatten().collect()
    }
}
