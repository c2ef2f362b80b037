use std::sync::Arc;

use axum::Router;

use alerts::{AlertEvaluator, SystemMonitor};
use cache::{CacheStore, ResponseCache};
use clock::SharedClock;
use config::Config;
use metrics::{MetricsAggregator, MetricsMirror};
use rate_limit::RateLimiter;

pub mod alerts;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod maintenance;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod rate_limit;
pub mod routes;
pub mod utils;

/// 进程级共享状态，启动时构造一次，经由 `with_state` 传给路由和中间件
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub clock: SharedClock,
    pub cache: Arc<CacheStore>,
    pub limiter: Arc<RateLimiter>,
    pub metrics: Arc<MetricsAggregator>,
    pub alerts: Arc<AlertEvaluator>,
    pub system: Arc<SystemMonitor>,
}

impl AppState {
    pub fn new(config: Config, cache: Arc<CacheStore>, clock: SharedClock) -> Self {
        let limiter = RateLimiter::from_config(&config.rate_limit, clock.clone());

        let mut metrics = MetricsAggregator::new(config.metrics.retention, clock.clone());
        if config.metrics.mirror_enabled {
            metrics = metrics.with_mirror(MetricsMirror::new(
                cache.clone(),
                config.metrics_mirror_ttl(),
            ));
        }

        let alerts = AlertEvaluator::from_config(&config.alerts, clock.clone());

        Self {
            config,
            clock,
            cache,
            limiter: Arc::new(limiter),
            metrics: Arc::new(metrics),
            alerts: Arc::new(alerts),
            system: Arc::new(SystemMonitor::new()),
        }
    }

    /// 供只读路由使用的响应缓存，过期时间和响应体上限取自配置
    pub fn response_cache(&self) -> ResponseCache {
        ResponseCache::new(self.cache.clone(), self.config.response_cache_ttl())
            .with_max_body(self.config.cache.response_max_body)
    }
}

/// 合并运维接口与业务路由，并套上治理中间件
///
/// `govern` 在最外层，`log_errors` 因此能读到请求关联 ID。
pub fn build_router(state: AppState, api: Router<AppState>) -> Router {
    Router::new()
        .merge(routes::health_routes())
        .merge(api)
        .layer(axum::middleware::from_fn(middleware::log_errors))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::govern,
        ))
        .with_state(state)
}
