//! 周期性清理：限流窗口、指标窗口、进程内缓存、过期告警和系统资源采样

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::AppState;

pub fn spawn_maintenance(state: AppState, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            run_once(&state).await;
        }
    })
}

/// 执行一轮清理和系统资源检查
pub async fn run_once(state: &AppState) {
    let rate_keys = state.limiter.sweep();
    let metric_routes = state.metrics.prune();
    let cache_entries = state.cache.purge_expired();
    let alerts = state.alerts.prune_expired();

    let monitor = state.system.clone();
    match tokio::task::spawn_blocking(move || monitor.refresh()).await {
        Ok(usage) => {
            state.alerts.evaluate_system(&usage);
        }
        Err(e) => warn!(error = %e, "System usage sampling failed"),
    }

    debug!(
        rate_keys,
        metric_routes,
        cache_entries,
        alerts,
        "Maintenance sweep finished"
    );
}
