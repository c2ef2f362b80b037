use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, error};

use crate::clock::SharedClock;
use crate::config::RateLimitConfig;
use crate::error::RateLimitError;
use crate::models::{ClientKey, RouteKey};

use super::policy::{AdmissionPolicy, RequestLimit};
use super::window::RateWindow;

/// 允许的时钟回拨量，超过时视为窗口损坏
const MAX_CLOCK_SKEW_MS: i64 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Admission {
    pub allowed: bool,
    pub retry_after_secs: u64,
}

impl Admission {
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            retry_after_secs: 0,
        }
    }

    pub fn rejected(retry_after_secs: u64) -> Self {
        Self {
            allowed: false,
            retry_after_secs,
        }
    }
}

#[derive(Debug, Default)]
struct ClientWindows {
    rate: RateWindow,
    burst: RateWindow,
}

impl ClientWindows {
    fn newest(&self) -> Option<DateTime<Utc>> {
        self.rate.newest().max(self.burst.newest())
    }

    fn is_empty(&self) -> bool {
        self.rate.is_empty() && self.burst.is_empty()
    }
}

/// 按 (client, route) 分区的滑动窗口限流器
///
/// 每个键的裁剪、计数和追加都在 DashMap 的分片锁内完成，
/// 并发的两次检查不会同时看到过期的计数。
#[derive(Debug)]
pub struct RateLimiter {
    default_limit: RequestLimit,
    route_limits: DashMap<String, RequestLimit>,
    policy: AdmissionPolicy,
    windows: DashMap<(ClientKey, RouteKey), ClientWindows>,
    clock: SharedClock,
}

impl RateLimiter {
    pub fn new(default_limit: RequestLimit, policy: AdmissionPolicy, clock: SharedClock) -> Self {
        Self {
            default_limit,
            route_limits: DashMap::new(),
            policy,
            windows: DashMap::new(),
            clock,
        }
    }

    pub fn from_config(config: &RateLimitConfig, clock: SharedClock) -> Self {
        let limiter = Self::new(config.default_limit, config.policy(), clock);
        for (route, limit) in &config.route_limits {
            limiter.route_limits.insert(route.clone(), *limit);
        }
        limiter
    }

    /// 为某个路由设置专用限额，`route` 可以是 `"GET /events"` 或 `"/events"`
    pub fn set_route_limit(&self, route: impl Into<String>, limit: RequestLimit) {
        self.route_limits.insert(route.into(), limit);
    }

    pub fn policy(&self) -> AdmissionPolicy {
        self.policy
    }

    /// 完整路由键优先，其次是裸路径，最后是全局默认值
    pub fn limit_for(&self, route: &RouteKey) -> RequestLimit {
        self.route_limits
            .get(route.as_str())
            .or_else(|| self.route_limits.get(route.path()))
            .map(|limit| *limit)
            .unwrap_or(self.default_limit)
    }

    /// 准入检查。内部故障时放行并记录日志，限流本身不能导致服务不可用。
    pub fn admit(&self, client: &ClientKey, route: &RouteKey) -> Admission {
        match self.try_admit(client, route) {
            Ok(admission) => admission,
            Err(e) => {
                error!(client = %client, route = %route, error = %e, "Rate limiter failed, allowing request");
                Admission::allowed()
            }
        }
    }

    pub fn try_admit(
        &self,
        client: &ClientKey,
        route: &RouteKey,
    ) -> Result<Admission, RateLimitError> {
        let limit = self.limit_for(route);
        let burst = self.policy.burst();

        let mut entry = self
            .windows
            .entry((client.clone(), route.clone()))
            .or_default();
        let windows = entry.value_mut();
        // 在锁内取时间，保证同一键的时间戳单调追加
        let now = self.clock.now();

        if let Some(newest) = windows.newest() {
            let ahead_ms = (newest - now).num_milliseconds();
            if ahead_ms > MAX_CLOCK_SKEW_MS {
                windows.rate.clear();
                windows.burst.clear();
                return Err(RateLimitError::ClockSkew {
                    key: format!("{client}|{route}"),
                    ahead_ms,
                });
            }
        }

        windows.rate.prune(now, limit.window());
        let rate_retry = (windows.rate.len() >= limit.max_requests as usize)
            .then(|| windows.rate.retry_after(now, limit.window()));

        if let Some(burst) = burst {
            windows.burst.prune(now, burst.window());
            if windows.burst.len() >= burst.max_requests as usize {
                // 两级都满时按较晚的一级给出重试时间
                let retry_after = windows
                    .burst
                    .retry_after(now, burst.window())
                    .max(rate_retry.unwrap_or(0));
                debug!(client = %client, route = %route, retry_after, "Burst ceiling reached");
                return Ok(Admission::rejected(retry_after));
            }
        }

        if let Some(retry_after) = rate_retry {
            return Ok(Admission::rejected(retry_after));
        }

        windows.rate.push(now);
        if burst.is_some() {
            windows.burst.push(now);
        }
        Ok(Admission::allowed())
    }

    /// 裁剪所有窗口并删除已空的键，返回删除的键数量
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let burst_window = self.policy.burst().map(|b| b.window());
        let before = self.windows.len();

        self.windows.retain(|(_, route), windows| {
            windows.rate.prune(now, self.limit_for(route).window());
            if let Some(window) = burst_window {
                windows.burst.prune(now, window);
            }
            !windows.is_empty()
        });

        before.saturating_sub(self.windows.len())
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    /// 当前窗口内已记录的请求数（不裁剪）
    pub fn window_len(&self, client: &ClientKey, route: &RouteKey) -> usize {
        self.windows
            .get(&(client.clone(), route.clone()))
            .map(|w| w.rate.len())
            .unwrap_or(0)
    }
}
