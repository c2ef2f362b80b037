use std::collections::HashMap;
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use crate::alerts::AlertThresholds;
use crate::error::ConfigError;
use crate::metrics::RetentionStrategy;
use crate::rate_limit::{AdmissionPolicy, RequestLimit};

#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
    pub alerts: AlertConfig,
    pub metrics: MetricsConfig,
    pub maintenance_interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// 为 false 时只使用进程内存储
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub db: i64,
    pub password: Option<String>,
    pub socket_timeout_secs: u64,
    pub default_ttl_secs: u64,
    /// 0 表示降级后不再尝试重连
    pub reconnect_interval_secs: u64,
    pub response_ttl_secs: u64,
    /// 超过该字节数的响应体不缓存
    pub response_max_body: usize,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub default_limit: RequestLimit,
    pub burst: Option<RequestLimit>,
    /// 键为 `"METHOD /path"` 或裸路径
    pub route_limits: HashMap<String, RequestLimit>,
}

#[derive(Debug, Clone)]
pub struct AlertConfig {
    pub thresholds: AlertThresholds,
    pub window_secs: u64,
    pub max_active: usize,
}

#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub retention: RetentionStrategy,
    pub mirror_enabled: bool,
    pub mirror_ttl_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// 通过任意键值来源构造配置，缺失项使用默认值，格式错误直接返回错误
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };

        let default_limit = RequestLimit::new(
            vars.parse("RATE_LIMIT_REQUESTS", 100)?,
            vars.parse("RATE_LIMIT_WINDOW", 60)?,
        )
        .map_err(|e| ConfigError::invalid("RATE_LIMIT_REQUESTS", "", e.to_string()))?;

        let burst = match vars.get("RATE_LIMIT_BURST") {
            Some(raw) => {
                let max_requests = parse_value::<u32>("RATE_LIMIT_BURST", &raw)?;
                let window = vars.parse("RATE_LIMIT_BURST_WINDOW", 1)?;
                Some(
                    RequestLimit::new(max_requests, window)
                        .map_err(|e| ConfigError::invalid("RATE_LIMIT_BURST", raw, e.to_string()))?,
                )
            }
            None => None,
        };

        let route_limits = match vars.get("RATE_LIMIT_ROUTES") {
            Some(raw) => parse_route_limits(&raw)?,
            None => HashMap::new(),
        };

        let thresholds = AlertThresholds {
            avg_latency_secs: vars.parse_non_negative("ALERT_AVG_LATENCY", 1.0)?,
            p95_latency_secs: vars.parse_non_negative("ALERT_P95_LATENCY", 2.0)?,
            error_rate: vars.parse_non_negative("ALERT_ERROR_RATE", 0.05)?,
            request_rate: vars.parse_non_negative("ALERT_REQUEST_RATE", 100.0)?,
            cpu_percent: vars.parse_non_negative("ALERT_CPU_WARN", 80.0)?,
            memory_percent: vars.parse_non_negative("ALERT_MEMORY_WARN", 80.0)?,
            system_critical_percent: vars.parse_non_negative("ALERT_SYSTEM_CRITICAL", 90.0)?,
        };

        let retention = match vars.get("METRICS_RETENTION") {
            Some(raw) => raw
                .parse::<RetentionStrategy>()
                .map_err(|reason| ConfigError::invalid("METRICS_RETENTION", raw, reason))?,
            None => RetentionStrategy::default(),
        };

        let config = Config {
            server_host: vars.get("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            server_port: vars.parse("SERVER_PORT", 3000)?,
            cache: CacheConfig {
                enabled: vars.parse_bool("CACHE_ENABLED", true)?,
                host: vars.get("CACHE_HOST").unwrap_or_else(|| "127.0.0.1".into()),
                port: vars.parse("CACHE_PORT", 6379)?,
                db: vars.parse("CACHE_DB", 0)?,
                password: vars.get("CACHE_PASSWORD").filter(|p| !p.is_empty()),
                socket_timeout_secs: vars.parse_positive("CACHE_SOCKET_TIMEOUT", 5)?,
                default_ttl_secs: vars.parse_positive("CACHE_DEFAULT_TTL", 300)?,
                reconnect_interval_secs: vars.parse("CACHE_RECONNECT_INTERVAL", 0)?,
                response_ttl_secs: vars.parse_positive("RESPONSE_CACHE_TTL", 300)?,
                response_max_body: vars.parse_positive("RESPONSE_CACHE_MAX_BODY", 1024 * 1024)?,
            },
            rate_limit: RateLimitConfig {
                default_limit,
                burst,
                route_limits,
            },
            alerts: AlertConfig {
                thresholds,
                window_secs: vars.parse_positive("ALERT_WINDOW", 300)?,
                max_active: vars.parse_positive("ALERT_MAX_ACTIVE", 1000)?,
            },
            metrics: MetricsConfig {
                retention,
                mirror_enabled: vars.parse_bool("METRICS_MIRROR", false)?,
                mirror_ttl_secs: vars.parse_positive("METRICS_MIRROR_TTL", 3600)?,
            },
            maintenance_interval_secs: vars.parse_positive("MAINTENANCE_INTERVAL", 30)?,
        };

        Ok(config)
    }

    pub fn redis_url(&self) -> String {
        let auth = match &self.cache.password {
            Some(password) => format!(":{}@", password),
            None => String::new(),
        };
        format!(
            "redis://{}{}:{}/{}",
            auth, self.cache.host, self.cache.port, self.cache.db
        )
    }

    pub fn admission_policy(&self) -> AdmissionPolicy {
        self.rate_limit.policy()
    }

    pub fn cache_socket_timeout(&self) -> Duration {
        Duration::from_secs(self.cache.socket_timeout_secs)
    }

    pub fn cache_default_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.default_ttl_secs)
    }

    pub fn cache_reconnect_interval(&self) -> Option<Duration> {
        match self.cache.reconnect_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn response_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.response_ttl_secs)
    }

    pub fn metrics_mirror_ttl(&self) -> Duration {
        Duration::from_secs(self.metrics.mirror_ttl_secs)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }
}

impl RateLimitConfig {
    /// 配置了突发上限时使用两级策略
    pub fn policy(&self) -> AdmissionPolicy {
        match self.burst {
            Some(burst) => AdmissionPolicy::TwoTier { burst },
            None => AdmissionPolicy::SingleTier,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        // 全部使用默认值，不会失败
        match Self::from_lookup(|_| None) {
            Ok(config) => config,
            Err(e) => unreachable!("default configuration is invalid: {e}"),
        }
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(name) {
            Some(raw) => parse_value(name, &raw),
            None => Ok(default),
        }
    }

    fn parse_positive<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + PartialOrd + Default + Display,
        T::Err: Display,
    {
        let value = self.parse(name, default)?;
        if value <= T::default() {
            return Err(ConfigError::invalid(name, value.to_string(), "must be greater than zero"));
        }
        Ok(value)
    }

    fn parse_non_negative(&self, name: &'static str, default: f64) -> Result<f64, ConfigError> {
        let value: f64 = self.parse(name, default)?;
        if !value.is_finite() || value < 0.0 {
            return Err(ConfigError::invalid(name, value.to_string(), "must be a non-negative number"));
        }
        Ok(value)
    }

    fn parse_bool(&self, name: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.get(name) {
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::invalid(name, raw, "expected a boolean")),
            },
            None => Ok(default),
        }
    }
}

fn parse_value<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse::<T>()
        .map_err(|e| ConfigError::invalid(name, raw, e.to_string()))
}

/// 解析 `GET /events=50/60;/events/search=20/60`
fn parse_route_limits(raw: &str) -> Result<HashMap<String, RequestLimit>, ConfigError> {
    const NAME: &str = "RATE_LIMIT_ROUTES";
    let mut limits = HashMap::new();

    for entry in raw.split(';').map(str::trim).filter(|e| !e.is_empty()) {
        let (route, amount) = entry
            .rsplit_once('=')
            .ok_or_else(|| ConfigError::invalid(NAME, entry, "expected route=requests/window"))?;
        let (requests, window) = amount
            .split_once('/')
            .ok_or_else(|| ConfigError::invalid(NAME, entry, "expected requests/window"))?;

        let limit = RequestLimit::new(
            parse_value::<u32>(NAME, requests.trim())?,
            parse_value::<u64>(NAME, window.trim())?,
        )
        .map_err(|e| ConfigError::invalid(NAME, entry, e.to_string()))?;

        let route = normalize_route(route.trim());
        if route.is_empty() {
            return Err(ConfigError::invalid(NAME, entry, "empty route"));
        }
        limits.insert(route, limit);
    }

    Ok(limits)
}

fn normalize_route(route: &str) -> String {
    match route.split_once(' ') {
        Some((method, path)) => format!("{} {}", method.to_ascii_uppercase(), path.trim()),
        None => route.to_string(),
    }
}
