use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};

use super::backend::CacheBackend;
use super::memory::MemoryBackend;
use super::redis_backend::RedisBackend;
use crate::clock::SharedClock;
use crate::config::Config;
use crate::error::CacheError;

#[derive(Debug, Clone, Copy)]
pub struct CacheSettings {
    pub default_ttl: Duration,
    /// 单次后端操作的超时，超时视为失败并触发降级
    pub op_timeout: Duration,
    /// None 表示降级后一直使用进程内存储
    pub reconnect_interval: Option<Duration>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            op_timeout: Duration::from_secs(5),
            reconnect_interval: None,
        }
    }
}

impl CacheSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_ttl: config.cache_default_ttl(),
            op_timeout: config.cache_socket_timeout(),
            reconnect_interval: config.cache_reconnect_interval(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendState {
    /// 主存储正常
    Redis,
    /// 未配置主存储
    Memory,
    /// 主存储故障，已降级到进程内存储
    Demoted,
}

/// 带自动降级的缓存
///
/// 主存储任何连接或协议错误都会把后续操作切到进程内存储，调用方只会看到未命中或 `false`。
/// 降级开关是一个原子标志，网络操作期间不持有锁。
pub struct CacheStore {
    primary: Option<Arc<dyn CacheBackend>>,
    fallback: Arc<MemoryBackend>,
    demoted: AtomicBool,
    demoted_at_ms: AtomicI64,
    settings: CacheSettings,
    clock: SharedClock,
}

impl CacheStore {
    pub fn new(
        primary: Option<Arc<dyn CacheBackend>>,
        settings: CacheSettings,
        clock: SharedClock,
    ) -> Self {
        Self {
            primary,
            fallback: Arc::new(MemoryBackend::new(clock.clone())),
            demoted: AtomicBool::new(false),
            demoted_at_ms: AtomicI64::new(0),
            settings,
            clock,
        }
    }

    pub fn in_memory(settings: CacheSettings, clock: SharedClock) -> Self {
        Self::new(None, settings, clock)
    }

    /// 按配置连接 redis；启动时不可达则直接以降级状态运行
    pub async fn connect(config: &Config, clock: SharedClock) -> Result<Self, CacheError> {
        let settings = CacheSettings::from_config(config);
        if !config.cache.enabled {
            info!("Cache backend disabled, using in-process store");
            return Ok(Self::in_memory(settings, clock));
        }

        let backend = RedisBackend::open(&config.redis_url())?;
        let store = Self::new(Some(Arc::new(backend)), settings, clock);

        if store.health_check().await {
            info!(host = %config.cache.host, port = config.cache.port, "Connected to redis cache");
        } else {
            store.demote("connect", "", &CacheError::Unavailable("ping failed".into()));
        }
        Ok(store)
    }

    pub fn default_ttl(&self) -> Duration {
        self.settings.default_ttl
    }

    pub fn is_demoted(&self) -> bool {
        self.demoted.load(Ordering::Acquire)
    }

    pub fn backend_state(&self) -> CacheBackendState {
        match (&self.primary, self.is_demoted()) {
            (None, _) => CacheBackendState::Memory,
            (Some(_), false) => CacheBackendState::Redis,
            (Some(_), true) => CacheBackendState::Demoted,
        }
    }

    fn demote(&self, op: &str, key: &str, err: &CacheError) {
        self.demoted_at_ms
            .store(self.clock.now().timestamp_millis(), Ordering::Release);
        if !self.demoted.swap(true, Ordering::AcqRel) {
            warn!(op, key, error = %err, "Cache backend failed, demoting to in-process store");
        }
    }

    async fn promote(&self) {
        if self.demoted.swap(false, Ordering::AcqRel) {
            info!("Cache backend reachable again, leaving in-process store");
            // 降级期间写入的数据不会同步回主存储，直接丢弃，避免下次降级时读到旧值
            if let Err(e) = self.fallback.clear().await {
                warn!(error = %e, "Failed to clear in-process store after promotion");
            }
        }
    }

    /// 当前可用的主存储；降级且到达重连间隔时，由一个调用方负责探测
    async fn active_primary(&self) -> Option<Arc<dyn CacheBackend>> {
        let primary = self.primary.as_ref()?;
        if !self.is_demoted() {
            return Some(primary.clone());
        }

        let interval = self.settings.reconnect_interval?;
        let now_ms = self.clock.now().timestamp_millis();
        let last = self.demoted_at_ms.load(Ordering::Acquire);
        if now_ms.saturating_sub(last) < interval.as_millis() as i64 {
            return None;
        }
        if self
            .demoted_at_ms
            .compare_exchange(last, now_ms, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }

        match tokio::time::timeout(self.settings.op_timeout, primary.ping()).await {
            Ok(Ok(())) => {
                self.promote().await;
                Some(primary.clone())
            }
            Ok(Err(e)) => {
                debug!(error = %e, "Cache backend still unavailable");
                None
            }
            Err(_) => {
                debug!("Cache backend probe timed out");
                None
            }
        }
    }

    /// 在主存储上执行操作；返回 None 表示应改用进程内存储
    async fn on_primary<T, F, Fut>(&self, op: &'static str, key: &str, f: F) -> Option<T>
    where
        F: FnOnce(Arc<dyn CacheBackend>) -> Fut,
        Fut: Future<Output = Result<T, CacheError>>,
    {
        let primary = self.active_primary().await?;
        match tokio::time::timeout(self.settings.op_timeout, f(primary)).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                self.demote(op, key, &e);
                None
            }
            Err(_) => {
                self.demote(op, key, &CacheError::Timeout(self.settings.op_timeout));
                None
            }
        }
    }

    pub async fn get_raw(&self, key: &str) -> Option<String> {
        if let Some(value) = self
            .on_primary("get", key, |b| async move { b.get(key).await })
            .await
        {
            return value;
        }
        self.fallback.get(key).await.unwrap_or_default()
    }

    /// 读取并反序列化；损坏的值按未命中处理并删除该键
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get_raw(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "Corrupt cache entry, deleting");
                self.delete(key).await;
                None
            }
        }
    }

    /// 写入原始值，`ttl` 缺省或为 0 时使用默认过期时间
    pub async fn set_raw(&self, key: &str, value: String, ttl: Option<Duration>) -> bool {
        let ttl = ttl
            .filter(|ttl| !ttl.is_zero())
            .unwrap_or(self.settings.default_ttl);

        let for_primary = value.clone();
        if self
            .on_primary("set", key, |b| async move { b.set(key, for_primary, ttl).await })
            .await
            .is_some()
        {
            return true;
        }
        self.fallback.set(key, value, ttl).await.is_ok()
    }

    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<Duration>) -> bool {
        match serde_json::to_string(value) {
            Ok(raw) => self.set_raw(key, raw, ttl).await,
            Err(e) => {
                error!(key, error = %e, "Failed to serialize cache value");
                false
            }
        }
    }

    pub async fn delete(&self, key: &str) -> bool {
        if let Some(removed) = self
            .on_primary("delete", key, |b| async move { b.delete(key).await })
            .await
        {
            return removed;
        }
        self.fallback.delete(key).await.unwrap_or(false)
    }

    pub async fn exists(&self, key: &str) -> bool {
        if let Some(exists) = self
            .on_primary("exists", key, |b| async move { b.exists(key).await })
            .await
        {
            return exists;
        }
        self.fallback.exists(key).await.unwrap_or(false)
    }

    /// 整数自增，新计数器使用默认过期时间
    pub async fn increment(&self, key: &str, amount: i64) -> Option<i64> {
        let ttl = self.settings.default_ttl;
        if let Some(value) = self
            .on_primary("increment", key, |b| async move {
                b.increment(key, amount, ttl).await
            })
            .await
        {
            return Some(value);
        }
        match self.fallback.increment(key, amount, ttl).await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "Cache increment failed");
                None
            }
        }
    }

    pub async fn keys(&self, pattern: &str) -> Vec<String> {
        if let Some(keys) = self
            .on_primary("keys", pattern, |b| async move { b.keys(pattern).await })
            .await
        {
            return keys;
        }
        self.fallback.keys(pattern).await.unwrap_or_default()
    }

    /// 按通配模式删除，供写操作之后的失效处理使用
    pub async fn delete_matching(&self, pattern: &str) -> usize {
        let mut removed = 0;
        for key in self.keys(pattern).await {
            if self.delete(&key).await {
                removed += 1;
            }
        }
        debug!(pattern, removed, "Invalidated cache entries");
        removed
    }

    pub async fn clear(&self) -> bool {
        if self
            .on_primary("clear", "", |b| async move { b.clear().await })
            .await
            .is_some()
        {
            return true;
        }
        self.fallback.clear().await.is_ok()
    }

    /// 主存储可达时为 true；未配置主存储时进程内存储总是健康
    pub async fn health_check(&self) -> bool {
        let Some(primary) = self.primary.as_ref() else {
            return true;
        };
        matches!(
            tokio::time::timeout(self.settings.op_timeout, primary.ping()).await,
            Ok(Ok(()))
        )
    }

    /// 清理进程内存储中的过期条目
    pub fn purge_expired(&self) -> usize {
        self.fallback.purge_expired()
    }
}
