use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::backend::CacheBackend;
use super::keys::glob_matcher;
use crate::clock::SharedClock;
use crate::error::CacheError;

/// 进程内缓存条目，写入后内容不再修改，只能被新的写入替换
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// 进程内存储，redis 不可用时的降级目标
#[derive(Debug)]
pub struct MemoryBackend {
    entries: DashMap<String, CacheEntry>,
    clock: SharedClock,
}

impl MemoryBackend {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    fn expiry(&self, ttl: Duration) -> DateTime<Utc> {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        self.clock
            .now()
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// 删除所有已过期条目，返回删除数量
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = self.clock.now();
        // 过期条目在读取时惰性删除
        self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        Ok(self.entries.get(key).map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let entry = CacheEntry {
            value,
            expires_at: self.expiry(ttl),
        };
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let now = self.clock.now();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired(now)))
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let now = self.clock.now();
        Ok(self
            .entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now)))
    }

    async fn increment(&self, key: &str, amount: i64, ttl: Duration) -> Result<i64, CacheError> {
        let now = self.clock.now();
        let expires_at = self.expiry(ttl);
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| CacheEntry {
                value: "0".into(),
                expires_at,
            });

        if entry.is_expired(now) {
            *entry = CacheEntry {
                value: "0".into(),
                expires_at,
            };
        }

        let current: i64 = entry.value.parse().map_err(|_| {
            CacheError::InvalidValue(format!("value at {} is not an integer", key))
        })?;
        let next = current
            .checked_add(amount)
            .ok_or_else(|| CacheError::InvalidValue(format!("increment of {} overflows", key)))?;
        entry.value = next.to_string();
        Ok(next)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let Some(matcher) = glob_matcher(pattern) else {
            return Ok(Vec::new());
        };
        let now = self.clock.now();
        Ok(self
            .entries
            .iter()
            .filter(|entry| !entry.is_expired(now) && matcher.is_match(entry.key()))
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.entries.clear();
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}
