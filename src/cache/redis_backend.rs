use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, Client as RedisClient};

use super::backend::CacheBackend;
use crate::error::CacheError;

/// redis 主存储，每次操作获取多路复用连接
#[derive(Debug, Clone)]
pub struct RedisBackend {
    client: RedisClient,
}

impl RedisBackend {
    pub fn new(client: RedisClient) -> Self {
        Self { client }
    }

    pub fn open(url: &str) -> Result<Self, CacheError> {
        Ok(Self::new(RedisClient::open(url)?))
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, CacheError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis().min(u64::MAX as u128) as u64).max(1)
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let _: () = conn.pset_ex(key, value, ttl_millis(ttl)).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.connection().await?;
        let removed: usize = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.connection().await?;
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    async fn increment(&self, key: &str, amount: i64, ttl: Duration) -> Result<i64, CacheError> {
        let mut conn = self.connection().await?;
        let value: i64 = conn.incr(key, amount).await?;
        if value == amount {
            // 新建的计数器，设置过期时间
            let _: () = conn.pexpire(key, ttl_millis(ttl) as i64).await?;
        }
        Ok(value)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.connection().await?;
        let keys: Vec<String> = conn.keys(pattern).await?;
        Ok(keys)
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let _: () = redis::cmd("FLUSHDB").query_async(&mut conn).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
