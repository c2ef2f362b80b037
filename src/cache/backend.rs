use std::time::Duration;

use async_trait::async_trait;

use crate::error::CacheError;

/// 缓存后端能力接口，值在这一层是不透明的字符串
#[async_trait]
pub trait CacheBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    /// 整数自增；键不存在时以 `amount` 创建并设置 `ttl`
    async fn increment(&self, key: &str, amount: i64, ttl: Duration) -> Result<i64, CacheError>;

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError>;

    async fn clear(&self) -> Result<(), CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;
}
