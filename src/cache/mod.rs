// 缓存模块
// 对外只暴露 CacheStore：redis 可用时走 redis，失败后自动降级到进程内存储

pub mod backend;
pub mod keys;
pub mod memory;
pub mod redis_backend;
pub mod response;
pub mod store;

// 重新导出常用类型，方便其他模块使用
pub use backend::CacheBackend;
pub use keys::CacheKeyBuilder;
pub use memory::{CacheEntry, MemoryBackend};
pub use redis_backend::RedisBackend;
pub use response::{CachedResponse, ResponseCache, cache_response};
pub use store::{CacheBackendState, CacheSettings, CacheStore};
