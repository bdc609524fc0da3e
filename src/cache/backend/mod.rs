//! 键值缓存后端
//!
//! 缓存管理器和限流器都只依赖 [`KvBackend`]。生产环境使用 Redis，
//! 测试和单机开发使用进程内实现。

use std::time::Duration;

use async_trait::async_trait;

pub mod memory;
pub mod redis;

pub use self::memory::MemoryBackend;
pub use self::redis::RedisBackend;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("{op} timed out after {timeout:?}")]
    Timeout { op: &'static str, timeout: Duration },

    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("cache is disabled")]
    Disabled,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// 远程键值存储的最小操作集合（get/set/del/incr/expire/ping）
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>>;

    /// 写入并设置过期时间
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> BackendResult<()>;

    async fn delete(&self, key: &str) -> BackendResult<()>;

    /// 删除所有以 `prefix` 开头的键，返回删除数量
    async fn delete_prefix(&self, prefix: &str) -> BackendResult<u64>;

    /// 原子地自增计数器并设置过期时间，一次往返，返回自增后的值
    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> BackendResult<u64>;

    async fn ping(&self) -> BackendResult<()>;
}
