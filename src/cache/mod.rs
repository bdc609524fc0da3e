// 缓存模块
// 包含缓存后端、数据结构和操作逻辑

pub mod backend;
pub mod keys;
pub mod manager;
pub mod models;
pub mod operations;

// 重新导出常用类型和函数，方便其他模块使用
pub use backend::{BackendError, BackendResult, KvBackend, MemoryBackend, RedisBackend};
pub use manager::{CacheManager, WarmReport};
pub use operations::{RateLimitCacheOperations, TenantCacheOperations};
