/// 缓存数据模型
/// 定义缓存数据的结构体
pub mod entry;
pub mod rate_limit;
pub mod tenant;

// 重新导出常用类型
pub use entry::CacheEntry;
pub use rate_limit::RateLimitWindow;
pub use tenant::CachedTenant;
