/// 缓存操作
/// 提供缓存操作的功能实现

// 限流计数器操作
pub mod rate_limit;

// 租户目录缓存操作
pub mod tenant;

// 重新导出常用操作
pub use rate_limit::RateLimitCacheOperations;
pub use tenant::TenantCacheOperations;
