/// 缓存键模块
/// 提供各种缓存键生成函数

// 租户缓存键
pub mod tenant_keys;

// 限流计数器键
pub mod rate_limit_keys;

pub use rate_limit_keys::rate_limit_key;
pub use tenant_keys::{tenant_data_key, tenant_directory_key, tenant_prefix, TENANT_DIRECTORY_PREFIX};
