// 重试与退避
// 连接缓存后端和租户数据库时使用的有界重试

pub mod backoff;
pub mod retry;

pub use backoff::Backoff;
pub use retry::{RetryError, RetryPolicy, retry};
