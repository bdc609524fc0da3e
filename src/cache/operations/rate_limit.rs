use std::time::Duration;

use crate::cache::backend::{BackendResult, KvBackend};
use crate::cache::keys::rate_limit_key;
use crate::cache::models::RateLimitWindow;

/// 速率限制缓存操作
pub struct RateLimitCacheOperations;

impl RateLimitCacheOperations {
    /// 增加窗口计数
    ///
    /// 计数器键带有窗口编号，过期时间等于窗口长度，旧窗口会在后端自行淘汰。
    pub async fn increment_window(
        backend: &dyn KvBackend,
        identity: &str,
        bucket: u64,
        window: Duration,
        reset_at: i64,
    ) -> BackendResult<RateLimitWindow> {
        let key = rate_limit_key(identity, bucket);
        let count = backend.incr_with_expiry(&key, window).await?;

        Ok(RateLimitWindow {
            identity: identity.to_string(),
            bucket,
            count,
            reset_at,
        })
    }
}
