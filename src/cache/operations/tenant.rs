use crate::cache::keys::{TENANT_DIRECTORY_PREFIX, tenant_directory_key, tenant_prefix};
use crate::cache::manager::{CacheManager, WarmReport};
use crate::cache::models::CachedTenant;
use crate::tenant::{TenantKey, TenantSource};

/// 租户目录缓存操作
pub struct TenantCacheOperations;

impl TenantCacheOperations {
    /// 缓存租户目录条目
    pub async fn cache_tenant(cache: &CacheManager, key: &TenantKey) {
        let cached = CachedTenant::from_key(key);
        cache
            .set_json(&tenant_directory_key(key.token()), &cached, cache.default_ttl())
            .await;
    }

    /// 从缓存读取租户目录条目
    pub async fn get_cached_tenant(cache: &CacheManager, token: &str) -> Option<TenantKey> {
        cache
            .get_json::<CachedTenant>(&tenant_directory_key(token))
            .await
            .map(|cached| cached.to_key())
    }

    /// 租户数据变化时清除该租户的全部缓存
    pub async fn invalidate_tenant(cache: &CacheManager, token: &str) {
        cache.invalidate(&tenant_directory_key(token)).await;
        cache.invalidate_prefix(&tenant_prefix(token)).await;
    }

    /// 启动时预热租户目录缓存
    ///
    /// `keys` 是完整的目录缓存键（`tenant_dir:{token}`），其它前缀的键会被跳过。
    pub async fn warm_directory(
        cache: &CacheManager,
        source: &dyn TenantSource,
        keys: &[String],
    ) -> WarmReport {
        cache
            .warm(keys, cache.default_ttl(), |key| async move {
                let found = match key.strip_prefix(TENANT_DIRECTORY_PREFIX) {
                    Some(token) => source.find_by_token(token).await?,
                    None => None,
                };
                Ok::<_, sqlx::Error>(found.and_then(|tenant| {
                    serde_json::to_vec(&CachedTenant::from_key(&tenant)).ok()
                }))
            })
            .await
    }
}
