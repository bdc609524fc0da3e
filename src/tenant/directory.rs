//! 租户目录：token 到数据库名的读穿透查找
//!
//! 查找顺序为注册表、缓存、主库。主库中查到的租户会登记到注册表并写入缓存。

use std::sync::Arc;

use async_trait::async_trait;

use crate::cache::{CacheManager, TenantCacheOperations};
use crate::tenant::{RegistryError, TenantConnector, TenantKey, TenantLease, TenantRegistry};

/// 租户目录的权威数据源
#[async_trait]
pub trait TenantSource: Send + Sync {
    async fn find_by_token(&self, token: &str) -> Result<Option<TenantKey>, sqlx::Error>;

    async fn list(&self) -> Result<Vec<TenantKey>, sqlx::Error>;
}

pub struct TenantDirectory<C: TenantConnector> {
    registry: TenantRegistry<C>,
    cache: CacheManager,
    source: Arc<dyn TenantSource>,
}

impl<C: TenantConnector> Clone for TenantDirectory<C> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            cache: self.cache.clone(),
            source: self.source.clone(),
        }
    }
}

impl<C: TenantConnector> TenantDirectory<C> {
    pub fn new(registry: TenantRegistry<C>, cache: CacheManager, source: Arc<dyn TenantSource>) -> Self {
        Self {
            registry,
            cache,
            source,
        }
    }

    pub fn registry(&self) -> &TenantRegistry<C> {
        &self.registry
    }

    /// 启动时从主库加载全部租户
    pub async fn preload(&self) -> Result<usize, RegistryError> {
        let tenants = self
            .source
            .list()
            .await
            .map_err(|e| RegistryError::DirectoryUnavailable(e.to_string()))?;

        let count = tenants.len();
        for key in tenants {
            self.registry.register(key).await;
        }
        tracing::info!(tenants = count, "Tenant directory loaded");
        Ok(count)
    }

    pub async fn find(&self, token: &str) -> Result<TenantKey, RegistryError> {
        if let Some(key) = self.registry.lookup(token) {
            return Ok(key);
        }

        if let Some(key) = TenantCacheOperations::get_cached_tenant(&self.cache, token).await {
            tracing::debug!(tenant = token, "Tenant directory cache hit");
            self.registry.register(key.clone()).await;
            return Ok(key);
        }

        match self.source.find_by_token(token).await {
            Ok(Some(key)) => {
                self.registry.register(key.clone()).await;
                TenantCacheOperations::cache_tenant(&self.cache, &key).await;
                Ok(key)
            }
            Ok(None) => Err(RegistryError::UnknownTenant(token.to_string())),
            Err(e) => {
                tracing::error!(tenant = token, error = %e, "Tenant directory lookup failed");
                Err(RegistryError::DirectoryUnavailable(e.to_string()))
            }
        }
    }

    /// 按 token 找到租户并借出连接
    pub async fn resolve(&self, token: &str) -> Result<TenantLease<C::Handle>, RegistryError> {
        let key = self.find(token).await?;
        self.registry.resolve(&key).await
    }

    /// 移除租户：注销、关闭连接并清理缓存
    pub async fn forget(&self, token: &str) -> Option<TenantKey> {
        let removed = self.registry.deregister(token).await;
        TenantCacheOperations::invalidate_tenant(&self.cache, token).await;
        removed
    }
}
