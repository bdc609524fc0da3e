//! 缓存管理器
//!
//! 缓存只是优化手段而不是正确性依赖：所有读操作在后端故障时都表现为未命中，
//! 所有写操作失败只记录日志，不会向调用方传播错误。

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::cache::backend::{BackendError, BackendResult, KvBackend, RedisBackend};
use crate::cache::models::CacheEntry;
use crate::config::CacheConfig;
use crate::lifecycle::ShutdownSignal;
use crate::observability::metrics::{CACHE_ERROR, CACHE_HIT, CACHE_MISS};
use crate::resilience::{RetryPolicy, retry};

struct CacheInner {
    /// `None` 表示降级模式：初始连接失败后缓存整体停用
    backend: Option<Arc<dyn KvBackend>>,
    default_ttl: Duration,
}

#[derive(Clone)]
pub struct CacheManager {
    inner: Arc<CacheInner>,
}

/// 预热结果
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WarmReport {
    pub warmed: usize,
    pub missing: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl CacheManager {
    pub fn new(backend: Arc<dyn KvBackend>, default_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                backend: Some(backend),
                default_ttl,
            }),
        }
    }

    /// 停用状态：读取全部未命中，写入和失效均为空操作
    pub fn disabled(default_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                backend: None,
                default_ttl,
            }),
        }
    }

    /// 按配置连接 Redis，重试耗尽后进入停用状态
    pub async fn connect(config: &CacheConfig, cancel: &ShutdownSignal) -> Self {
        let url = config.redis_url();
        let op_timeout = config.op_timeout();
        Self::connect_with(
            &config.retry_policy(),
            cancel,
            config.default_ttl(),
            || RedisBackend::connect(&url, op_timeout),
        )
        .await
    }

    /// 使用任意后端工厂建立连接
    pub async fn connect_with<B, F, Fut>(
        policy: &RetryPolicy,
        cancel: &ShutdownSignal,
        default_ttl: Duration,
        mut connect: F,
    ) -> Self
    where
        B: KvBackend + 'static,
        F: FnMut() -> Fut,
        Fut: Future<Output = BackendResult<B>>,
    {
        match retry(policy, cancel, "cache backend connect", |_| connect()).await {
            Ok(backend) => {
                tracing::info!("Cache backend connected");
                Self::new(Arc::new(backend), default_ttl)
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Failed to connect to cache backend (cache will be unavailable, but app will continue)"
                );
                Self::disabled(default_ttl)
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.backend.is_some()
    }

    /// 共享的后端连接，限流器复用同一个后端
    pub fn backend(&self) -> Option<Arc<dyn KvBackend>> {
        self.inner.backend.clone()
    }

    pub fn default_ttl(&self) -> Duration {
        self.inner.default_ttl
    }

    /// 读取缓存；未命中、过期或后端故障都返回 `None`
    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let backend = self.inner.backend.as_ref()?;

        let raw = match backend.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                metrics::counter!(CACHE_MISS.name).increment(1);
                return None;
            }
            Err(e) => {
                metrics::counter!(CACHE_ERROR.name, "op" => "get").increment(1);
                tracing::warn!(key, error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };

        let entry: CacheEntry = match serde_json::from_slice(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(key, error = %e, "Discarding undecodable cache entry");
                metrics::counter!(CACHE_MISS.name).increment(1);
                return None;
            }
        };

        if entry.is_expired(chrono::Utc::now().timestamp_millis()) {
            metrics::counter!(CACHE_MISS.name).increment(1);
            return None;
        }

        metrics::counter!(CACHE_HIT.name).increment(1);
        Some(entry.value)
    }

    /// 写入缓存，失败只记录日志
    pub async fn set(&self, key: &str, value: &[u8], ttl: Duration) {
        if let Err(e) = self.try_set(key, value, ttl).await {
            if !matches!(e, BackendError::Disabled) {
                metrics::counter!(CACHE_ERROR.name, "op" => "set").increment(1);
                tracing::warn!(key, error = %e, "Cache write failed");
            }
        }
    }

    async fn try_set(&self, key: &str, value: &[u8], ttl: Duration) -> BackendResult<()> {
        let backend = self.inner.backend.as_ref().ok_or(BackendError::Disabled)?;
        let expires_at = chrono::Utc::now().timestamp_millis() + ttl.as_millis() as i64;
        let entry = CacheEntry::new(value.to_vec(), expires_at);
        let raw = serde_json::to_vec(&entry)
            .map_err(|e| BackendError::Unavailable(format!("encode error: {}", e)))?;
        backend.set(key, &raw, ttl).await
    }

    pub async fn invalidate(&self, key: &str) {
        let Some(backend) = self.inner.backend.as_ref() else {
            return;
        };
        if let Err(e) = backend.delete(key).await {
            metrics::counter!(CACHE_ERROR.name, "op" => "invalidate").increment(1);
            tracing::warn!(key, error = %e, "Cache invalidation failed");
        }
    }

    pub async fn invalidate_prefix(&self, prefix: &str) {
        let Some(backend) = self.inner.backend.as_ref() else {
            return;
        };
        match backend.delete_prefix(prefix).await {
            Ok(removed) => tracing::debug!(prefix, removed, "Cache prefix invalidated"),
            Err(e) => {
                metrics::counter!(CACHE_ERROR.name, "op" => "invalidate_prefix").increment(1);
                tracing::warn!(prefix, error = %e, "Cache prefix invalidation failed");
            }
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key).await?;
        match serde_json::from_slice(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, error = %e, "Cached value has unexpected shape");
                None
            }
        }
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        match serde_json::to_vec(value) {
            Ok(raw) => self.set(key, &raw, ttl).await,
            Err(e) => tracing::warn!(key, error = %e, "Failed to serialize cache value"),
        }
    }

    /// 预热一组固定的键
    ///
    /// `loader` 返回 `Ok(None)` 表示数据源中不存在该键。任何失败都只记录警告，
    /// 不影响启动流程。
    pub async fn warm<F, Fut, E>(&self, keys: &[String], ttl: Duration, loader: F) -> WarmReport
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<Option<Vec<u8>>, E>>,
        E: Display,
    {
        let mut report = WarmReport::default();

        if !self.is_enabled() {
            tracing::info!("Cache warming skipped: cache backend not available");
            report.skipped = keys.len();
            return report;
        }

        tracing::info!(keys = keys.len(), "Starting cache warming...");

        for key in keys {
            match loader(key.clone()).await {
                Ok(Some(value)) => match self.try_set(key, &value, ttl).await {
                    Ok(()) => report.warmed += 1,
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "Cache warming write failed");
                        report.failed += 1;
                    }
                },
                Ok(None) => report.missing += 1,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Cache warming load failed");
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            warmed = report.warmed,
            missing = report.missing,
            failed = report.failed,
            "Cache warming completed"
        );
        report
    }

    /// 健康检查用的 PING
    pub async fn ping(&self) -> BackendResult<()> {
        match self.inner.backend.as_ref() {
            Some(backend) => backend.ping().await,
            None => Err(BackendError::Disabled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::backend::MemoryBackend;

    fn manager() -> (Arc<MemoryBackend>, CacheManager) {
        let backend = Arc::new(MemoryBackend::new());
        let cache = CacheManager::new(backend.clone(), Duration::from_secs(300));
        (backend, cache)
    }

    #[tokio::test(start_paused = true)]
    async fn set_then_get_until_ttl() {
        let (_, cache) = manager();
        cache.set("doc:1", b"payload", Duration::from_secs(5)).await;
        assert_eq!(cache.get("doc:1").await, Some(b"payload".to_vec()));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.get("doc:1").await, None);
    }

    #[tokio::test]
    async fn expired_entry_is_never_returned() {
        let (backend, cache) = manager();
        // 后端还保留着条目，但条目自身的过期时间已经过去
        let stale = CacheEntry::new(b"old".to_vec(), chrono::Utc::now().timestamp_millis() - 1);
        let raw = serde_json::to_vec(&stale).unwrap();
        backend.set("doc:2", &raw, Duration::from_secs(60)).await.unwrap();

        assert_eq!(cache.get("doc:2").await, None);
    }

    #[tokio::test]
    async fn outage_degrades_to_miss() {
        let (backend, cache) = manager();
        cache.set("doc:3", b"v", Duration::from_secs(60)).await;
        backend.set_available(false);

        assert_eq!(cache.get("doc:3").await, None);
        cache.set("doc:4", b"v", Duration::from_secs(60)).await;
        cache.invalidate("doc:3").await;
        cache.invalidate_prefix("doc:").await;
        assert!(cache.ping().await.is_err());

        backend.set_available(true);
        assert_eq!(cache.get("doc:3").await, Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn invalidate_prefix_only_touches_matching_keys() {
        let (_, cache) = manager();
        let ttl = Duration::from_secs(60);
        cache.set("tenant:acme:a", b"1", ttl).await;
        cache.set("tenant:acme:b", b"2", ttl).await;
        cache.set("tenant:other:a", b"3", ttl).await;

        cache.invalidate_prefix("tenant:acme:").await;

        assert_eq!(cache.get("tenant:acme:a").await, None);
        assert_eq!(cache.get("tenant:acme:b").await, None);
        assert_eq!(cache.get("tenant:other:a").await, Some(b"3".to_vec()));
    }

    #[tokio::test]
    async fn json_helpers_roundtrip_typed_values() {
        let (_, cache) = manager();
        cache
            .set_json("counts", &vec![1u32, 2, 3], Duration::from_secs(60))
            .await;
        assert_eq!(cache.get_json::<Vec<u32>>("counts").await, Some(vec![1, 2, 3]));
        assert_eq!(cache.get_json::<String>("counts").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_connect_enters_disabled_mode() {
        let policy = RetryPolicy::fixed(3, Duration::from_secs(2));
        let mut attempts = 0;
        let cache = CacheManager::connect_with(
            &policy,
            &ShutdownSignal::never(),
            Duration::from_secs(60),
            || {
                attempts += 1;
                async { Err::<MemoryBackend, _>(BackendError::Unavailable("refused".into())) }
            },
        )
        .await;

        assert_eq!(attempts, 3);
        assert!(!cache.is_enabled());
        assert!(cache.backend().is_none());
        cache.set("k", b"v", Duration::from_secs(1)).await;
        assert_eq!(cache.get("k").await, None);
        cache.invalidate("k").await;
        assert!(matches!(cache.ping().await, Err(BackendError::Disabled)));
    }

    #[tokio::test]
    async fn warming_reports_failures_without_erroring() {
        let (_, cache) = manager();
        let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];

        let report = cache
            .warm(&keys, Duration::from_secs(60), |key| async move {
                match key.as_str() {
                    "a" => Ok(Some(b"alpha".to_vec())),
                    "b" => Ok(None),
                    _ => Err("source offline"),
                }
            })
            .await;

        assert_eq!(
            report,
            WarmReport {
                warmed: 1,
                missing: 1,
                failed: 1,
                skipped: 0
            }
        );
        assert_eq!(cache.get("a").await, Some(b"alpha".to_vec()));
    }

    #[tokio::test]
    async fn warming_is_skipped_when_disabled() {
        let cache = CacheManager::disabled(Duration::from_secs(60));
        let keys = vec!["a".to_string()];
        let report = cache
            .warm(&keys, Duration::from_secs(60), |_| async {
                Ok::<_, String>(Some(b"x".to_vec()))
            })
            .await;
        assert_eq!(report.skipped, 1);
        assert_eq!(report.warmed, 0);
    }
}
