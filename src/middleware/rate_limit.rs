use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};

use crate::cache::{CacheManager, KvBackend, RateLimitCacheOperations};
use crate::config::RateLimitConfig;
use crate::error::AppError;
use crate::observability::metrics::{RATE_LIMIT_ALLOWED, RATE_LIMIT_FAIL_OPEN, RATE_LIMIT_REJECTED};

pub const LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";

/// 分布式固定窗口限流器
///
/// 计数器全部保存在共享的键值后端里，多个实例共用同一份配额。
/// 后端不可用时放行请求（fail open），并通过 [`RateLimiter::is_degraded`] 暴露降级状态。
#[derive(Clone)]
pub struct RateLimiter {
    backend: Option<Arc<dyn KvBackend>>,
    config: RateLimitConfig,
    degraded: Arc<AtomicBool>,
}

/// 一次准入判断的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u64,
    pub limit: u64,
    /// 距离当前窗口结束的时间
    pub reset_after: Duration,
}

impl RateLimiter {
    pub fn new(backend: Option<Arc<dyn KvBackend>>, config: RateLimitConfig) -> Self {
        Self {
            backend,
            config,
            degraded: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 与缓存管理器共用同一个后端连接
    pub fn from_cache(cache: &CacheManager, config: RateLimitConfig) -> Self {
        Self::new(cache.backend(), config)
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// 最近一次判断是否因为后端故障而放行
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// 使用配置中的默认配额
    pub async fn check(&self, identity: &str) -> RateDecision {
        self.allow(identity, self.config.requests, self.config.window())
            .await
    }

    pub async fn allow(&self, identity: &str, limit: u64, window: Duration) -> RateDecision {
        self.allow_at(identity, limit, window, Utc::now()).await
    }

    pub async fn allow_at(
        &self,
        identity: &str,
        limit: u64,
        window: Duration,
        now: DateTime<Utc>,
    ) -> RateDecision {
        let window_secs = window.as_secs().max(1);
        let now_secs = now.timestamp().max(0) as u64;
        let bucket = now_secs / window_secs;
        let reset_at = (bucket + 1) * window_secs;
        let reset_after = Duration::from_secs(reset_at - now_secs);

        let Some(backend) = self.backend.as_ref() else {
            return self.fail_open(identity, limit, reset_after, "cache backend disabled");
        };

        let result = RateLimitCacheOperations::increment_window(
            backend.as_ref(),
            identity,
            bucket,
            Duration::from_secs(window_secs),
            reset_at as i64,
        )
        .await;

        match result {
            Ok(window) => {
                if self.degraded.swap(false, Ordering::SeqCst) {
                    tracing::info!("Rate limiter backend recovered");
                }

                let allowed = window.count <= limit;
                if allowed {
                    metrics::counter!(RATE_LIMIT_ALLOWED.name).increment(1);
                } else {
                    metrics::counter!(RATE_LIMIT_REJECTED.name).increment(1);
                    tracing::debug!(identity, count = window.count, limit, "Rate limit exceeded");
                }

                RateDecision {
                    allowed,
                    remaining: limit.saturating_sub(window.count),
                    limit,
                    reset_after,
                }
            }
            Err(e) => self.fail_open(identity, limit, reset_after, &e.to_string()),
        }
    }

    fn fail_open(&self, identity: &str, limit: u64, reset_after: Duration, reason: &str) -> RateDecision {
        if !self.degraded.swap(true, Ordering::SeqCst) {
            tracing::warn!(identity, reason, "Rate limiter backend unavailable, failing open");
        }
        metrics::counter!(RATE_LIMIT_FAIL_OPEN.name).increment(1);

        RateDecision {
            allowed: true,
            remaining: limit,
            limit,
            reset_after,
        }
    }
}

/// 客户端 IP：优先 x-real-ip，其次 x-forwarded-for 的第一个地址，最后是连接地址
pub fn client_ip<B>(req: &Request<B>) -> String {
    let remote_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string());

    req.headers()
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .filter(|ip| !ip.trim().is_empty())
        .or_else(|| {
            req.headers()
                .get("x-forwarded-for")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.split(',').find(|ip| !ip.trim().is_empty()))
        })
        .or(remote_ip.as_deref())
        .unwrap_or("unknown")
        .trim()
        .to_string()
}

pub async fn rate_limit(
    State(limiter): State<RateLimiter>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let ip = client_ip(&req);
    let decision = limiter.check(&ip).await;

    let mut response = if decision.allowed {
        next.run(req).await
    } else {
        AppError::RateLimited {
            retry_after_secs: decision.reset_after.as_secs(),
        }
        .into_response()
    };

    let headers = response.headers_mut();
    headers.insert(LIMIT_HEADER, HeaderValue::from(decision.limit));
    headers.insert(REMAINING_HEADER, HeaderValue::from(decision.remaining));
    response
}
