use async_trait::async_trait;
use sqlx::PgPool;

use crate::cache::CacheManager;
use crate::health::Status;
use crate::middleware::RateLimiter;
use crate::tenant::{TenantConnector, TenantRegistry};

/// 探测失败的原因，对应组件记为 down
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ProbeError(pub String);

/// 探测对象在汇总中的角色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    /// 主库
    Primary,
    /// 外部依赖，例如缓存后端
    Dependency,
    /// 进程内统计，只能把整体状态降为 degraded
    Informational,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeReport {
    pub status: Status,
    pub message: Option<String>,
    pub details: Option<serde_json::Value>,
}

impl ProbeReport {
    pub fn up() -> Self {
        Self {
            status: Status::Up,
            message: None,
            details: None,
        }
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self {
            status: Status::Degraded,
            message: Some(message.into()),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[async_trait]
pub trait HealthProbe: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> ProbeKind;

    async fn probe(&self) -> Result<ProbeReport, ProbeError>;
}

/// 主库 `SELECT 1`
pub struct PrimaryStoreProbe {
    pool: PgPool,
}

impl PrimaryStoreProbe {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HealthProbe for PrimaryStoreProbe {
    fn name(&self) -> &str {
        "database"
    }

    fn kind(&self) -> ProbeKind {
        ProbeKind::Primary
    }

    async fn probe(&self) -> Result<ProbeReport, ProbeError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| ProbeError(e.to_string()))?;
        Ok(ProbeReport::up())
    }
}

/// 缓存后端 `PING`
pub struct CacheProbe {
    cache: CacheManager,
}

impl CacheProbe {
    pub fn new(cache: CacheManager) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl HealthProbe for CacheProbe {
    fn name(&self) -> &str {
        "cache"
    }

    fn kind(&self) -> ProbeKind {
        ProbeKind::Dependency
    }

    async fn probe(&self) -> Result<ProbeReport, ProbeError> {
        self.cache
            .ping()
            .await
            .map_err(|e| ProbeError(e.to_string()))?;
        Ok(ProbeReport::up())
    }
}

/// 限流器是否处于放行降级状态
pub struct RateLimiterProbe {
    limiter: RateLimiter,
}

impl RateLimiterProbe {
    pub fn new(limiter: RateLimiter) -> Self {
        Self { limiter }
    }
}

#[async_trait]
impl HealthProbe for RateLimiterProbe {
    fn name(&self) -> &str {
        "rate_limiter"
    }

    fn kind(&self) -> ProbeKind {
        ProbeKind::Informational
    }

    async fn probe(&self) -> Result<ProbeReport, ProbeError> {
        if self.limiter.is_degraded() {
            Ok(ProbeReport::degraded(
                "counter store unavailable, requests are admitted without limiting",
            ))
        } else {
            Ok(ProbeReport::up())
        }
    }
}

/// 注册表统计
pub struct RegistryProbe<C: TenantConnector> {
    registry: TenantRegistry<C>,
}

impl<C: TenantConnector> RegistryProbe<C> {
    pub fn new(registry: TenantRegistry<C>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl<C: TenantConnector> HealthProbe for RegistryProbe<C> {
    fn name(&self) -> &str {
        "tenant_registry"
    }

    fn kind(&self) -> ProbeKind {
        ProbeKind::Informational
    }

    async fn probe(&self) -> Result<ProbeReport, ProbeError> {
        let stats = self.registry.stats();
        let details = serde_json::to_value(&stats).map_err(|e| ProbeError(e.to_string()))?;

        let saturated = stats.max_open > 0 && stats.borrowed_connections >= stats.max_open;
        let report = if saturated {
            ProbeReport::degraded("every tenant connection slot is borrowed")
        } else {
            ProbeReport::up()
        };
        Ok(report.with_details(details))
    }
}
