use std::sync::Arc;

use axum::Router;
use config::Config;
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::PgPool;

pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod middleware;
pub mod observability;
pub mod resilience;
pub mod result;
pub mod router;
pub mod routes;
pub mod tenant;

use cache::{CacheManager, TenantCacheOperations, WarmReport};
use database::OrganizationStore;
use health::{CacheProbe, HealthAggregator, PrimaryStoreProbe, RateLimiterProbe, RegistryProbe};
use lifecycle::Shutdown;
use middleware::{RateLimiter, log_errors, rate_limit};
use tenant::{ConnectError, PgConnector, TenantDirectory, TenantRegistry};

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub cache: CacheManager,
    pub rate_limiter: RateLimiter,
    pub registry: TenantRegistry<PgConnector>,
    pub directory: TenantDirectory<PgConnector>,
    pub organizations: Arc<OrganizationStore>,
    pub health: Arc<HealthAggregator>,
}

impl AppState {
    /// 按依赖顺序组装各组件
    ///
    /// 缓存连接失败不会阻止启动；主库连接池懒加载，只有配置错误会返回错误。
    pub async fn init(config: Config, shutdown: &Shutdown) -> Result<Self, ConnectError> {
        let pool = database::connect_primary(&config)?;

        let cache = CacheManager::connect(&config.cache, &shutdown.subscribe()).await;
        let rate_limiter = RateLimiter::from_cache(&cache, config.rate_limit.clone());

        let registry = TenantRegistry::new(
            PgConnector::new(config.tenant_store.clone()),
            config.registry.clone(),
            shutdown.subscribe(),
        );
        let organizations = Arc::new(OrganizationStore::new(pool.clone()));
        let directory = TenantDirectory::new(registry.clone(), cache.clone(), organizations.clone());

        let health = HealthAggregator::from_config(&config.health)
            .with_probe(Arc::new(PrimaryStoreProbe::new(pool.clone())))
            .with_probe(Arc::new(CacheProbe::new(cache.clone())))
            .with_probe(Arc::new(RateLimiterProbe::new(rate_limiter.clone())))
            .with_probe(Arc::new(RegistryProbe::new(registry.clone())));

        Ok(Self {
            pool,
            config,
            cache,
            rate_limiter,
            registry,
            directory,
            organizations,
            health: Arc::new(health),
        })
    }

    /// 预加载租户目录并预热缓存，失败只记录警告
    pub async fn warm_up(&self) -> WarmReport {
        if let Err(e) = self.directory.preload().await {
            tracing::warn!(error = %e, "Tenant directory preload failed, tenants will be loaded on demand");
        }

        TenantCacheOperations::warm_directory(
            &self.cache,
            self.organizations.as_ref(),
            &self.config.cache.warm_keys,
        )
        .await
    }

    pub fn router(&self, metrics: Option<PrometheusHandle>) -> Router {
        let tenant_routes = router::tenant_routes(self.directory.clone()).layer(
            axum::middleware::from_fn_with_state(self.rate_limiter.clone(), rate_limit),
        );

        let mut app = Router::new()
            .merge(router::health_routes(self.health.clone()))
            .merge(tenant_routes);

        if let Some(handle) = metrics {
            app = app.merge(router::metrics_routes(handle));
        }

        let app = app.layer(axum::middleware::from_fn(log_errors));

        // 开发环境允许所有来源
        #[cfg(debug_assertions)]
        let app = app.layer(tower_http::cors::CorsLayer::permissive());

        app
    }
}
