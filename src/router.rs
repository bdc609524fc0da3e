use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get},
};
use metrics_exporter_prometheus::PrometheusHandle;

use crate::health::HealthAggregator;
use crate::routes;
use crate::tenant::{TenantConnector, TenantDirectory};

// 健康检查路由
pub fn health_routes(aggregator: Arc<HealthAggregator>) -> Router {
    Router::new()
        .route("/health", get(routes::health::health_check))
        .with_state(aggregator)
}

// 租户路由
pub fn tenant_routes<C: TenantConnector>(directory: TenantDirectory<C>) -> Router {
    Router::new()
        .route("/api/tenants/{token}/status", get(routes::tenant::tenant_status::<C>))
        .route("/api/tenants/{token}/connection", delete(routes::tenant::evict_tenant::<C>))
        .with_state(directory)
}

// Prometheus 指标路由
pub fn metrics_routes(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(routes::metrics::render_metrics))
        .with_state(handle)
}
