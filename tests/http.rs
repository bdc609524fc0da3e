//! Tenant routes and the rate-limit middleware over the HTTP surface.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode};
use serde_json::Value;
use tenant_core::cache::{CacheManager, KvBackend, MemoryBackend, TenantCacheOperations};
use tenant_core::config::RateLimitConfig;
use tenant_core::middleware::{LIMIT_HEADER, REMAINING_HEADER, RateLimiter, rate_limit};
use tenant_core::router;
use tenant_core::tenant::{TenantDirectory, TenantKey};
use tower::ServiceExt;

mod common;

use common::{FakeConnector, FakeSource, registry_with};

fn directory(connector: FakeConnector, source: Arc<FakeSource>) -> TenantDirectory<FakeConnector> {
    let cache = CacheManager::new(Arc::new(MemoryBackend::new()), Duration::from_secs(60));
    TenantDirectory::new(registry_with(connector, 8), cache, source)
}

async fn send(app: &Router, method: Method, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("x-real-ip", "203.0.113.9")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

#[tokio::test]
async fn status_resolves_known_tenant() {
    let source = Arc::new(FakeSource::with(&[("acme", "org_acme")]));
    let app = router::tenant_routes(directory(FakeConnector::new(), source.clone()));

    let (status, body) = send(&app, Method::GET, "/api/tenants/acme/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["code"], 0);
    assert_eq!(body["content"]["db_name"], "org_acme");
    assert_eq!(body["content"]["connection"]["open"], true);
    assert_eq!(body["content"]["connection"]["borrowers"], 0);

    // second lookup is served from the registry
    let (status, _) = send(&app, Method::GET, "/api/tenants/acme/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(source.lookups.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unknown_tenant_is_404_and_unreachable_is_502() {
    let source = Arc::new(FakeSource::with(&[("down", "org_down")]));
    let connector = FakeConnector::new();
    connector.fail("org_down");
    let app = router::tenant_routes(directory(connector, source));

    let (status, body) = send(&app, Method::GET, "/api/tenants/ghost/status").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], 1004);

    let (status, body) = send(&app, Method::GET, "/api/tenants/down/status").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["code"], 1006);
}

#[tokio::test]
async fn directory_cache_is_filled_on_first_lookup() {
    let source = Arc::new(FakeSource::with(&[("acme", "org_acme")]));
    let cache = CacheManager::new(Arc::new(MemoryBackend::new()), Duration::from_secs(60));
    let directory = TenantDirectory::new(registry_with(FakeConnector::new(), 8), cache.clone(), source.clone());

    directory.find("acme").await.unwrap();
    assert_eq!(
        TenantCacheOperations::get_cached_tenant(&cache, "acme").await,
        Some(TenantKey::new("acme", "org_acme"))
    );

    // a fresh registry still avoids the primary store thanks to the cache
    let other = TenantDirectory::new(registry_with(FakeConnector::new(), 8), cache, source.clone());
    other.find("acme").await.unwrap();
    assert_eq!(source.lookups.load(Ordering::SeqCst), 1);

    directory.forget("acme").await;
    assert!(directory.registry().lookup("acme").is_none());
}

#[tokio::test]
async fn evict_route_closes_idle_connection() {
    let source = Arc::new(FakeSource::with(&[("acme", "org_acme")]));
    let dir = directory(FakeConnector::new(), source);
    let app = router::tenant_routes(dir.clone());

    let (status, _) = send(&app, Method::GET, "/api/tenants/acme/status").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, Method::DELETE, "/api/tenants/acme/connection").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["content"]["outcome"], "closed");
    assert_eq!(dir.registry().connector().closed(), 1);
}

#[tokio::test]
async fn rate_limit_middleware_rejects_with_429() {
    let source = Arc::new(FakeSource::with(&[("acme", "org_acme")]));
    let backend: Arc<dyn KvBackend> = Arc::new(MemoryBackend::new());
    let limiter = RateLimiter::new(
        Some(backend),
        RateLimitConfig {
            requests: 2,
            window_secs: 3600,
        },
    );
    let app = router::tenant_routes(directory(FakeConnector::new(), source))
        .layer(axum::middleware::from_fn_with_state(limiter, rate_limit));

    let mut statuses = Vec::new();
    let mut remaining = Vec::new();
    for _ in 0..3 {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/tenants/acme/status")
                    .header("x-real-ip", "203.0.113.9")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers()[LIMIT_HEADER], "2");
        remaining.push(response.headers()[REMAINING_HEADER].to_str().unwrap().to_string());
        statuses.push(response.status());
    }

    assert_eq!(
        statuses,
        vec![StatusCode::OK, StatusCode::OK, StatusCode::TOO_MANY_REQUESTS]
    );
    assert_eq!(remaining, vec!["1", "0", "0"]);
}

#[tokio::test]
async fn rate_limit_middleware_fails_open_without_backend() {
    let source = Arc::new(FakeSource::with(&[("acme", "org_acme")]));
    let limiter = RateLimiter::new(
        None,
        RateLimitConfig {
            requests: 1,
            window_secs: 60,
        },
    );
    let app = router::tenant_routes(directory(FakeConnector::new(), source))
        .layer(axum::middleware::from_fn_with_state(limiter.clone(), rate_limit));

    for _ in 0..3 {
        let (status, _) = send(&app, Method::GET, "/api/tenants/acme/status").await;
        assert_eq!(status, StatusCode::OK);
    }
    assert!(limiter.is_degraded());
}
