//! Shared fakes for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tenant_core::config::RegistryConfig;
use tenant_core::lifecycle::ShutdownSignal;
use tenant_core::tenant::{ConnectError, TenantConnector, TenantKey, TenantRegistry, TenantSource};

/// Handle returned by [`FakeConnector`]: which tenant it belongs to and a unique id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeHandle {
    pub db_name: String,
    pub id: u64,
}

/// Connector that counts attempts and can be told to fail or stall per database.
#[derive(Default)]
pub struct FakeConnector {
    next_id: AtomicU64,
    attempts: Mutex<HashMap<String, usize>>,
    failing: Mutex<HashSet<String>>,
    delays: Mutex<HashMap<String, Duration>>,
    pub closed: AtomicUsize,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, db_name: &str) {
        self.failing.lock().unwrap().insert(db_name.to_string());
    }

    pub fn recover(&self, db_name: &str) {
        self.failing.lock().unwrap().remove(db_name);
    }

    pub fn delay(&self, db_name: &str, delay: Duration) {
        self.delays
            .lock()
            .unwrap()
            .insert(db_name.to_string(), delay);
    }

    pub fn attempts(&self, db_name: &str) -> usize {
        self.attempts
            .lock()
            .unwrap()
            .get(db_name)
            .copied()
            .unwrap_or(0)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TenantConnector for FakeConnector {
    type Handle = FakeHandle;

    async fn connect(&self, key: &TenantKey) -> Result<FakeHandle, ConnectError> {
        let db_name = key.db_name().to_string();
        *self.attempts.lock().unwrap().entry(db_name.clone()).or_default() += 1;

        let delay = self.delays.lock().unwrap().get(&db_name).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.lock().unwrap().contains(&db_name) {
            return Err(ConnectError::Other(format!("database `{}` refused connection", db_name)));
        }

        Ok(FakeHandle {
            db_name,
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
        })
    }

    async fn close(&self, _handle: FakeHandle) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// In-memory organizations table.
#[derive(Default)]
pub struct FakeSource {
    tenants: Mutex<HashMap<String, TenantKey>>,
    pub lookups: AtomicUsize,
}

impl FakeSource {
    pub fn with(tenants: &[(&str, &str)]) -> Self {
        let source = Self::default();
        for (token, db_name) in tenants {
            source
                .tenants
                .lock()
                .unwrap()
                .insert(token.to_string(), TenantKey::new(*token, *db_name));
        }
        source
    }
}

#[async_trait]
impl TenantSource for FakeSource {
    async fn find_by_token(&self, token: &str) -> Result<Option<TenantKey>, sqlx::Error> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.tenants.lock().unwrap().get(token).cloned())
    }

    async fn list(&self) -> Result<Vec<TenantKey>, sqlx::Error> {
        Ok(self.tenants.lock().unwrap().values().cloned().collect())
    }
}

/// Registry with a single fast connect attempt so failure tests stay quick.
pub fn registry(max_open: usize) -> TenantRegistry<FakeConnector> {
    registry_with(FakeConnector::new(), max_open)
}

pub fn registry_with(connector: FakeConnector, max_open: usize) -> TenantRegistry<FakeConnector> {
    let config = RegistryConfig {
        max_open,
        idle_timeout_secs: 30,
        connect_attempts: 1,
        retry_base_ms: 1,
        retry_max_ms: 1,
        ..RegistryConfig::default()
    };
    TenantRegistry::new(connector, config, ShutdownSignal::never())
}

pub fn key(token: &str) -> TenantKey {
    TenantKey::new(token, format!("org_{}", token))
}
