//! 租户连接注册表
//!
//! 每个 [`TenantKey`] 最多对应一个活跃连接。首次访问时懒加载建立连接，
//! 同一租户的并发首次访问只会触发一次建立（single-flight），不同租户之间互不阻塞。
//!
//! 借出的连接由 [`TenantLease`] 计数，空闲清理和容量淘汰只会关闭没有借用者的连接。

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::RegistryConfig;
use crate::lifecycle::ShutdownSignal;
use crate::observability::metrics::{
    TENANT_CAPACITY_REJECTED, TENANT_CONNECT, TENANT_EVICT, TENANT_OPEN_CONNECTIONS,
};
use crate::resilience::{RetryError, RetryPolicy, retry};
use crate::tenant::{TenantConnector, TenantKey};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("tenant `{0}` is not known")]
    UnknownTenant(String),

    #[error("tenant `{token}` is unreachable after {attempts} attempt(s): {reason}")]
    Unreachable {
        token: String,
        reason: String,
        attempts: u32,
    },

    #[error("tenant connection capacity exhausted: {max} open, none idle")]
    CapacityExceeded { max: usize },

    #[error("tenant directory unavailable: {0}")]
    DirectoryUnavailable(String),

    #[error("tenant registry is shutting down")]
    ShuttingDown,
}

/// 显式淘汰的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictOutcome {
    Closed,
    /// 仍有借用者，等最后一个借用者归还后由清理任务关闭
    Deferred,
    NotOpen,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub known_tenants: usize,
    pub open_connections: usize,
    pub borrowed_connections: usize,
    pub max_open: usize,
    pub establish_attempts: u64,
    pub establish_failures: u64,
    pub evictions: u64,
    pub capacity_rejections: u64,
}

/// 单个连接的只读快照
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub token: String,
    pub db_name: String,
    pub open: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub idle_ms: u64,
    pub borrowers: usize,
    pub pending_eviction: bool,
    pub last_error: Option<String>,
}

struct Live<H> {
    handle: H,
    created_at: DateTime<Utc>,
}

/// 最近一次建立失败，排队等待的调用方直接拿到同一个错误
struct Failure {
    reason: String,
    error: RegistryError,
}

/// 关闭时轮询借用者归还的间隔
const DRAIN_POLL: Duration = Duration::from_millis(50);

struct TenantSlot<H> {
    live: RwLock<Option<Live<H>>>,
    /// 建立连接期间持有，后到的调用方在这里排队等待结果
    establish: tokio::sync::Mutex<()>,
    borrowers: AtomicUsize,
    last_used_ms: AtomicU64,
    generation: AtomicU64,
    last_error: Mutex<Option<Failure>>,
    pending_eviction: AtomicBool,
    /// 租户已注销或换了数据库，建立中的连接不再入池
    retired: AtomicBool,
}

impl<H> TenantSlot<H> {
    fn new(now_ms: u64) -> Self {
        Self {
            live: RwLock::new(None),
            establish: tokio::sync::Mutex::new(()),
            borrowers: AtomicUsize::new(0),
            last_used_ms: AtomicU64::new(now_ms),
            generation: AtomicU64::new(0),
            last_error: Mutex::new(None),
            pending_eviction: AtomicBool::new(false),
            retired: AtomicBool::new(false),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<Live<H>>> {
        self.live.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<Live<H>>> {
        self.live.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn last_error(&self) -> MutexGuard<'_, Option<Failure>> {
        self.last_error.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_open(&self) -> bool {
        self.read().is_some()
    }

    /// 没有借用者时取出句柄；写锁保证取出期间不会有新的借用
    fn take_if_idle(&self) -> Option<Live<H>> {
        let mut live = self.write();
        if self.borrowers.load(Ordering::SeqCst) > 0 {
            return None;
        }
        live.take()
    }

    /// 已关闭、无借用者且没有正在进行的建立
    fn is_vacant(&self) -> bool {
        self.borrowers.load(Ordering::SeqCst) == 0
            && !self.is_open()
            && self.establish.try_lock().is_ok()
    }
}

#[derive(Default)]
struct Counters {
    establish_attempts: AtomicU64,
    establish_failures: AtomicU64,
    evictions: AtomicU64,
    capacity_rejections: AtomicU64,
}

struct RegistryInner<C: TenantConnector> {
    connector: C,
    config: RegistryConfig,
    retry_policy: RetryPolicy,
    known: DashMap<String, TenantKey>,
    slots: DashMap<TenantKey, Arc<TenantSlot<C::Handle>>>,
    /// 预留打开名额时持有，保证 open 计数不超过上限
    capacity: Mutex<()>,
    open: AtomicUsize,
    counters: Counters,
    epoch: Instant,
    shutdown: ShutdownSignal,
    closing: AtomicBool,
}

pub struct TenantRegistry<C: TenantConnector> {
    inner: Arc<RegistryInner<C>>,
}

impl<C: TenantConnector> Clone for TenantRegistry<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// 借出的租户连接
///
/// 持有期间连接不会被清理或淘汰；drop 时刷新最近使用时间。
pub struct TenantLease<H> {
    handle: H,
    slot: Arc<TenantSlot<H>>,
    epoch: Instant,
}

impl<H> TenantLease<H> {
    pub fn handle(&self) -> &H {
        &self.handle
    }
}

impl<H> Deref for TenantLease<H> {
    type Target = H;

    fn deref(&self) -> &H {
        &self.handle
    }
}

impl<H> Drop for TenantLease<H> {
    fn drop(&mut self) {
        self.slot
            .last_used_ms
            .store(millis_since(self.epoch), Ordering::SeqCst);
        self.slot.borrowers.fetch_sub(1, Ordering::SeqCst);
    }
}

fn millis_since(epoch: Instant) -> u64 {
    epoch.elapsed().as_millis() as u64
}

impl<C: TenantConnector> TenantRegistry<C> {
    pub fn new(connector: C, config: RegistryConfig, shutdown: ShutdownSignal) -> Self {
        let retry_policy = config.retry_policy();
        Self {
            inner: Arc::new(RegistryInner {
                connector,
                config,
                retry_policy,
                known: DashMap::new(),
                slots: DashMap::new(),
                capacity: Mutex::new(()),
                open: AtomicUsize::new(0),
                counters: Counters::default(),
                epoch: Instant::now(),
                shutdown,
                closing: AtomicBool::new(false),
            }),
        }
    }

    pub fn connector(&self) -> &C {
        &self.inner.connector
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    /// 登记一个已知租户；同一 token 换了数据库时旧连接会被关闭
    pub async fn register(&self, key: TenantKey) {
        let previous = self.inner.known.insert(key.token().to_string(), key.clone());
        if let Some(slot) = self.inner.slots.get(&key) {
            slot.retired.store(false, Ordering::SeqCst);
        }
        if let Some(previous) = previous.filter(|previous| *previous != key) {
            tracing::info!(tenant = key.token(), from = previous.db_name(), to = key.db_name(), "Tenant database changed");
            self.retire(&previous).await;
        }
    }

    /// 注销租户并关闭其连接
    pub async fn deregister(&self, token: &str) -> Option<TenantKey> {
        let (_, key) = self.inner.known.remove(token)?;
        self.retire(&key).await;
        Some(key)
    }

    pub fn lookup(&self, token: &str) -> Option<TenantKey> {
        self.inner.known.get(token).map(|entry| entry.value().clone())
    }

    pub fn known_tenants(&self) -> Vec<TenantKey> {
        self.inner
            .known
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// 按 token 解析，未登记的 token 返回 `UnknownTenant`
    pub async fn resolve_token(&self, token: &str) -> Result<TenantLease<C::Handle>, RegistryError> {
        let key = self
            .lookup(token)
            .ok_or_else(|| RegistryError::UnknownTenant(token.to_string()))?;
        self.resolve(&key).await
    }

    /// 返回租户的活跃连接，必要时建立连接
    pub async fn resolve(&self, key: &TenantKey) -> Result<TenantLease<C::Handle>, RegistryError> {
        if self.inner.closing.load(Ordering::SeqCst) {
            return Err(RegistryError::ShuttingDown);
        }

        let slot = self.slot(key);
        if let Some(lease) = self.try_lease(&slot) {
            return Ok(lease);
        }

        let observed = slot.generation.load(Ordering::SeqCst);
        let _establishing = slot.establish.lock().await;

        // 排队期间别人可能已经建好了连接
        if let Some(lease) = self.try_lease(&slot) {
            return Ok(lease);
        }

        // 排队期间别人的建立尝试失败了：共享同一个失败结果，不再重复连接
        if slot.generation.load(Ordering::SeqCst) != observed {
            if let Some(failure) = slot.last_error().as_ref() {
                return Err(failure.error.clone());
            }
        }

        if self.inner.closing.load(Ordering::SeqCst) {
            return Err(RegistryError::ShuttingDown);
        }
        if slot.retired.load(Ordering::SeqCst) {
            return Err(RegistryError::UnknownTenant(key.token().to_string()));
        }

        self.establish(key, &slot).await
    }

    async fn establish(
        &self,
        key: &TenantKey,
        slot: &Arc<TenantSlot<C::Handle>>,
    ) -> Result<TenantLease<C::Handle>, RegistryError> {
        let victim = self.reserve_capacity(key)?;
        if let Some((victim_key, live)) = victim {
            tracing::info!(tenant = victim_key.token(), "Evicting least recently used tenant connection");
            metrics::counter!(TENANT_EVICT.name, "reason" => "lru").increment(1);
            self.inner.connector.close(live.handle).await;
        }

        let counters = &self.inner.counters;
        let connector = &self.inner.connector;
        let result = retry(
            &self.inner.retry_policy,
            &self.inner.shutdown,
            "tenant connect",
            |attempt| {
                counters.establish_attempts.fetch_add(1, Ordering::SeqCst);
                tracing::debug!(tenant = key.token(), attempt, "Establishing tenant connection");
                connector.connect(key)
            },
        )
        .await;

        match result {
            Ok(handle) => {
                let created_at = Utc::now();
                // 在写锁内判断，retire 和 close_all 要么看到新连接，要么让这里丢弃它
                let rejected = {
                    let mut live = slot.write();
                    if self.inner.closing.load(Ordering::SeqCst) {
                        Some(RegistryError::ShuttingDown)
                    } else if slot.retired.load(Ordering::SeqCst) {
                        Some(RegistryError::UnknownTenant(key.token().to_string()))
                    } else {
                        *live = Some(Live {
                            handle: handle.clone(),
                            created_at,
                        });
                        slot.borrowers.fetch_add(1, Ordering::SeqCst);
                        slot.pending_eviction.store(false, Ordering::SeqCst);
                        None
                    }
                };

                if let Some(error) = rejected {
                    self.inner.open.fetch_sub(1, Ordering::SeqCst);
                    self.publish_open_gauge();
                    self.inner.connector.close(handle).await;
                    tracing::info!(tenant = key.token(), error = %error, "Tenant connection discarded after connect");

                    *slot.last_error() = Some(Failure {
                        reason: error.to_string(),
                        error: error.clone(),
                    });
                    slot.generation.fetch_add(1, Ordering::SeqCst);
                    return Err(error);
                }

                *slot.last_error() = None;
                slot.last_used_ms.store(self.now_ms(), Ordering::SeqCst);
                slot.generation.fetch_add(1, Ordering::SeqCst);

                metrics::counter!(TENANT_CONNECT.name, "outcome" => "ok").increment(1);
                self.publish_open_gauge();
                tracing::info!(tenant = key.token(), db = key.db_name(), "Tenant connection established");

                Ok(TenantLease {
                    handle,
                    slot: slot.clone(),
                    epoch: self.inner.epoch,
                })
            }
            Err(e) => {
                self.inner.open.fetch_sub(1, Ordering::SeqCst);
                counters.establish_failures.fetch_add(1, Ordering::SeqCst);
                metrics::counter!(TENANT_CONNECT.name, "outcome" => "error").increment(1);

                let attempts = e.attempts();
                let (reason, error) = match e {
                    RetryError::Exhausted { last_error, .. } => {
                        let reason = last_error.to_string();
                        tracing::error!(tenant = key.token(), attempts, error = %reason, "Tenant unreachable");
                        (
                            reason.clone(),
                            RegistryError::Unreachable {
                                token: key.token().to_string(),
                                reason,
                                attempts,
                            },
                        )
                    }
                    RetryError::Cancelled { .. } => {
                        ("shutting down".to_string(), RegistryError::ShuttingDown)
                    }
                };

                *slot.last_error() = Some(Failure {
                    reason,
                    error: error.clone(),
                });
                slot.generation.fetch_add(1, Ordering::SeqCst);
                Err(error)
            }
        }
    }

    fn slot(&self, key: &TenantKey) -> Arc<TenantSlot<C::Handle>> {
        let now = self.now_ms();
        self.inner
            .slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(TenantSlot::new(now)))
            .value()
            .clone()
    }

    fn try_lease(&self, slot: &Arc<TenantSlot<C::Handle>>) -> Option<TenantLease<C::Handle>> {
        let live = slot.read();
        let handle = live.as_ref()?.handle.clone();
        // 读锁内登记借用，清理任务拿写锁时一定能看到
        slot.borrowers.fetch_add(1, Ordering::SeqCst);
        Some(TenantLease {
            handle,
            slot: slot.clone(),
            epoch: self.inner.epoch,
        })
    }

    /// 预留一个打开名额；已满时取出最久未使用的空闲连接交给调用方关闭
    fn reserve_capacity(
        &self,
        requester: &TenantKey,
    ) -> Result<Option<(TenantKey, Live<C::Handle>)>, RegistryError> {
        let max = self.inner.config.max_open.max(1);
        let _capacity = self
            .inner
            .capacity
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if self.inner.open.load(Ordering::SeqCst) < max {
            self.inner.open.fetch_add(1, Ordering::SeqCst);
            return Ok(None);
        }

        let mut candidates: Vec<(TenantKey, Arc<TenantSlot<C::Handle>>, u64)> = self
            .inner
            .slots
            .iter()
            .filter(|entry| entry.key() != requester)
            .filter(|entry| {
                let slot = entry.value();
                slot.borrowers.load(Ordering::SeqCst) == 0 && slot.is_open()
            })
            .map(|entry| {
                let slot = entry.value().clone();
                let last_used = slot.last_used_ms.load(Ordering::SeqCst);
                (entry.key().clone(), slot, last_used)
            })
            .collect();
        candidates.sort_by_key(|(_, _, last_used)| *last_used);

        for (key, slot, _) in candidates {
            if let Some(live) = slot.take_if_idle() {
                slot.pending_eviction.store(false, Ordering::SeqCst);
                self.inner.counters.evictions.fetch_add(1, Ordering::SeqCst);
                // 名额从被淘汰的连接直接转给新连接，open 计数不变
                return Ok(Some((key, live)));
            }
        }

        self.inner
            .counters
            .capacity_rejections
            .fetch_add(1, Ordering::SeqCst);
        metrics::counter!(TENANT_CAPACITY_REJECTED.name).increment(1);
        tracing::warn!(tenant = requester.token(), max, "Tenant connection capacity exhausted");
        Err(RegistryError::CapacityExceeded { max })
    }

    /// 显式淘汰某个租户的连接
    pub async fn evict(&self, key: &TenantKey) -> EvictOutcome {
        let Some(slot) = self.inner.slots.get(key).map(|entry| entry.value().clone()) else {
            return EvictOutcome::NotOpen;
        };
        if !slot.is_open() {
            return EvictOutcome::NotOpen;
        }

        match slot.take_if_idle() {
            Some(live) => {
                self.close_live(key, &slot, live, "explicit").await;
                EvictOutcome::Closed
            }
            None if slot.is_open() => {
                slot.pending_eviction.store(true, Ordering::SeqCst);
                tracing::debug!(tenant = key.token(), "Tenant connection busy, eviction deferred");
                EvictOutcome::Deferred
            }
            None => EvictOutcome::NotOpen,
        }
    }

    /// 关闭空闲超时或待淘汰且没有借用者的连接，返回关闭数量
    pub async fn sweep(&self) -> usize {
        let now = self.now_ms();
        let idle_ms = self.inner.config.idle_timeout().as_millis() as u64;

        let slots = self.snapshot();

        let mut closed = 0;
        for (key, slot) in &slots {
            let idle_for = now.saturating_sub(slot.last_used_ms.load(Ordering::SeqCst));
            let pending = slot.pending_eviction.load(Ordering::SeqCst);
            if idle_for < idle_ms && !pending {
                continue;
            }

            if let Some(live) = slot.take_if_idle() {
                let reason = if pending { "deferred" } else { "idle" };
                tracing::debug!(tenant = key.token(), idle_ms = idle_for, reason, "Sweeping tenant connection");
                self.close_live(key, slot, live, reason).await;
                closed += 1;
            }
        }

        // 注销过的租户，以及未登记且建立失败的租户，不再保留槽位
        let pruned = slots
            .iter()
            .filter(|(key, slot)| {
                slot.retired.load(Ordering::SeqCst)
                    || (slot.last_error().is_some() && self.lookup(key.token()).as_ref() != Some(key))
            })
            .filter(|(key, _)| self.inner.slots.remove_if(key, |_, slot| slot.is_vacant()).is_some())
            .count();
        if pruned > 0 {
            tracing::debug!(pruned, "Pruned vacant tenant slots");
        }

        closed
    }

    /// 关闭全部连接，之后的解析请求返回 `ShuttingDown`
    ///
    /// 仍被借用的连接等到归还后再关闭，最多等待 `drain_timeout`；超时后保留未归还的连接。
    pub async fn close_all(&self) -> usize {
        self.inner.closing.store(true, Ordering::SeqCst);
        let deadline = Instant::now() + self.inner.config.drain_timeout();

        let mut closed = 0;
        loop {
            let mut borrowed = 0;
            for (key, slot) in self.snapshot() {
                if let Some(live) = slot.take_if_idle() {
                    self.close_live(&key, &slot, live, "shutdown").await;
                    closed += 1;
                } else if slot.is_open() {
                    slot.pending_eviction.store(true, Ordering::SeqCst);
                    borrowed += 1;
                }
            }

            if borrowed == 0 {
                break;
            }
            if Instant::now() >= deadline {
                tracing::warn!(borrowed, "Tenant connections still borrowed after drain timeout");
                break;
            }
            tokio::time::sleep(DRAIN_POLL).await;
        }

        tracing::info!(closed, "All tenant connections closed");
        closed
    }

    pub fn stats(&self) -> RegistryStats {
        let mut open_connections = 0;
        let mut borrowed_connections = 0;
        for entry in self.inner.slots.iter() {
            let slot = entry.value();
            if slot.is_open() {
                open_connections += 1;
                if slot.borrowers.load(Ordering::SeqCst) > 0 {
                    borrowed_connections += 1;
                }
            }
        }

        let counters = &self.inner.counters;
        RegistryStats {
            known_tenants: self.inner.known.len(),
            open_connections,
            borrowed_connections,
            max_open: self.inner.config.max_open,
            establish_attempts: counters.establish_attempts.load(Ordering::SeqCst),
            establish_failures: counters.establish_failures.load(Ordering::SeqCst),
            evictions: counters.evictions.load(Ordering::SeqCst),
            capacity_rejections: counters.capacity_rejections.load(Ordering::SeqCst),
        }
    }

    pub fn connection_info(&self, key: &TenantKey) -> Option<ConnectionInfo> {
        let slot = self.inner.slots.get(key).map(|entry| entry.value().clone())?;
        let created_at = slot.read().as_ref().map(|live| live.created_at);
        let last_error = slot.last_error().as_ref().map(|failure| failure.reason.clone());

        Some(ConnectionInfo {
            token: key.token().to_string(),
            db_name: key.db_name().to_string(),
            open: created_at.is_some(),
            created_at,
            idle_ms: self
                .now_ms()
                .saturating_sub(slot.last_used_ms.load(Ordering::SeqCst)),
            borrowers: slot.borrowers.load(Ordering::SeqCst),
            pending_eviction: slot.pending_eviction.load(Ordering::SeqCst),
            last_error,
        })
    }

    async fn close_live(
        &self,
        key: &TenantKey,
        slot: &TenantSlot<C::Handle>,
        live: Live<C::Handle>,
        reason: &'static str,
    ) {
        slot.pending_eviction.store(false, Ordering::SeqCst);
        self.inner.open.fetch_sub(1, Ordering::SeqCst);
        self.inner.counters.evictions.fetch_add(1, Ordering::SeqCst);
        metrics::counter!(TENANT_EVICT.name, "reason" => reason).increment(1);
        self.publish_open_gauge();

        self.inner.connector.close(live.handle).await;
        tracing::info!(tenant = key.token(), reason, "Tenant connection closed");
    }

    /// 关闭并移除某个租户的槽位
    ///
    /// 仍被借用或正在建立连接的槽位只做标记，由清理任务在空出后移除。
    async fn retire(&self, key: &TenantKey) {
        let Some(slot) = self.inner.slots.get(key).map(|entry| entry.value().clone()) else {
            return;
        };
        slot.retired.store(true, Ordering::SeqCst);

        if self.evict(key).await != EvictOutcome::Deferred {
            self.inner.slots.remove_if(key, |_, slot| slot.is_vacant());
        }
    }

    fn snapshot(&self) -> Vec<(TenantKey, Arc<TenantSlot<C::Handle>>)> {
        self.inner
            .slots
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    fn publish_open_gauge(&self) {
        metrics::gauge!(TENANT_OPEN_CONNECTIONS.name)
            .set(self.inner.open.load(Ordering::SeqCst) as f64);
    }

    fn now_ms(&self) -> u64 {
        millis_since(self.inner.epoch)
    }
}
