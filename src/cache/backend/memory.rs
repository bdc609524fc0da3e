use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{BackendError, BackendResult, KvBackend};

struct Slot {
    value: Vec<u8>,
    expires_at: Instant,
}

/// 进程内键值后端
///
/// 语义与 Redis 后端一致（过期、原子自增），可以通过 [`set_available`] 模拟故障。
/// 计时使用 tokio 时钟，测试中可以暂停和推进。
///
/// [`set_available`]: MemoryBackend::set_available
#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, Slot>>,
    unavailable: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 模拟后端宕机或恢复
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// 未过期的键数量
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries()
            .values()
            .filter(|slot| slot.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> BackendResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(BackendError::Unavailable("connection refused".into()))
        } else {
            Ok(())
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>> {
        self.check()?;
        let mut entries = self.entries();
        match entries.get(key) {
            Some(slot) if slot.expires_at > Instant::now() => Ok(Some(slot.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> BackendResult<()> {
        self.check()?;
        self.entries().insert(
            key.to_string(),
            Slot {
                value: value.to_vec(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        self.check()?;
        self.entries().remove(key);
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> BackendResult<u64> {
        self.check()?;
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok((before - entries.len()) as u64)
    }

    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> BackendResult<u64> {
        self.check()?;
        let now = Instant::now();
        let mut entries = self.entries();

        let current = match entries.get(key) {
            Some(slot) if slot.expires_at > now => std::str::from_utf8(&slot.value)
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .ok_or_else(|| {
                    BackendError::Unavailable(format!("value at `{}` is not an integer", key))
                })?,
            _ => 0,
        };

        let next = current + 1;
        entries.insert(
            key.to_string(),
            Slot {
                value: next.to_string().into_bytes(),
                expires_at: now + ttl,
            },
        );
        Ok(next)
    }

    async fn ping(&self) -> BackendResult<()> {
        self.check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entries_expire_with_tokio_clock() {
        let backend = MemoryBackend::new();
        backend.set("k", b"v", Duration::from_secs(1)).await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some(b"v".to_vec()));

        tokio::time::advance(Duration::from_millis(1001)).await;
        assert_eq!(backend.get("k").await.unwrap(), None);
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn outage_fails_every_call() {
        let backend = MemoryBackend::new();
        backend.set_available(false);

        assert!(backend.ping().await.is_err());
        assert!(backend.get("k").await.is_err());
        assert!(backend.incr_with_expiry("n", Duration::from_secs(1)).await.is_err());

        backend.set_available(true);
        assert!(backend.ping().await.is_ok());
    }

    #[tokio::test]
    async fn incr_counts_from_one() {
        let backend = MemoryBackend::new();
        let ttl = Duration::from_secs(60);
        assert_eq!(backend.incr_with_expiry("n", ttl).await.unwrap(), 1);
        assert_eq!(backend.incr_with_expiry("n", ttl).await.unwrap(), 2);
    }
}
