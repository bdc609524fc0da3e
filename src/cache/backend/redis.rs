use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use super::{BackendError, BackendResult, KvBackend};

const SCAN_BATCH: usize = 200;

/// Redis 后端
///
/// `ConnectionManager` 在连接断开后自动重连，每个命令都带超时。
#[derive(Clone)]
pub struct RedisBackend {
    conn: ConnectionManager,
    op_timeout: Duration,
}

impl RedisBackend {
    /// 建立连接并执行一次 PING
    pub async fn connect(url: &str, op_timeout: Duration) -> BackendResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = tokio::time::timeout(op_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| BackendError::Timeout {
                op: "connect",
                timeout: op_timeout,
            })??;

        let backend = Self { conn, op_timeout };
        backend.ping().await?;
        Ok(backend)
    }

    async fn with_deadline<T, F>(&self, op: &'static str, fut: F) -> BackendResult<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(BackendError::Timeout {
                op,
                timeout: self.op_timeout,
            }),
        }
    }
}

#[async_trait]
impl KvBackend for RedisBackend {
    async fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        self.with_deadline("GET", async move { conn.get(key).await })
            .await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> BackendResult<()> {
        let mut conn = self.conn.clone();
        let millis = ttl.as_millis().max(1) as u64;
        self.with_deadline("PSETEX", async move { conn.pset_ex(key, value, millis).await })
            .await
    }

    async fn delete(&self, key: &str) -> BackendResult<()> {
        let mut conn = self.conn.clone();
        let _: i64 = self
            .with_deadline("DEL", async move { conn.del(key).await })
            .await?;
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> BackendResult<u64> {
        let pattern = format!("{}*", prefix);
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = self
                .with_deadline(
                    "SCAN",
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut conn),
                )
                .await?;

            if !keys.is_empty() {
                let mut del_conn = self.conn.clone();
                let count: u64 = self
                    .with_deadline("DEL", async move { del_conn.del(keys).await })
                    .await?;
                removed += count;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(removed)
    }

    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> BackendResult<u64> {
        let mut conn = self.conn.clone();
        let secs = ttl.as_secs().max(1) as i64;
        // MULTI/EXEC：INCR 与 EXPIRE 在同一次往返中原子执行
        let (count,): (u64,) = self
            .with_deadline(
                "INCR",
                redis::pipe()
                    .atomic()
                    .incr(key, 1)
                    .expire(key, secs)
                    .ignore()
                    .query_async(&mut conn),
            )
            .await?;
        Ok(count)
    }

    async fn ping(&self) -> BackendResult<()> {
        let mut conn = self.conn.clone();
        let _: String = self
            .with_deadline("PING", redis::cmd("PING").query_async(&mut conn))
            .await?;
        Ok(())
    }
}
