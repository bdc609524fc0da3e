use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use crate::lifecycle::ShutdownSignal;
use crate::resilience::backoff::Backoff;

/// 有界重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed(delay),
        }
    }

    pub fn exponential(max_attempts: u32, base: Duration, max: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Exponential { base, max },
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempt(s): {last_error}")]
    Exhausted { attempts: u32, last_error: E },

    #[error("cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } | RetryError::Cancelled { attempts } => {
                *attempts
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled { .. })
    }
}

/// 执行 `op`，失败时按策略等待后重试。
///
/// 返回第一次成功的结果，或包含尝试次数的最后一个错误。等待期间收到关闭信号时
/// 立即返回 `Cancelled`，不会等满退避时间。`op` 接收当前尝试序号（从 1 开始）。
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &ShutdownSignal,
    what: &str,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut cancel = cancel.clone();

    if cancel.is_triggered() {
        return Err(RetryError::Cancelled { attempts: 0 });
    }

    let mut attempt = 1;
    loop {
        tracing::debug!(what, attempt, max_attempts, "attempting");

        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(what, attempt, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if attempt >= max_attempts => {
                tracing::warn!(what, attempt, error = %e, "giving up");
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last_error: e,
                });
            }
            Err(e) => {
                let delay = policy.backoff.delay(attempt);
                tracing::warn!(
                    what,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "attempt failed, retrying"
                );

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.triggered() => {
                        tracing::info!(what, attempt, "retry cancelled");
                        return Err(RetryError::Cancelled { attempts: attempt });
                    }
                }
            }
        }

        attempt += 1;
    }
}
