use std::time::Duration;

use rand::Rng;

/// 两次尝试之间的等待策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// 固定间隔
    Fixed(Duration),
    /// 指数退避，`max` 为上限，附加最多 10% 的抖动
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// 第 `attempt` 次失败之后应等待的时间（attempt 从 1 开始）
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, max } => calculate_backoff(
                attempt,
                base.as_millis() as u64,
                max.as_millis() as u64,
            ),
        }
    }
}

/// 计算带抖动的指数退避
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let factor = 2u64.saturating_pow(attempt - 1);
    let capped = base_ms.saturating_mul(factor).min(max_ms);

    let jitter_range = capped / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped + jitter)
}
