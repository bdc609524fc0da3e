/// 限流计数器键前缀
const RATE_LIMIT_PREFIX: &str = "rate_limit:";

/// 生成 (身份, 窗口编号) 对应的计数器键
pub fn rate_limit_key(identity: &str, bucket: u64) -> String {
    format!("{}{}:{}", RATE_LIMIT_PREFIX, identity, bucket)
}
