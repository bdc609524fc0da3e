use serde::{Deserialize, Serialize};

/// 缓存条目：值本身对缓存层不透明，由调用方序列化
///
/// 过期时间和值一起存储，即使后端没有及时淘汰，过期条目也不会被当作命中返回。
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CacheEntry {
    pub value: Vec<u8>,
    pub expires_at: i64, // Unix timestamp (毫秒)
}

impl CacheEntry {
    pub fn new(value: Vec<u8>, expires_at: i64) -> Self {
        Self { value, expires_at }
    }

    pub fn is_expired(&self, now_millis: i64) -> bool {
        self.expires_at <= now_millis
    }
}
