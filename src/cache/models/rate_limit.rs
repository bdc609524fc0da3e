use serde::{Deserialize, Serialize};

/// 某个身份在当前固定窗口内的计数快照
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RateLimitWindow {
    pub identity: String,
    pub bucket: u64,
    pub count: u64,
    pub reset_at: i64, // Unix timestamp
}
