//! 健康检查
//!
//! 每次调用都重新探测所有依赖，结果不缓存。探测只读取各组件的只读状态，
//! 不会持有请求路径上需要的锁。

pub mod aggregator;
pub mod probe;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use aggregator::HealthAggregator;
pub use probe::{
    CacheProbe, HealthProbe, PrimaryStoreProbe, ProbeError, ProbeKind, ProbeReport,
    RateLimiterProbe, RegistryProbe,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Up,
    Degraded,
    Down,
}

/// 单个依赖的检查结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: Status,
    pub response_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: Status,
    pub timestamp: DateTime<Utc>,
    pub uptime_secs: u64,
    pub components: Vec<ComponentHealth>,
}

impl HealthStatus {
    pub fn component(&self, name: &str) -> Option<&ComponentHealth> {
        self.components.iter().find(|c| c.name == name)
    }
}
