use serde::{Deserialize, Serialize};

use crate::tenant::TenantKey;

/// 租户目录缓存数据模型
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct CachedTenant {
    pub token: String,
    pub db_name: String,
    pub cached_at: i64, // Unix timestamp
}

impl CachedTenant {
    pub fn from_key(key: &TenantKey) -> Self {
        Self {
            token: key.token().to_string(),
            db_name: key.db_name().to_string(),
            cached_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn to_key(&self) -> TenantKey {
        TenantKey::new(self.token.clone(), self.db_name.clone())
    }
}
