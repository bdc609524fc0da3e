use serde::{Deserialize, Serialize};

use crate::tenant::ConnectionInfo;

#[derive(Debug, Serialize, Deserialize)]
pub struct TenantStatus {
    pub token: String,
    pub db_name: String,
    pub resolve_ms: u64,
    #[serde(skip_deserializing)]
    pub connection: Option<ConnectionInfo>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EvictResponse {
    pub token: String,
    /// closed / deferred / not_open
    pub outcome: String,
}
