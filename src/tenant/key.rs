use std::fmt;

use serde::{Deserialize, Serialize};

/// 租户标识：对外 token 加上租户独立数据库名，签发后不可变
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantKey {
    token: String,
    db_name: String,
}

impl TenantKey {
    pub fn new(token: impl Into<String>, db_name: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            db_name: db_name.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }
}

impl fmt::Display for TenantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.token, self.db_name)
    }
}
