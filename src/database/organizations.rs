// 组织目录
// organizations 表保存每个组织的 token 和独立数据库名

use async_trait::async_trait;
use sqlx::PgPool;

use crate::tenant::{TenantKey, TenantSource};

#[derive(Debug, sqlx::FromRow)]
struct OrganizationRow {
    token: String,
    db_name: String,
}

impl From<OrganizationRow> for TenantKey {
    fn from(row: OrganizationRow) -> Self {
        TenantKey::new(row.token, row.db_name)
    }
}

/// 基于主库的组织目录查询
#[derive(Clone)]
pub struct OrganizationStore {
    pool: PgPool,
}

impl OrganizationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TenantSource for OrganizationStore {
    async fn find_by_token(&self, token: &str) -> Result<Option<TenantKey>, sqlx::Error> {
        let row = sqlx::query_as::<_, OrganizationRow>(
            r#"
            SELECT token, db_name
            FROM organizations
            WHERE token = $1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(TenantKey::from))
    }

    async fn list(&self) -> Result<Vec<TenantKey>, sqlx::Error> {
        let rows = sqlx::query_as::<_, OrganizationRow>(
            r#"
            SELECT token, db_name
            FROM organizations
            ORDER BY token
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(TenantKey::from).collect())
    }
}
