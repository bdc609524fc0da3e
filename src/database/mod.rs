// 数据库模块
// 主库连接池和组织目录查询

pub mod organizations;

use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Executor, PgPool};

use crate::config::Config;
use crate::tenant::{ConnectError, PgConnector};

pub use organizations::OrganizationStore;

/// 创建主库连接池
///
/// 连接池是懒加载的：主库暂时不可用时服务照常启动，由健康检查报告状态。
pub fn connect_primary(config: &Config) -> Result<PgPool, ConnectError> {
    let options = primary_options(config)?;

    let pool = PgPoolOptions::new()
        .max_connections(config.primary.max_connections)
        .acquire_timeout(Duration::from_secs(config.tenant_store.connect_timeout_secs))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                conn.execute("SET application_name = 'tenant_core';").await?;
                Ok(())
            })
        })
        .connect_lazy_with(options);

    Ok(pool)
}

fn primary_options(config: &Config) -> Result<PgConnectOptions, ConnectError> {
    if let Some(url) = &config.primary.database_url {
        return url.parse::<PgConnectOptions>().map_err(ConnectError::from);
    }

    // 没有 DATABASE_URL 时沿用租户库模板，只换数据库名
    let db_name = config.primary.db_name.as_deref().unwrap_or("postgres");
    PgConnector::new(config.tenant_store.clone()).connect_options(db_name)
}
