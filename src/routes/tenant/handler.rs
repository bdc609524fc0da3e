use axum::{
    Json,
    extract::{Path, State},
};
use tokio::time::Instant;

use crate::error::AppError;
use crate::result::{ApiResult, success_to_api_response};
use crate::tenant::{EvictOutcome, TenantConnector, TenantDirectory};

use super::model::{EvictResponse, TenantStatus};

/// 解析租户连接并返回连接状态
pub async fn tenant_status<C: TenantConnector>(
    State(directory): State<TenantDirectory<C>>,
    Path(token): Path<String>,
) -> Result<Json<ApiResult<TenantStatus>>, AppError> {
    let started = Instant::now();
    let key = directory.find(&token).await?;
    let lease = directory.registry().resolve(&key).await?;
    let resolve_ms = started.elapsed().as_millis() as u64;
    drop(lease);

    Ok(success_to_api_response(TenantStatus {
        token: key.token().to_string(),
        db_name: key.db_name().to_string(),
        resolve_ms,
        connection: directory.registry().connection_info(&key),
    }))
}

/// 主动关闭租户连接，连接正被使用时延后到归还之后
pub async fn evict_tenant<C: TenantConnector>(
    State(directory): State<TenantDirectory<C>>,
    Path(token): Path<String>,
) -> Result<Json<ApiResult<EvictResponse>>, AppError> {
    let key = directory
        .registry()
        .lookup(&token)
        .ok_or_else(|| AppError::TenantNotFound(token.clone()))?;

    let outcome = match directory.registry().evict(&key).await {
        EvictOutcome::Closed => "closed",
        EvictOutcome::Deferred => "deferred",
        EvictOutcome::NotOpen => "not_open",
    };

    Ok(success_to_api_response(EvictResponse {
        token,
        outcome: outcome.to_string(),
    }))
}
