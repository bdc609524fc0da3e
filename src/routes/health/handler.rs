use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};

use crate::health::{HealthAggregator, Status};

/// 整体 down 时返回 503，其余情况返回 200
pub async fn health_check(State(aggregator): State<Arc<HealthAggregator>>) -> impl IntoResponse {
    let health = aggregator.check().await;

    let status = match health.status {
        Status::Down => StatusCode::SERVICE_UNAVAILABLE,
        Status::Up | Status::Degraded => StatusCode::OK,
    };

    (status, Json(health))
}
