use axum::Json;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::result::{ApiResult, error_codes};
use crate::tenant::RegistryError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("tenant `{0}` not found")]
    TenantNotFound(String),

    #[error("tenant `{token}` unreachable: {reason}")]
    TenantUnreachable { token: String, reason: String },

    #[error("tenant connection capacity exhausted ({max} open)")]
    CapacityExceeded { max: usize },

    #[error("rate limit exceeded, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<RegistryError> for AppError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::UnknownTenant(token) => AppError::TenantNotFound(token),
            RegistryError::Unreachable { token, reason, .. } => {
                AppError::TenantUnreachable { token, reason }
            }
            RegistryError::CapacityExceeded { max } => AppError::CapacityExceeded { max },
            RegistryError::DirectoryUnavailable(reason) => AppError::ServiceUnavailable(reason),
            RegistryError::ShuttingDown => {
                AppError::ServiceUnavailable("shutting down".to_string())
            }
        }
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::TenantNotFound(_) => StatusCode::NOT_FOUND,
            AppError::TenantUnreachable { .. } => StatusCode::BAD_GATEWAY,
            AppError::CapacityExceeded { .. } | AppError::ServiceUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (code, error_message) = match &self {
            AppError::TenantNotFound(_) => (error_codes::NOT_FOUND, "组织不存在".to_string()),
            AppError::TenantUnreachable { .. } => (
                error_codes::TENANT_UNREACHABLE,
                "组织数据库暂时无法访问".to_string(),
            ),
            AppError::CapacityExceeded { .. } => (
                error_codes::CAPACITY_EXCEEDED,
                "服务繁忙，请稍后重试".to_string(),
            ),
            AppError::RateLimited { retry_after_secs } => (
                error_codes::RATE_LIMIT,
                format!("请求过于频繁，请在{}秒后重试", retry_after_secs),
            ),
            AppError::ServiceUnavailable(_) => (
                error_codes::SERVICE_UNAVAILABLE,
                "服务暂时不可用".to_string(),
            ),
            AppError::Internal(_) => (error_codes::INTERNAL_ERROR, "内部服务器错误".to_string()),
        };

        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self, "Request failed");
        }

        let body = Json(ApiResult::<()>::error(code, &error_message));
        (status, body).into_response()
    }
}
