use axum::Json;
use serde::{Deserialize, Serialize};

/// 统一的 JSON 响应包装
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResult<T: Serialize> {
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<T>,
}

impl<T: Serialize> ApiResult<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: error_codes::SUCCESS,
            error_message: None,
            content: Some(data),
        }
    }

    pub fn error(code: i32, message: &str) -> Self {
        Self {
            code,
            error_message: Some(message.to_string()),
            content: None,
        }
    }
}

pub fn success_to_api_response<T: Serialize>(data: T) -> Json<ApiResult<T>> {
    Json(ApiResult::success(data))
}

pub mod error_codes {
    pub const SUCCESS: i32 = 0;
    pub const NOT_FOUND: i32 = 1004;
    pub const RATE_LIMIT: i32 = 1005;
    pub const TENANT_UNREACHABLE: i32 = 1006;
    pub const CAPACITY_EXCEEDED: i32 = 1007;
    pub const SERVICE_UNAVAILABLE: i32 = 1008;
    pub const INTERNAL_ERROR: i32 = 5000;
}
