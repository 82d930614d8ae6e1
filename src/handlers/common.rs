use axum::{http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::{errors::ServiceError, ApiResponse};

/// Result type for handlers that create a resource
pub type CreatedResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), ServiceError>;

/// Standard success response
pub fn success_response<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse::success(data))
}

/// Standard created response
pub fn created_response<T: Serialize>(data: T) -> (StatusCode, Json<ApiResponse<T>>) {
    (StatusCode::CREATED, Json(ApiResponse::success(data)))
}

/// Body for decisions that take free-text remarks
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RemarksRequest {
    pub remarks: Option<String>,
}

/// Body for rejections; the reason is mandatory
#[derive(Debug, Deserialize, Serialize)]
pub struct RejectRequest {
    pub reason: String,
}
