use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::checks::schedule::ScheduleError;
use crate::checks::service::CheckError;
use crate::db::store::StoreError;
use crate::notifications::senders::SenderError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Not found")]
    NotFound,
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "not found".to_string()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::DeliveryFailed(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({ "error": error_message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::CheckNotFound | StoreError::ChannelNotFound => ApiError::NotFound,
            StoreError::Conflict => {
                ApiError::Conflict("the check was modified concurrently, retry".to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<CheckError> for ApiError {
    fn from(err: CheckError) -> Self {
        match err {
            CheckError::Store(e) => e.into(),
            CheckError::Schedule(e) => ApiError::InvalidInput(e.to_string()),
        }
    }
}

impl From<ScheduleError> for ApiError {
    fn from(err: ScheduleError) -> Self {
        ApiError::InvalidInput(err.to_string())
    }
}

impl From<SenderError> for ApiError {
    fn from(err: SenderError) -> Self {
        match err {
            SenderError::Misconfigured(msg) => ApiError::InvalidInput(msg),
            other => ApiError::DeliveryFailed(other.to_string()),
        }
    }
}
