//! HTTP error mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::dispatch::DispatchError;
use crate::intake::IntakeError;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Resource exists but is not in the requested state yet (409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Dispatcher is draining (503)
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Common error: {0}")]
    Common(expense_common::Error),
}

impl From<expense_common::Error> for ApiError {
    fn from(e: expense_common::Error) -> Self {
        match e {
            expense_common::Error::NotFound(msg) => ApiError::NotFound(msg),
            expense_common::Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            expense_common::Error::AlreadyExists(msg) => ApiError::Conflict(msg),
            other => ApiError::Common(other),
        }
    }
}

impl From<IntakeError> for ApiError {
    fn from(e: IntakeError) -> Self {
        match e {
            IntakeError::UnsupportedMediaType(_) | IntakeError::Empty => {
                ApiError::BadRequest(e.to_string())
            }
            IntakeError::Storage(inner) => inner.into(),
            IntakeError::Dispatch(DispatchError::ShuttingDown) => {
                ApiError::Unavailable(DispatchError::ShuttingDown.to_string())
            }
            IntakeError::Dispatch(inner) => ApiError::Internal(inner.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Unavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", msg)
            }
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg,
            ),
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_errors_map_to_status() {
        let not_found: ApiError = expense_common::Error::NotFound("record x".into()).into();
        assert_eq!(not_found.into_response().status(), StatusCode::NOT_FOUND);

        let db: ApiError = expense_common::Error::Internal("boom".into()).into();
        assert_eq!(db.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_store_outage_is_internal_error() {
        let outage: ApiError = expense_common::Error::Remote("bucket answered 503".into()).into();
        let response = outage.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = http_body_util::BodyExt::collect(response.into_body())
            .await
            .unwrap()
            .to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], "COMMON_ERROR");
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("bucket answered 503"));
    }

    #[test]
    fn test_intake_errors_map_to_status() {
        let mime: ApiError = IntakeError::UnsupportedMediaType("text/plain".into()).into();
        assert_eq!(mime.into_response().status(), StatusCode::BAD_REQUEST);

        let draining: ApiError = IntakeError::Dispatch(DispatchError::ShuttingDown).into();
        assert_eq!(draining.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
