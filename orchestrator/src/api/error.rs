//! API error handling
//!
//! Request-level failures are reported as `200 {"error": ...}`; only server
//! faults use a 5xx status, with a generic message.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::error;

use crate::error::SessionError;
use crate::models::ErrorResponse;

/// Message of every 5xx response
pub const INTERNAL_ERROR_MESSAGE: &str = "An internal server error occurred.";

/// API error types
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn invalid_json() -> Self {
        ApiError::InvalidRequest("Invalid JSON format.".to_string())
    }

    pub fn body_too_large() -> Self {
        ApiError::InvalidRequest("Request body is too large.".to_string())
    }

    pub fn invalid_content_type() -> Self {
        ApiError::InvalidRequest(
            "Invalid content type. Only application/json is supported.".to_string(),
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::InvalidRequest(msg) => (StatusCode::OK, msg.clone()),
            ApiError::Session(err) if err.is_client_error() => (StatusCode::OK, err.to_string()),
            ApiError::Session(err) => {
                error!(error = %err, "Session operation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    INTERNAL_ERROR_MESSAGE.to_string(),
                )
            }
            ApiError::Internal(msg) => {
                error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    INTERNAL_ERROR_MESSAGE.to_string(),
                )
            }
        };

        (status, Json(ErrorResponse::new(message))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(format!("{:#}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::RuntimeError;

    #[test]
    fn test_status_mapping() {
        let response = ApiError::invalid_json().into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let response =
            ApiError::Session(SessionError::SessionNotFound("Notebook not found".into()))
                .into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let response = ApiError::Session(SessionError::Runtime(RuntimeError::Backend(
            "daemon down".into(),
        )))
        .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = ApiError::from(anyhow::anyhow!("boom")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
