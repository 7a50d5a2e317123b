//! API request handlers

pub mod health;
pub mod interactive;
pub mod notebook;
pub mod run;

use axum::http::{HeaderMap, Method};

use crate::api::extract::has_json_content_type;
use crate::api::ApiError;
use crate::AppState;

/// Any path or method outside the route table
pub async fn invalid_route(method: Method, headers: HeaderMap) -> ApiError {
    let message = match method {
        Method::GET => "Invalid GET request path.",
        Method::POST if !has_json_content_type(&headers) => {
            return ApiError::invalid_content_type();
        }
        Method::POST => "Invalid POST request path.",
        _ => "Invalid request method. Only GET and POST are supported.",
    };
    ApiError::InvalidRequest(message.to_string())
}

/// Reject submissions larger than the configured limit
fn check_code_size(state: &AppState, code: &str) -> Result<(), ApiError> {
    let max = state.config.limits.max_code_bytes;
    if code.len() > max {
        return Err(ApiError::InvalidRequest(format!(
            "Code exceeds the maximum size of {} bytes.",
            max
        )));
    }
    Ok(())
}
