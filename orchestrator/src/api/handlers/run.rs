//! One-shot execution handler

use std::sync::Arc;

use axum::{extract::State, Json};

use crate::api::extract::JsonBody;
use crate::api::ApiError;
use crate::models::{RunRequest, RunResponse};
use crate::AppState;

use super::check_code_size;

/// Run code once in a fresh container
pub async fn run(
    State(state): State<Arc<AppState>>,
    JsonBody(request): JsonBody<RunRequest>,
) -> Result<Json<RunResponse>, ApiError> {
    check_code_size(&state, &request.code)?;

    let attachments = request.attachments.unwrap_or_default();
    let outcome = state
        .executor
        .run(&request.lang, &request.code, &attachments)
        .await?;

    Ok(Json(RunResponse {
        result: outcome.output,
        attachments_out: Some(outcome.attachments),
        execution_time: outcome.execution_time.as_secs_f64(),
    }))
}
