//! Notebook handlers

use std::sync::Arc;

use axum::{extract::State, Json};

use crate::api::extract::JsonBody;
use crate::api::ApiError;
use crate::models::{
    MessageResponse, NotebookIdRequest, NotebookListResponse, NotebookRunRequest, RunResponse,
    SessionCreated,
};
use crate::AppState;

use super::check_code_size;

pub async fn nb_create(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SessionCreated>, ApiError> {
    let id = state.notebooks.create().await?;
    Ok(Json(SessionCreated { id }))
}

pub async fn nb_list(
    State(state): State<Arc<AppState>>,
) -> Result<Json<NotebookListResponse>, ApiError> {
    let notebooks = state.notebooks.list().await?;
    Ok(Json(NotebookListResponse { notebooks }))
}

/// Execute one snippet; `attachments_out` is omitted when there are none
pub async fn nb_run(
    State(state): State<Arc<AppState>>,
    JsonBody(request): JsonBody<NotebookRunRequest>,
) -> Result<Json<RunResponse>, ApiError> {
    check_code_size(&state, &request.code)?;

    let attachments = request.attachments.unwrap_or_default();
    let run = state
        .notebooks
        .run(&request.id, &request.lang, &request.code, &attachments)
        .await?;

    Ok(Json(RunResponse {
        result: run.output,
        attachments_out: Some(run.attachments).filter(|a| !a.is_empty()),
        execution_time: run.execution_time.as_secs_f64(),
    }))
}

pub async fn nb_delete(
    State(state): State<Arc<AppState>>,
    JsonBody(request): JsonBody<NotebookIdRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.notebooks.delete(&request.id).await?;
    Ok(Json(MessageResponse::new("Notebook deleted")))
}

pub async fn nb_pause(
    State(state): State<Arc<AppState>>,
    JsonBody(request): JsonBody<NotebookIdRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.notebooks.pause(&request.id).await?;
    Ok(Json(MessageResponse::new("Notebook paused")))
}

pub async fn nb_resume(
    State(state): State<Arc<AppState>>,
    JsonBody(request): JsonBody<NotebookIdRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.notebooks.resume(&request.id).await?;
    Ok(Json(MessageResponse::new("Notebook resumed")))
}
