//! Interactive session handlers: creation over HTTP, attach over WebSocket

use std::sync::Arc;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    Json,
};
use futures::{future, stream::SplitStream, SinkExt, StreamExt};
use tracing::{debug, info};

use crate::api::extract::JsonBody;
use crate::api::ApiError;
use crate::interactive::relay::{relay, ClientEvent};
use crate::models::{AttachRequest, RunRequest, SessionCreated};
use crate::AppState;

use super::check_code_size;

/// Prepare an interactive session; the client attaches with the returned id
pub async fn run_interactive(
    State(state): State<Arc<AppState>>,
    JsonBody(request): JsonBody<RunRequest>,
) -> Result<Json<SessionCreated>, ApiError> {
    check_code_size(&state, &request.code)?;

    let attachments = request.attachments.unwrap_or_default();
    let id = state
        .interactive
        .create(&request.lang, &request.code, &attachments)
        .await?;

    Ok(Json(SessionCreated { id: id.to_string() }))
}

/// Handle the streaming endpoint upgrade
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let Some(first) = first_text(&mut receiver).await else {
        debug!("Socket closed before sending a session id");
        return;
    };

    let attached = match serde_json::from_str::<AttachRequest>(&first) {
        Ok(request) => state.interactive.attach(&request.id).await.ok(),
        Err(_) => None,
    };
    let Some(session) = attached else {
        debug!("Rejecting socket with an invalid session id");
        let frame = CloseFrame {
            code: close_code::INVALID,
            reason: "Invalid container ID".into(),
        };
        let _ = sender.send(Message::Close(Some(frame))).await;
        return;
    };

    info!(session_id = %session.id, "WebSocket client attached");

    let client_tx =
        sender.with(|text: String| future::ready(Ok::<_, axum::Error>(Message::Text(text))));
    let client_rx = receiver.map(|message| match message {
        Ok(Message::Text(text)) => ClientEvent::Line(text),
        Ok(Message::Close(_)) | Err(_) => ClientEvent::Closed,
        Ok(_) => ClientEvent::Ignored,
    });

    relay(state.interactive.clone(), session, client_tx, client_rx).await;
}

/// First text frame of the connection, if the client sends one
async fn first_text(receiver: &mut SplitStream<WebSocket>) -> Option<String> {
    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => return Some(text),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
    None
}
