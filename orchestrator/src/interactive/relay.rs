//! Bidirectional bridge between a client and an attached container
//!
//! Container output is forwarded by a spawned task; client input is pumped by
//! the calling task. Either side ending fires the session's close signal, which
//! unblocks whatever the other side is waiting on.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::container::{AttachedStreams, InputSink, OutputStream, SessionId};

use super::registry::{CloseReason, CloseSignal};
use super::{AttachedSession, InteractiveManager};

/// Sent once the program's output stream ends
pub const FINISHED_MESSAGE: &str = "Python program has finished execution.";

/// Sent when the run deadline tears the session down
pub const TIME_LIMIT_MESSAGE: &str = "Execution time limit reached. Terminating.";

/// Longest wait for the time-limit notice to reach the client
const NOTICE_TIMEOUT: Duration = Duration::from_secs(1);

/// Input from the client side of the bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// One line of standard input
    Line(String),
    Closed,
    /// Frames that carry no input (pings, binary)
    Ignored,
}

/// Run the bridge until the session closes
pub async fn relay<Tx, Rx>(
    manager: Arc<InteractiveManager>,
    session: AttachedSession,
    client_tx: Tx,
    mut client_rx: Rx,
) where
    Tx: Sink<String> + Unpin + Send + 'static,
    Tx::Error: Debug + Send,
    Rx: Stream<Item = ClientEvent> + Unpin + Send,
{
    let AttachedSession {
        id,
        streams: AttachedStreams { output, mut input },
        signal,
    } = session;

    let forward = tokio::spawn(forward_output(
        manager.clone(),
        id.clone(),
        output,
        client_tx,
        signal.clone(),
    ));

    loop {
        let event = tokio::select! {
            biased;
            _ = signal.cancelled() => break,
            event = client_rx.next() => event,
        };

        match event {
            Some(ClientEvent::Line(line)) => {
                let written = tokio::select! {
                    biased;
                    _ = signal.cancelled() => break,
                    written = write_line(&mut input, &line) => written,
                };
                if let Err(e) = written {
                    warn!(session_id = %id, error = %e, "Failed to write to container stdin");
                    manager.close(&id, CloseReason::Failed).await;
                    break;
                }
            }
            Some(ClientEvent::Ignored) => {}
            Some(ClientEvent::Closed) | None => {
                debug!(session_id = %id, "Client disconnected");
                manager.close(&id, CloseReason::ClientClosed).await;
                break;
            }
        }
    }

    let _ = input.shutdown().await;
    if let Err(e) = forward.await {
        warn!(session_id = %id, error = %e, "Output relay task failed");
    }
}

async fn write_line(input: &mut InputSink, line: &str) -> std::io::Result<()> {
    input.write_all(line.as_bytes()).await?;
    input.write_all(b"\n").await?;
    input.flush().await
}

async fn forward_output<Tx>(
    manager: Arc<InteractiveManager>,
    id: SessionId,
    mut output: OutputStream,
    mut client_tx: Tx,
    signal: Arc<CloseSignal>,
) where
    Tx: Sink<String> + Unpin + Send + 'static,
    Tx::Error: Debug + Send,
{
    let mut pending = Vec::new();

    loop {
        let chunk = tokio::select! {
            biased;
            _ = signal.cancelled() => break,
            chunk = output.next() => chunk,
        };

        match chunk {
            Some(Ok(bytes)) if !bytes.is_empty() => {
                pending.extend_from_slice(&bytes);
                let text = take_text(&mut pending);
                if text.is_empty() {
                    continue;
                }
                match send_unless_closed(&mut client_tx, &signal, text).await {
                    Some(Ok(())) => {}
                    Some(Err(e)) => {
                        debug!(session_id = %id, error = ?e, "Client went away");
                        manager.close(&id, CloseReason::ClientClosed).await;
                        break;
                    }
                    None => break,
                }
            }
            Some(Err(e)) => {
                warn!(session_id = %id, error = %e, "Container output failed");
                manager.close(&id, CloseReason::Failed).await;
                break;
            }
            // Stream ended or yielded zero bytes: the program is done
            _ => {
                if !pending.is_empty() {
                    let rest = String::from_utf8_lossy(&pending).into_owned();
                    let _ = send_unless_closed(&mut client_tx, &signal, rest).await;
                }
                let _ = send_unless_closed(&mut client_tx, &signal, FINISHED_MESSAGE.to_string())
                    .await;
                manager.close(&id, CloseReason::Finished).await;
                break;
            }
        }
    }

    if signal.reason() == Some(CloseReason::TimedOut) {
        let notice = client_tx.send(TIME_LIMIT_MESSAGE.to_string());
        if tokio::time::timeout(NOTICE_TIMEOUT, notice).await.is_err() {
            debug!(session_id = %id, "Time limit notice not delivered");
        }
    }
    if tokio::time::timeout(NOTICE_TIMEOUT, client_tx.close()).await.is_err() {
        debug!(session_id = %id, "Client sink did not close in time");
    }
}

/// Send one message to the client; `None` when the session closed first
async fn send_unless_closed<Tx>(
    client_tx: &mut Tx,
    signal: &CloseSignal,
    text: String,
) -> Option<Result<(), Tx::Error>>
where
    Tx: Sink<String> + Unpin,
{
    tokio::select! {
        biased;
        _ = signal.cancelled() => None,
        sent = client_tx.send(text) => Some(sent),
    }
}

/// Drain the decodable prefix of `pending`, keeping an incomplete trailing
/// UTF-8 sequence for the next chunk
fn take_text(pending: &mut Vec<u8>) -> String {
    let incomplete = match std::str::from_utf8(pending) {
        Err(e) if e.error_len().is_none() => pending.len() - e.valid_up_to(),
        _ => 0,
    };
    let rest = pending.split_off(pending.len() - incomplete);
    let text = String::from_utf8_lossy(pending).into_owned();
    *pending = rest;
    text
}
