//! Errors shared by the session managers

use std::time::Duration;

use thiserror::Error;

use crate::container::RuntimeError;
use crate::workspace::WorkspaceError;

/// Failure of a session operation. The display text of the request-level
/// variants is exactly what the client sees.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{0}")]
    InvalidLanguage(String),

    #[error("{0}")]
    InvalidSessionId(String),

    #[error("{0}")]
    SessionNotFound(String),

    #[error("{0}")]
    SessionNotRunning(String),

    #[error("Notebook did not answer within {} seconds", .0.as_secs())]
    NotebookTimeout(Duration),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
}

impl SessionError {
    /// Whether the error is the client's doing rather than a server fault
    pub fn is_client_error(&self) -> bool {
        !matches!(self, SessionError::Runtime(_) | SessionError::Workspace(_))
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
