//! Session identity shared by every execution mode

use std::fmt;

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::workspace::Workspace;

/// Length of generated ids; 26^16 makes a collision negligible, and
/// allocation still verifies uniqueness against live sessions.
pub const SESSION_ID_LEN: usize = 16;

const MAX_SESSION_ID_LEN: usize = 64;

/// Opaque session token, also used as container and directory name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh random id of lowercase ASCII letters
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let id = (0..SESSION_ID_LEN)
            .map(|_| rng.gen_range(b'a'..=b'z') as char)
            .collect();
        Self(id)
    }

    /// Accept an id coming from a client. Only lowercase letters and digits
    /// are allowed so the id is always safe as a path component.
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = !raw.is_empty()
            && raw.len() <= MAX_SESSION_ID_LEN
            && raw
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit());
        valid.then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Execution mode of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKind {
    Ephemeral,
    Notebook,
    Interactive,
}

impl SessionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKind::Ephemeral => "ephemeral",
            SessionKind::Notebook => "notebook",
            SessionKind::Interactive => "interactive",
        }
    }
}

/// A session: its id, workspace and (once created) container
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub kind: SessionKind,
    pub workspace: Workspace,
    /// Runtime-assigned container id
    pub container: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: SessionId, kind: SessionKind, workspace: Workspace) -> Self {
        Self {
            id,
            kind,
            workspace,
            container: None,
            created_at: Utc::now(),
        }
    }

    /// Container reference, falling back to the name it was created under
    pub fn container_ref(&self) -> &str {
        self.container.as_deref().unwrap_or(self.id.as_str())
    }

    pub fn age_ms(&self) -> i64 {
        (Utc::now() - self.created_at).num_milliseconds()
    }
}
