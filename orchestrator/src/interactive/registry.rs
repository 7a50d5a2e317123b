//! Live interactive sessions
//!
//! One mutex guards the whole map, so attach, timeout and teardown of the same
//! id are serialized: teardown never races an attach in progress, and an id
//! removed by teardown can never be attached again.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use tokio::sync::Mutex;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::container::{Session, SessionId};

/// Why an interactive session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// No client attached in time
    AttachTimeout,
    /// The run deadline fired after attach
    TimedOut,
    /// The program's output stream ended
    Finished,
    ClientClosed,
    Failed,
    Shutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::AttachTimeout => "attach_timeout",
            CloseReason::TimedOut => "timed_out",
            CloseReason::Finished => "finished",
            CloseReason::ClientClosed => "client_closed",
            CloseReason::Failed => "failed",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

/// Broadcast cancellation shared by the timers and both relay directions.
/// The first reason recorded wins.
#[derive(Debug, Default)]
pub struct CloseSignal {
    token: CancellationToken,
    reason: OnceLock<CloseReason>,
}

impl CloseSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `reason` and wake every waiter. Returns false if already fired.
    pub fn fire(&self, reason: CloseReason) -> bool {
        let first = self.reason.set(reason).is_ok();
        self.token.cancel();
        first
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    pub fn is_fired(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<CloseReason> {
        self.reason.get().copied()
    }
}

/// Attach progress of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Created,
    Attaching,
    Attached,
}

#[derive(Debug)]
pub struct RegistryEntry {
    pub session: Session,
    pub signal: Arc<CloseSignal>,
    pub phase: Phase,
}

/// Why an attach could not begin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachRefused {
    Unknown,
    AlreadyAttached,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    entries: Mutex<HashMap<SessionId, RegistryEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly created session. Returns `None` if the id is taken.
    pub async fn insert_new(&self, session: Session) -> Option<Arc<CloseSignal>> {
        let mut entries = self.entries.lock().await;
        if entries.contains_key(&session.id) {
            return None;
        }
        let signal = Arc::new(CloseSignal::new());
        entries.insert(
            session.id.clone(),
            RegistryEntry {
                session,
                signal: signal.clone(),
                phase: Phase::Created,
            },
        );
        Some(signal)
    }

    pub async fn contains(&self, id: &SessionId) -> bool {
        self.entries.lock().await.contains_key(id)
    }

    /// Claim a created session for attaching, yielding its container
    pub async fn begin_attach(
        &self,
        id: &SessionId,
    ) -> Result<(String, Arc<CloseSignal>), AttachRefused> {
        let mut entries = self.entries.lock().await;
        let entry = entries.get_mut(id).ok_or(AttachRefused::Unknown)?;
        if entry.phase != Phase::Created {
            return Err(AttachRefused::AlreadyAttached);
        }
        entry.phase = Phase::Attaching;
        Ok((entry.session.container_ref().to_string(), entry.signal.clone()))
    }

    /// Mark the attach complete; false if the session was torn down meanwhile
    pub async fn finish_attach(&self, id: &SessionId) -> bool {
        match self.entries.lock().await.get_mut(id) {
            Some(entry) => {
                entry.phase = Phase::Attached;
                true
            }
            None => false,
        }
    }

    /// Take the entry out only if it is still in `phase`; the check and the
    /// removal happen under one lock, so a concurrent attach either wins or loses
    pub async fn remove_if(&self, id: &SessionId, phase: Phase) -> Option<RegistryEntry> {
        let mut entries = self.entries.lock().await;
        if entries.get(id)?.phase != phase {
            return None;
        }
        entries.remove(id)
    }

    /// Take the entry out; only the caller that gets `Some` tears down
    pub async fn remove(&self, id: &SessionId) -> Option<RegistryEntry> {
        self.entries.lock().await.remove(id)
    }

    pub async fn ids(&self) -> Vec<SessionId> {
        self.entries.lock().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}
