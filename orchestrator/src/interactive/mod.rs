//! Interactive sessions
//!
//! `create` prepares a container without starting it. A client later attaches
//! over the socket endpoint; the container is attached, started and bridged to
//! the client by [`relay::relay`] until the program ends, the client leaves or
//! the run deadline fires. Teardown happens exactly once, through [`close`].
//!
//! [`close`]: InteractiveManager::close

pub mod registry;
pub mod relay;

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::LimitsConfig;
use crate::container::{
    AttachedStreams, Bind, ContainerRuntime, ContainerSpec, RuntimeError, Session, SessionId,
    SessionKind, APP_MOUNT, ATTACHMENTS_MOUNT,
};
use crate::error::{SessionError, SessionResult};
use crate::metrics;
use crate::models::{Attachment, Language};
use crate::workspace::{WorkspaceError, WorkspaceKind, WorkspaceManager};

use registry::{AttachRefused, CloseReason, CloseSignal, Phase, RegistryEntry, SessionRegistry};

/// Command of interactive containers; the short sleep lets the attach settle
const INTERACTIVE_COMMAND: [&str; 3] = ["bash", "-c", "sleep 0.1 && python3 /app/launch.py"];

const MAX_CREATE_ATTEMPTS: usize = 3;

/// A session whose client is attached and whose container is running
pub struct AttachedSession {
    pub id: SessionId,
    pub streams: AttachedStreams,
    pub signal: Arc<CloseSignal>,
}

pub struct InteractiveManager {
    runtime: Arc<dyn ContainerRuntime>,
    workspaces: WorkspaceManager,
    image: String,
    limits: LimitsConfig,
    registry: SessionRegistry,
}

impl InteractiveManager {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        workspaces: WorkspaceManager,
        image: String,
        limits: LimitsConfig,
    ) -> Self {
        Self {
            runtime,
            workspaces,
            image,
            limits,
            registry: SessionRegistry::new(),
        }
    }

    /// Prepare a session for a later attach and return its id
    pub async fn create(
        self: &Arc<Self>,
        lang: &str,
        code: &str,
        attachments: &[Attachment],
    ) -> SessionResult<SessionId> {
        if Language::parse(lang) != Some(Language::Python) {
            return Err(SessionError::InvalidLanguage(
                "Only Python is supported for interactive mode.".to_string(),
            ));
        }

        for _ in 0..MAX_CREATE_ATTEMPTS {
            let (id, workspace) = self
                .workspaces
                .allocate_fresh(WorkspaceKind::Code(Language::Python))
                .await?;
            if self.registry.contains(&id).await {
                self.workspaces.destroy(&workspace).await;
                continue;
            }

            let mut session = Session::new(id.clone(), SessionKind::Interactive, workspace);
            if let Err(e) = self.provision(&mut session, code, attachments).await {
                warn!(session_id = %id, error = %e, "Interactive session creation failed");
                self.discard(&session).await;
                return Err(e);
            }

            let Some(signal) = self.registry.insert_new(session.clone()).await else {
                self.discard(&session).await;
                continue;
            };

            metrics::record_session_created(SessionKind::Interactive);
            info!(
                session_id = %id,
                kind = SessionKind::Interactive.as_str(),
                container = session.container_ref(),
                "Interactive session created"
            );

            self.arm_attach_deadline(id.clone(), signal);
            return Ok(id);
        }

        Err(WorkspaceError::Collision(self.workspaces.root().to_path_buf()).into())
    }

    async fn provision(
        &self,
        session: &mut Session,
        code: &str,
        attachments: &[Attachment],
    ) -> SessionResult<()> {
        let workspace = session.workspace.clone();
        let entry = workspace.code_dir.join(Language::Python.entry_file());
        self.workspaces.write_file(&entry, code.as_bytes()).await?;
        self.workspaces
            .materialize_attachments(&workspace.attachments_dir, attachments)
            .await;

        let spec = ContainerSpec {
            name: session.id.to_string(),
            image: self.image.clone(),
            binds: vec![
                Bind::new(workspace.code_dir.to_string_lossy(), APP_MOUNT),
                Bind::new(workspace.attachments_dir.to_string_lossy(), ATTACHMENTS_MOUNT),
            ],
            command: Some(INTERACTIVE_COMMAND.iter().map(|s| s.to_string()).collect()),
            tty: true,
            interactive: true,
        };
        session.container = Some(self.runtime.create(&spec).await?);
        Ok(())
    }

    fn arm_attach_deadline(self: &Arc<Self>, id: SessionId, signal: Arc<CloseSignal>) {
        let manager = Arc::clone(self);
        let deadline = self.limits.attach_timeout();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(deadline) => {
                    if let Some(entry) = manager.registry.remove_if(&id, Phase::Created).await {
                        info!(session_id = %id, "No client attached in time");
                        manager.teardown(&id, entry, CloseReason::AttachTimeout).await;
                    }
                }
                _ = signal.cancelled() => {}
            }
        });
    }

    fn arm_run_deadline(self: &Arc<Self>, id: SessionId, signal: Arc<CloseSignal>) {
        let manager = Arc::clone(self);
        let deadline = self.limits.interactive_timeout();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(deadline) => {
                    info!(session_id = %id, timeout_secs = deadline.as_secs(), "Interactive run deadline reached");
                    manager.close(&id, CloseReason::TimedOut).await;
                }
                _ = signal.cancelled() => {}
            }
        });
    }

    /// Attach the caller to a created session and start its program
    pub async fn attach(self: &Arc<Self>, raw_id: &str) -> SessionResult<AttachedSession> {
        let id = SessionId::parse(raw_id)
            .ok_or_else(|| SessionError::InvalidSessionId("Invalid container ID".to_string()))?;

        let (container, signal) = self.registry.begin_attach(&id).await.map_err(|refused| {
            match refused {
                AttachRefused::Unknown => {
                    SessionError::SessionNotFound("Session not found".to_string())
                }
                AttachRefused::AlreadyAttached => {
                    SessionError::SessionNotRunning("Session already attached".to_string())
                }
            }
        })?;

        // Attach before start so no early output is lost
        let streams = match self.runtime.attach(&container).await {
            Ok(streams) => streams,
            Err(e) => {
                self.close(&id, CloseReason::Failed).await;
                return Err(e.into());
            }
        };
        if let Err(e) = self.runtime.start(&container).await {
            self.close(&id, CloseReason::Failed).await;
            return Err(e.into());
        }

        if !self.registry.finish_attach(&id).await {
            debug!(session_id = %id, "Session closed while attaching");
            return Err(SessionError::SessionNotFound("Session not found".to_string()));
        }

        self.arm_run_deadline(id.clone(), signal.clone());
        info!(session_id = %id, container = %container, "Client attached");

        Ok(AttachedSession {
            id,
            streams,
            signal,
        })
    }

    /// Tear a session down. Safe to call from any path; only the first call
    /// for an id does anything, and it returns true.
    pub async fn close(&self, id: &SessionId, reason: CloseReason) -> bool {
        let Some(entry) = self.registry.remove(id).await else {
            return false;
        };
        self.teardown(id, entry, reason).await;
        true
    }

    /// Release everything of an entry already taken out of the registry
    async fn teardown(&self, id: &SessionId, entry: RegistryEntry, reason: CloseReason) {
        entry.signal.fire(reason);

        let container = entry.session.container_ref();
        if matches!(
            reason,
            CloseReason::TimedOut | CloseReason::AttachTimeout | CloseReason::Shutdown
        ) {
            if let Err(e) = self.runtime.kill(container).await {
                debug!(session_id = %id, error = %e, "Kill failed, container not running");
            }
        }
        match self.runtime.remove(container, true).await {
            Ok(()) | Err(RuntimeError::NotFound(_)) => {}
            Err(e) => warn!(session_id = %id, error = %e, "Failed to remove container"),
        }
        self.workspaces.destroy(&entry.session.workspace).await;

        metrics::record_session_closed(SessionKind::Interactive, reason.as_str());
        info!(
            session_id = %id,
            kind = SessionKind::Interactive.as_str(),
            reason = reason.as_str(),
            duration_ms = entry.session.age_ms(),
            "Interactive session closed"
        );
    }

    /// Tear down every live session
    pub async fn close_all(&self) {
        for id in self.registry.ids().await {
            self.close(&id, CloseReason::Shutdown).await;
        }
    }

    pub async fn active_count(&self) -> usize {
        self.registry.len().await
    }

    async fn discard(&self, session: &Session) {
        if let Some(container) = &session.container {
            let _ = self.runtime.remove(container, true).await;
        }
        self.workspaces.destroy(&session.workspace).await;
    }
}
