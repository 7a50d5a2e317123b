//! Notebook sessions
//!
//! A notebook is a long-lived container running an exec/out loop. Each run
//! hands it one snippet through the [`protocol::FileChannel`]; interpreter and
//! filesystem state survive between runs until the notebook is deleted.

pub mod protocol;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::LimitsConfig;
use crate::container::{
    Bind, ContainerRuntime, ContainerSpec, ContainerStatus, RuntimeError, Session, SessionId,
    SessionKind, ATTACHMENTS_MOUNT, NOTEBOOK_API_MOUNT,
};
use crate::error::{SessionError, SessionResult};
use crate::metrics;
use crate::models::{Attachment, Language, NotebookSummary};
use crate::workspace::{WorkspaceKind, WorkspaceManager};

use protocol::FileChannel;

/// Prefix of notebook ids on the wire
pub const NOTEBOOK_PREFIX: &str = "nb-";

/// Run state of a notebook as tracked by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotebookState {
    Running,
    Paused,
}

impl NotebookState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotebookState::Running => "running",
            NotebookState::Paused => "paused",
        }
    }
}

/// Output of one notebook run
#[derive(Debug, Clone)]
pub struct NotebookRun {
    pub output: String,
    /// Every file in the attachments directory after the run
    pub attachments: Vec<Attachment>,
    pub execution_time: Duration,
}

struct NotebookEntry {
    session: Session,
    channel: FileChannel,
    state: RwLock<NotebookState>,
    /// Serializes runs: the exec/out files carry one request at a time
    run_lock: Mutex<()>,
    /// Fired on delete, aborting any pending run
    cancel: CancellationToken,
}

#[derive(Default)]
struct NotebookTable {
    live: HashMap<SessionId, Arc<NotebookEntry>>,
    /// Ids whose teardown is in progress; never adopted
    deleting: HashSet<SessionId>,
}

/// Creates, drives and tears down notebook containers
pub struct NotebookManager {
    runtime: Arc<dyn ContainerRuntime>,
    workspaces: WorkspaceManager,
    image: String,
    limits: LimitsConfig,
    notebooks: RwLock<NotebookTable>,
}

/// Parse `nb-<id>` into the session id behind it
pub fn parse_notebook_id(raw: &str) -> SessionResult<SessionId> {
    raw.strip_prefix(NOTEBOOK_PREFIX)
        .and_then(SessionId::parse)
        .ok_or_else(|| SessionError::InvalidSessionId("Invalid notebook ID".to_string()))
}

fn not_found() -> SessionError {
    SessionError::SessionNotFound("Notebook not found".to_string())
}

/// Label shown by `list`; a notebook never exits on its own, so an exited
/// container is reported as paused
fn display_state(state: &str) -> String {
    match state {
        "exited" => NotebookState::Paused.as_str().to_string(),
        other => other.to_string(),
    }
}

impl NotebookManager {
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
            notebooks: RwLock::new(NotebookTable::default()),
        }
    }

    /// Create and start a notebook, returning its `nb-` id
    pub async fn create(&self) -> SessionResult<String> {
        let (id, workspace) = self.workspaces.allocate_fresh(WorkspaceKind::Notebook).await?;
        let mut session = Session::new(id.clone(), SessionKind::Notebook, workspace);
        let channel = FileChannel::new(
            &session.workspace.code_dir,
            self.limits.notebook_poll_interval(),
        );

        if let Err(e) = self.provision(&mut session, &channel).await {
            warn!(session_id = %id, error = %e, "Notebook creation failed");
            if let Some(container) = &session.container {
                let _ = self.runtime.remove(container, true).await;
            }
            self.workspaces.destroy(&session.workspace).await;
            return Err(e);
        }

        info!(
            session_id = %id,
            kind = SessionKind::Notebook.as_str(),
            container = session.container_ref(),
            "Notebook created"
        );
        metrics::record_session_created(SessionKind::Notebook);

        let entry = Arc::new(NotebookEntry {
            session,
            channel,
            state: RwLock::new(NotebookState::Running),
            run_lock: Mutex::new(()),
            cancel: CancellationToken::new(),
        });
        self.notebooks.write().await.live.insert(id.clone(), entry);

        Ok(format!("{}{}", NOTEBOOK_PREFIX, id))
    }

    async fn provision(&self, session: &mut Session, channel: &FileChannel) -> SessionResult<()> {
        channel.initialize(&self.workspaces).await?;

        let spec = ContainerSpec {
            name: session.id.to_string(),
            image: self.image.clone(),
            binds: vec![
                Bind::new(session.workspace.code_dir.to_string_lossy(), NOTEBOOK_API_MOUNT),
                Bind::new(
                    session.workspace.attachments_dir.to_string_lossy(),
                    ATTACHMENTS_MOUNT,
                ),
            ],
            ..Default::default()
        };

        let container = self.runtime.create(&spec).await?;
        session.container = Some(container.clone());
        self.runtime.start(&container).await?;
        Ok(())
    }

    /// Execute one snippet in a running notebook
    pub async fn run(
        &self,
        raw_id: &str,
        lang: &str,
        code: &str,
        attachments: &[Attachment],
    ) -> SessionResult<NotebookRun> {
        let id = parse_notebook_id(raw_id)?;
        let entry = self.resolve(&id).await?;
        self.ensure_running(&entry).await?;

        if Language::parse(lang) != Some(Language::Python) {
            return Err(SessionError::InvalidLanguage(
                "Invalid language for notebook".to_string(),
            ));
        }

        let _turn = tokio::select! {
            guard = entry.run_lock.lock() => guard,
            _ = entry.cancel.cancelled() => return Err(not_found()),
        };
        // State may have changed while queued behind another run
        self.ensure_running(&entry).await?;

        let started = Instant::now();
        self.workspaces
            .materialize_attachments(&entry.session.workspace.attachments_dir, attachments)
            .await;

        let bound = self.limits.notebook_run_timeout();
        debug!(session_id = %id, code_len = code.len(), "Submitting notebook run");

        let exchange = entry.channel.exchange(&self.workspaces, code);
        let output = tokio::select! {
            answered = tokio::time::timeout(bound, exchange) => match answered {
                Ok(output) => output?,
                Err(_) => {
                    warn!(session_id = %id, timeout_secs = bound.as_secs(), "Notebook run timed out");
                    metrics::record_notebook_run("timeout");
                    return Err(SessionError::NotebookTimeout(bound));
                }
            },
            _ = entry.cancel.cancelled() => {
                debug!(session_id = %id, "Notebook deleted during run");
                return Err(not_found());
            }
        };

        let attachments = self
            .workspaces
            .collect_attachments(&entry.session.workspace.attachments_dir, None)
            .await?;

        metrics::record_notebook_run("ok");
        info!(
            session_id = %id,
            duration_ms = started.elapsed().as_millis() as u64,
            attachments_out = attachments.len(),
            "Notebook run completed"
        );

        Ok(NotebookRun {
            output,
            attachments,
            execution_time: started.elapsed(),
        })
    }

    pub async fn pause(&self, raw_id: &str) -> SessionResult<()> {
        let id = parse_notebook_id(raw_id)?;
        let entry = self.resolve(&id).await?;
        let mut state = entry.state.write().await;
        if *state == NotebookState::Paused {
            return Ok(());
        }

        self.runtime.pause(entry.session.container_ref()).await?;
        *state = NotebookState::Paused;
        info!(session_id = %id, "Notebook paused");
        Ok(())
    }

    /// Unpause, or restart a notebook whose container has stopped
    pub async fn resume(&self, raw_id: &str) -> SessionResult<()> {
        let id = parse_notebook_id(raw_id)?;
        let entry = self.resolve(&id).await?;
        let mut state = entry.state.write().await;

        let container = entry.session.container_ref();
        match self.runtime.status(container).await? {
            ContainerStatus::Paused => self.runtime.unpause(container).await?,
            ContainerStatus::Exited | ContainerStatus::Created => {
                self.runtime.start(container).await?
            }
            _ => {}
        }
        *state = NotebookState::Running;
        info!(session_id = %id, "Notebook resumed");
        Ok(())
    }

    /// Remove a notebook. Deleting an unknown notebook succeeds.
    pub async fn delete(&self, raw_id: &str) -> SessionResult<()> {
        let id = parse_notebook_id(raw_id)?;

        let entry = {
            let mut notebooks = self.notebooks.write().await;
            notebooks.deleting.insert(id.clone());
            notebooks.live.remove(&id)
        };
        if let Some(entry) = &entry {
            entry.cancel.cancel();
        }

        let container = entry
            .as_ref()
            .map(|e| e.session.container_ref().to_string())
            .unwrap_or_else(|| id.to_string());

        // A stopped or paused container refuses the kill; the forced remove covers it
        if let Err(e) = self.runtime.kill(&container).await {
            debug!(session_id = %id, error = %e, "Kill before delete failed");
        }
        match self.runtime.remove(&container, true).await {
            Ok(()) | Err(RuntimeError::NotFound(_)) => {}
            Err(e) => warn!(session_id = %id, error = %e, "Failed to remove notebook container"),
        }

        let workspace = self.workspaces.path_for(&id, WorkspaceKind::Notebook);
        self.workspaces.destroy(&workspace).await;
        self.notebooks.write().await.deleting.remove(&id);

        if entry.is_some() {
            metrics::record_session_closed(SessionKind::Notebook, "deleted");
        }
        info!(session_id = %id, known = entry.is_some(), "Notebook deleted");
        Ok(())
    }

    /// Every container known to the runtime, labelled as a notebook
    pub async fn list(&self) -> SessionResult<Vec<NotebookSummary>> {
        let containers = self.runtime.list().await?;
        Ok(containers
            .into_iter()
            .filter_map(|c| {
                let name = c.names.first()?.strip_prefix('/')?.to_string();
                Some(NotebookSummary {
                    id: format!("{}{}", NOTEBOOK_PREFIX, name),
                    state: display_state(&c.state),
                })
            })
            .collect())
    }

    pub async fn active_count(&self) -> usize {
        self.notebooks.read().await.live.len()
    }

    /// Tracked entry of `id`, adopting a notebook whose workspace survived a
    /// restart of the orchestrator. Adoption holds the table lock so it cannot
    /// interleave with a delete of the same id.
    async fn resolve(&self, id: &SessionId) -> SessionResult<Arc<NotebookEntry>> {
        if let Some(entry) = self.notebooks.read().await.live.get(id) {
            return Ok(entry.clone());
        }

        let mut notebooks = self.notebooks.write().await;
        if let Some(entry) = notebooks.live.get(id) {
            return Ok(entry.clone());
        }
        if notebooks.deleting.contains(id) {
            return Err(not_found());
        }

        let workspace = self
            .workspaces
            .open(id, WorkspaceKind::Notebook)
            .await
            .ok_or_else(not_found)?;

        let state = match self.runtime.status(id.as_str()).await {
            Ok(ContainerStatus::Running) => NotebookState::Running,
            Ok(_) => NotebookState::Paused,
            Err(RuntimeError::NotFound(_)) => return Err(not_found()),
            Err(e) => return Err(e.into()),
        };

        let mut session = Session::new(id.clone(), SessionKind::Notebook, workspace);
        session.container = Some(id.to_string());
        let channel = FileChannel::new(
            &session.workspace.code_dir,
            self.limits.notebook_poll_interval(),
        );

        info!(session_id = %id, state = state.as_str(), "Adopted existing notebook");
        let entry = Arc::new(NotebookEntry {
            session,
            channel,
            state: RwLock::new(state),
            run_lock: Mutex::new(()),
            cancel: CancellationToken::new(),
        });
        notebooks.live.insert(id.clone(), entry.clone());
        Ok(entry)
    }

    /// Fail fast unless both the tracked state and the container say running.
    /// A container stopped or paused behind our back is recorded as paused.
    async fn ensure_running(&self, entry: &NotebookEntry) -> SessionResult<()> {
        if entry.cancel.is_cancelled() {
            return Err(not_found());
        }
        let mut state = entry.state.write().await;
        if *state == NotebookState::Running {
            match self.runtime.status(entry.session.container_ref()).await {
                Ok(ContainerStatus::Running) => return Ok(()),
                Ok(status) => {
                    warn!(
                        session_id = %entry.session.id,
                        status = status.as_str(),
                        "Notebook container is not running"
                    );
                    *state = NotebookState::Paused;
                }
                Err(RuntimeError::NotFound(_)) => return Err(not_found()),
                Err(e) => return Err(e.into()),
            }
        }
        Err(SessionError::SessionNotRunning(
            "This notebook is paused".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::fake::FakeRuntime;
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use pretty_assertions::assert_eq;

    fn api_dir(spec: &ContainerSpec) -> std::path::PathBuf {
        spec.binds
            .iter()
            .find(|b| b.container == NOTEBOOK_API_MOUNT)
            .map(|b| std::path::PathBuf::from(&b.host))
            .unwrap()
    }

    fn runtime_with_runner() -> FakeRuntime {
        FakeRuntime::new().on_start(|spec| {
            tokio::spawn(protocol::fake_runner(api_dir(spec)));
        })
    }

    fn manager(runtime: &FakeRuntime, root: &std::path::Path) -> NotebookManager {
        let limits = LimitsConfig {
            notebook_poll_interval_ms: 10,
            notebook_run_timeout_secs: 1,
            ..LimitsConfig::default()
        };
        NotebookManager::new(
            Arc::new(runtime.clone()),
            WorkspaceManager::new(root),
            "python-nb".to_string(),
            limits,
        )
    }

    #[test]
    fn test_parse_notebook_id() {
        assert!(parse_notebook_id("nb-abcdef").is_ok());
        for bad in ["", "abcdef", "nb-", "nb-../etc", "NB-abc"] {
            let err = parse_notebook_id(bad).unwrap_err();
            assert_eq!(err.to_string(), "Invalid notebook ID");
        }
    }

    #[tokio::test]
    async fn test_create_provisions_container_and_files() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = runtime_with_runner();
        let manager = manager(&runtime, dir.path());

        let id = manager.create().await.unwrap();
        let name = id.strip_prefix(NOTEBOOK_PREFIX).unwrap();

        let spec = runtime.spec_of(name).unwrap();
        assert_eq!(spec.image, "python-nb");
        assert!(spec.command.is_none());
        assert!(api_dir(&spec).join("exe").is_file());
        assert!(api_dir(&spec).join("out").is_file());
        assert_eq!(runtime.status_of(name), Some(ContainerStatus::Running));
        assert_eq!(manager.active_count().await, 1);
    }

    #[tokio::test]
    async fn test_sequential_runs_share_one_container() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = runtime_with_runner();
        let manager = manager(&runtime, dir.path());
        let id = manager.create().await.unwrap();

        let first = manager.run(&id, "python", "x = 1", &[]).await.unwrap();
        let second = manager.run(&id, "python", "print(x)", &[]).await.unwrap();

        assert_eq!(first.output, "ran: x = 1");
        assert_eq!(second.output, "ran: print(x)");
        assert!(second.attachments.is_empty());
        let creates = runtime.calls().iter().filter(|c| c.starts_with("create:")).count();
        assert_eq!(creates, 1);
    }

    #[tokio::test]
    async fn test_run_returns_every_attachment() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = runtime_with_runner();
        let manager = manager(&runtime, dir.path());
        let id = manager.create().await.unwrap();

        let inputs = vec![Attachment {
            name: "data.csv".into(),
            content: STANDARD.encode("a,b\n"),
        }];
        let run = manager.run(&id, "python", "load", &inputs).await.unwrap();

        assert_eq!(run.attachments.len(), 1);
        assert_eq!(run.attachments[0].name, "data.csv");
    }

    #[tokio::test]
    async fn test_paused_notebook_rejects_runs_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = runtime_with_runner();
        let manager = manager(&runtime, dir.path());
        let id = manager.create().await.unwrap();
        let name = id.strip_prefix(NOTEBOOK_PREFIX).unwrap().to_string();

        manager.pause(&id).await.unwrap();
        assert_eq!(runtime.status_of(&name), Some(ContainerStatus::Paused));

        let err = manager.run(&id, "python", "print(1)", &[]).await.unwrap_err();
        assert!(matches!(err, SessionError::SessionNotRunning(ref m) if m == "This notebook is paused"));
        let exe = api_dir(&runtime.spec_of(&name).unwrap()).join("exe");
        assert_eq!(std::fs::read_to_string(&exe).unwrap(), "");

        manager.resume(&id).await.unwrap();
        let run = manager.run(&id, "python", "print(1)", &[]).await.unwrap();
        assert_eq!(run.output, "ran: print(1)");
    }

    #[tokio::test]
    async fn test_container_stopped_outside_api_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = runtime_with_runner();
        let manager = manager(&runtime, dir.path());
        let id = manager.create().await.unwrap();
        let name = id.strip_prefix(NOTEBOOK_PREFIX).unwrap().to_string();

        runtime.set_status(&name, ContainerStatus::Exited);

        let started = Instant::now();
        let err = manager.run(&id, "python", "print(1)", &[]).await.unwrap_err();
        assert!(matches!(err, SessionError::SessionNotRunning(ref m) if m == "This notebook is paused"));
        assert!(started.elapsed() < Duration::from_millis(500));
        let exe = api_dir(&runtime.spec_of(&name).unwrap()).join("exe");
        assert_eq!(std::fs::read_to_string(&exe).unwrap(), "");

        let listed = manager.list().await.unwrap();
        assert_eq!(listed[0].state, "paused");

        // resume restarts the exited container
        manager.resume(&id).await.unwrap();
        assert_eq!(runtime.status_of(&name), Some(ContainerStatus::Running));
        assert_eq!(runtime.calls().iter().filter(|c| c.starts_with("start:")).count(), 2);
    }

    #[tokio::test]
    async fn test_delete_in_progress_blocks_adoption() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = runtime_with_runner();
        let id = manager(&runtime, dir.path()).create().await.unwrap();
        let session_id = parse_notebook_id(&id).unwrap();

        let restarted = manager(&runtime, dir.path());
        restarted
            .notebooks
            .write()
            .await
            .deleting
            .insert(session_id.clone());

        let err = restarted.run(&id, "python", "1", &[]).await.unwrap_err();
        assert_eq!(err.to_string(), "Notebook not found");
        assert_eq!(restarted.active_count().await, 0);

        restarted.delete(&id).await.unwrap();
        assert!(restarted.notebooks.read().await.deleting.is_empty());
        assert_eq!(runtime.container_count(), 0);
    }

    #[tokio::test]
    async fn test_run_validation_order() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = runtime_with_runner();
        let manager = manager(&runtime, dir.path());
        let id = manager.create().await.unwrap();

        let err = manager.run("nb-unknown", "python", "1", &[]).await.unwrap_err();
        assert_eq!(err.to_string(), "Notebook not found");

        let err = manager.run(&id, "bash", "echo", &[]).await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid language for notebook");

        let err = manager.run("unknown", "python", "1", &[]).await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid notebook ID");
    }

    #[tokio::test]
    async fn test_run_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        // No runner: nothing ever answers
        let runtime = FakeRuntime::new();
        let manager = manager(&runtime, dir.path());
        let id = manager.create().await.unwrap();

        let err = manager.run(&id, "python", "loop", &[]).await.unwrap_err();
        assert!(matches!(err, SessionError::NotebookTimeout(_)));

        // Still usable afterwards
        manager.pause(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_cancels_pending_run() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = FakeRuntime::new();
        let manager = Arc::new(manager(&runtime, dir.path()));
        let id = manager.create().await.unwrap();

        let pending = {
            let manager = manager.clone();
            let id = id.clone();
            tokio::spawn(async move { manager.run(&id, "python", "loop", &[]).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        manager.delete(&id).await.unwrap();

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, SessionError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = runtime_with_runner();
        let manager = manager(&runtime, dir.path());
        let id = manager.create().await.unwrap();

        manager.delete(&id).await.unwrap();
        manager.delete(&id).await.unwrap();
        manager.delete("nb-neverexisted").await.unwrap();

        assert_eq!(runtime.container_count(), 0);
        assert_eq!(manager.active_count().await, 0);
        let nb_root = dir.path().join("nb");
        assert_eq!(std::fs::read_dir(nb_root).unwrap().count(), 0);
        assert!(matches!(
            manager.delete("bogus").await,
            Err(SessionError::InvalidSessionId(_))
        ));
    }

    #[tokio::test]
    async fn test_list_maps_exited_to_paused() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = runtime_with_runner();
        let manager = manager(&runtime, dir.path());
        let id = manager.create().await.unwrap();
        runtime.insert_existing("stale", ContainerStatus::Exited);

        let mut listed = manager.list().await.unwrap();
        listed.sort_by(|a, b| a.id.cmp(&b.id));

        let mut expected = vec![
            NotebookSummary {
                id: id.clone(),
                state: "running".into(),
            },
            NotebookSummary {
                id: "nb-stale".into(),
                state: "paused".into(),
            },
        ];
        expected.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(listed, expected);
    }

    #[tokio::test]
    async fn test_adopts_notebook_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = runtime_with_runner();
        let id = manager(&runtime, dir.path()).create().await.unwrap();

        let restarted = manager(&runtime, dir.path());
        let run = restarted.run(&id, "python", "print(2)", &[]).await.unwrap();
        assert_eq!(run.output, "ran: print(2)");
        assert_eq!(restarted.active_count().await, 1);
    }
}
