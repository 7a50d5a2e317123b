//! One-shot code execution
//!
//! An ephemeral run is strictly sequential: workspace → create → start →
//! wait-or-deadline → logs → attachments → cleanup. The container and the
//! workspace are removed on every path, including failures.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::{ImageConfig, LimitsConfig};
use crate::error::{SessionError, SessionResult};
use crate::metrics;
use crate::models::{Attachment, Language};
use crate::workspace::{WorkspaceKind, WorkspaceManager};

use super::runtime::{Bind, ContainerRuntime, ContainerSpec, RuntimeError};
use super::session::{Session, SessionKind};
use super::{APP_MOUNT, ATTACHMENTS_MOUNT};

/// Returned instead of empty or whitespace-only output
pub const EMPTY_OUTPUT: &str = "CES: Empty output";

/// What the caller sees when the deadline stopped the program
pub const TIMEOUT_MESSAGE: &str = "Execution timed out.";

/// Printed by the interpreter when a stop interrupts it
const INTERRUPT_TEXT: &str = "KeyboardInterrupt";

/// Result of an ephemeral run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub output: String,
    pub execution_time: Duration,
    pub attachments: Vec<Attachment>,
    pub timed_out: bool,
}

/// Runs one-shot submissions in throwaway containers
pub struct ExecutionOrchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    workspaces: WorkspaceManager,
    images: ImageConfig,
    limits: LimitsConfig,
}

impl ExecutionOrchestrator {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        workspaces: WorkspaceManager,
        images: ImageConfig,
        limits: LimitsConfig,
    ) -> Self {
        Self {
            runtime,
            workspaces,
            images,
            limits,
        }
    }

    /// Execute `code` once and return its output
    pub async fn run(
        &self,
        lang: &str,
        code: &str,
        attachments: &[Attachment],
    ) -> SessionResult<RunOutcome> {
        let language = Language::parse(lang)
            .ok_or_else(|| SessionError::InvalidLanguage("Invalid language".to_string()))?;

        let started = Instant::now();
        let (id, workspace) = self
            .workspaces
            .allocate_fresh(WorkspaceKind::Code(language))
            .await?;
        let mut session = Session::new(id, SessionKind::Ephemeral, workspace);
        metrics::record_session_created(SessionKind::Ephemeral);

        debug!(
            session_id = %session.id,
            language = language.as_str(),
            code_len = code.len(),
            attachments = attachments.len(),
            "Starting ephemeral run"
        );

        let result = self
            .execute(&mut session, language, code, attachments, started)
            .await;

        self.cleanup(&session).await;

        let elapsed = started.elapsed().as_secs_f64();
        match &result {
            Ok(outcome) => {
                let outcome_label = if outcome.timed_out { "timeout" } else { "success" };
                metrics::record_run(language.as_str(), outcome_label, elapsed);
                metrics::record_session_closed(SessionKind::Ephemeral, outcome_label);
                info!(
                    session_id = %session.id,
                    language = language.as_str(),
                    timed_out = outcome.timed_out,
                    attachments_out = outcome.attachments.len(),
                    duration_ms = session.age_ms(),
                    "Ephemeral run completed"
                );
            }
            Err(e) => {
                metrics::record_run(language.as_str(), "error", elapsed);
                metrics::record_session_closed(SessionKind::Ephemeral, "failed");
                warn!(session_id = %session.id, error = %e, "Ephemeral run failed");
            }
        }

        result
    }

    async fn execute(
        &self,
        session: &mut Session,
        language: Language,
        code: &str,
        attachments: &[Attachment],
        started: Instant,
    ) -> SessionResult<RunOutcome> {
        let workspace = session.workspace.clone();

        let entry = workspace.code_dir.join(language.entry_file());
        self.workspaces.write_file(&entry, code.as_bytes()).await?;

        // Inputs share the code directory and must not replace the entry file
        let attachments: Vec<Attachment> = attachments
            .iter()
            .filter(|a| {
                let shadows = a.name == language.entry_file();
                if shadows {
                    warn!(
                        session_id = %session.id,
                        name = %a.name,
                        "Skipping attachment named like the entry file"
                    );
                }
                !shadows
            })
            .cloned()
            .collect();
        let inputs = self
            .workspaces
            .materialize_attachments(&workspace.code_dir, &attachments)
            .await;

        let spec = ContainerSpec {
            name: session.id.to_string(),
            image: self.images.for_language(language).to_string(),
            binds: vec![
                Bind::new(workspace.code_dir.to_string_lossy(), APP_MOUNT),
                Bind::new(workspace.attachments_dir.to_string_lossy(), ATTACHMENTS_MOUNT),
            ],
            command: None,
            tty: true,
            interactive: false,
        };

        let container = self.runtime.create(&spec).await?;
        session.container = Some(container.clone());
        self.runtime.start(&container).await?;

        let timed_out = match tokio::time::timeout(
            self.limits.run_timeout(),
            self.runtime.wait(&container),
        )
        .await
        {
            Ok(exit) => {
                let exit_code = exit?;
                debug!(session_id = %session.id, exit_code, "Container exited");
                false
            }
            Err(_) => {
                info!(
                    session_id = %session.id,
                    timeout_ms = self.limits.run_timeout_ms,
                    "Run deadline reached, stopping container"
                );
                self.runtime.stop(&container).await?;
                true
            }
        };

        let logs = self.runtime.logs(&container).await?;
        let output = normalize_output(&logs, timed_out);

        self.workspaces.remove_files(&inputs).await;
        let attachments = self
            .workspaces
            .collect_attachments(
                &workspace.attachments_dir,
                Some(self.limits.max_output_attachments),
            )
            .await?;

        Ok(RunOutcome {
            output,
            execution_time: started.elapsed(),
            attachments,
            timed_out,
        })
    }

    async fn cleanup(&self, session: &Session) {
        if let Some(container) = &session.container {
            match self.runtime.remove(container, true).await {
                Ok(()) | Err(RuntimeError::NotFound(_)) => {}
                Err(e) => warn!(session_id = %session.id, error = %e, "Failed to remove container"),
            }
        }
        self.workspaces.destroy(&session.workspace).await;
    }
}

/// Apply the interrupt rewrite, the timeout notice and the empty sentinel
fn normalize_output(logs: &str, timed_out: bool) -> String {
    let mut output = logs.replace(INTERRUPT_TEXT, TIMEOUT_MESSAGE);

    if timed_out && !output.contains(TIMEOUT_MESSAGE) {
        if !output.is_empty() && !output.ends_with('\n') {
            output.push('\n');
        }
        output.push_str(TIMEOUT_MESSAGE);
    }

    if output.trim().is_empty() {
        return EMPTY_OUTPUT.to_string();
    }
    output
}
