//! File exchange with the notebook runner
//!
//! The runner inside the container watches `/api/exe`, executes whatever code
//! appears there against its live interpreter state and rewrites `/api/out`.
//! A request is answered once `out` differs, by modification time or by
//! content, from the snapshot taken before `exe` was written. Both files sit in
//! a directory the container can write, so they are only touched through the
//! link-refusing helpers of [`WorkspaceManager`].

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::trace;

use crate::workspace::{WorkspaceError, WorkspaceManager};

/// Request file, read by the runner
pub const EXEC_FILE: &str = "exe";
/// Response file, written by the runner
pub const OUT_FILE: &str = "out";

#[derive(Debug, Clone)]
pub struct FileChannel {
    exec: PathBuf,
    out: PathBuf,
    poll_interval: Duration,
}

impl FileChannel {
    pub fn new(api_dir: &Path, poll_interval: Duration) -> Self {
        Self {
            exec: api_dir.join(EXEC_FILE),
            out: api_dir.join(OUT_FILE),
            poll_interval,
        }
    }

    /// Create both files empty and writable by the container user
    pub async fn initialize(&self, workspaces: &WorkspaceManager) -> Result<(), WorkspaceError> {
        workspaces.write_file(&self.exec, b"").await?;
        workspaces.write_file(&self.out, b"").await?;
        Ok(())
    }

    /// Submit `code` and wait for the runner's answer. Unbounded: callers
    /// race it against their own deadline.
    pub async fn exchange(
        &self,
        workspaces: &WorkspaceManager,
        code: &str,
    ) -> Result<String, WorkspaceError> {
        let before = self.snapshot(workspaces).await;
        workspaces.write_file(&self.exec, code.as_bytes()).await?;

        let mut polls = 0u64;
        loop {
            tokio::time::sleep(self.poll_interval).await;
            polls += 1;
            if self.snapshot(workspaces).await != before {
                break;
            }
        }
        trace!(polls, out = %self.out.display(), "Notebook answered");

        let bytes = workspaces.read_file(&self.out).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn snapshot(&self, workspaces: &WorkspaceManager) -> OutSnapshot {
        OutSnapshot {
            modified: tokio::fs::symlink_metadata(&self.out)
                .await
                .ok()
                .and_then(|meta| meta.modified().ok()),
            content: workspaces.read_file(&self.out).await.ok(),
        }
    }

    pub fn exec_path(&self) -> &Path {
        &self.exec
    }
}

#[derive(Debug, PartialEq, Eq)]
struct OutSnapshot {
    modified: Option<SystemTime>,
    content: Option<Vec<u8>>,
}

/// Stand-in for the in-container runner, shared with the manager tests.
/// A non-empty `exe` is a pending request; the runner consumes it by
/// truncating `exe` before answering, so timestamps never matter.
#[cfg(test)]
pub(crate) async fn fake_runner(api_dir: PathBuf) {
    let exec = api_dir.join(EXEC_FILE);
    let out = api_dir.join(OUT_FILE);

    loop {
        tokio::time::sleep(Duration::from_millis(5)).await;
        let code = match tokio::fs::read_to_string(&exec).await {
            Ok(code) => code,
            Err(_) => break,
        };
        if code.is_empty() {
            continue;
        }
        if tokio::fs::write(&exec, b"").await.is_err() {
            break;
        }
        if tokio::fs::write(&out, format!("ran: {}", code)).await.is_err() {
            break;
        }
    }
}
