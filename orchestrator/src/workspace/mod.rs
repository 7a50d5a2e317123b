//! Per-session workspace directories
//!
//! Every session owns one directory tree under the data root, named after the
//! session id and bind-mounted into its container:
//! - `<root>/<lang>/<id>/{app,attachments}` for ephemeral and interactive runs
//! - `<root>/nb/<id>/{api,attachments}` for notebooks

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use crate::container::SessionId;
use crate::models::{Attachment, Language};

/// Attempts at finding an unused session id before giving up
const MAX_ALLOCATION_ATTEMPTS: usize = 8;

/// Permissions granted to the container's unprivileged user
#[cfg(unix)]
const SHARED_DIR_MODE: u32 = 0o777;
#[cfg(unix)]
const SHARED_FILE_MODE: u32 = 0o666;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Workspace IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Attachment {name} is not valid base64")]
    AttachmentDecode { name: String },

    #[error("Invalid attachment name: {0:?}")]
    InvalidAttachmentName(String),

    #[error("Workspace already exists: {}", .0.display())]
    Collision(PathBuf),
}

/// Which directory layout a session gets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceKind {
    Code(Language),
    Notebook,
}

impl WorkspaceKind {
    fn prefix(&self) -> &'static str {
        match self {
            WorkspaceKind::Code(lang) => lang.as_str(),
            WorkspaceKind::Notebook => "nb",
        }
    }

    fn code_dir_name(&self) -> &'static str {
        match self {
            WorkspaceKind::Code(_) => "app",
            WorkspaceKind::Notebook => "api",
        }
    }
}

/// Paths of one allocated workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    /// Session directory, removed as a whole on cleanup
    pub root: PathBuf,
    /// `app` (code) or `api` (notebook exchange files)
    pub code_dir: PathBuf,
    pub attachments_dir: PathBuf,
}

impl Workspace {
    fn at(root: PathBuf, kind: WorkspaceKind) -> Self {
        Self {
            code_dir: root.join(kind.code_dir_name()),
            attachments_dir: root.join("attachments"),
            root,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the workspace of `id` lives, whether or not it exists
    pub fn path_for(&self, id: &SessionId, kind: WorkspaceKind) -> Workspace {
        Workspace::at(self.root.join(kind.prefix()).join(id.as_str()), kind)
    }

    /// Create the directory tree of `id`. The session directory itself is
    /// created exclusively so an id already on disk is reported as a collision.
    pub async fn allocate(
        &self,
        id: &SessionId,
        kind: WorkspaceKind,
    ) -> Result<Workspace, WorkspaceError> {
        let workspace = self.path_for(id, kind);
        if let Some(parent) = workspace.root.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        match tokio::fs::create_dir(&workspace.root).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(WorkspaceError::Collision(workspace.root));
            }
            Err(e) => return Err(e.into()),
        }

        let populate = async {
            for dir in [&workspace.code_dir, &workspace.attachments_dir] {
                tokio::fs::create_dir(dir).await?;
                set_dir_mode(dir).await?;
            }
            Ok::<_, WorkspaceError>(())
        };
        if let Err(e) = populate.await {
            self.destroy(&workspace).await;
            return Err(e);
        }

        debug!(session_id = %id, path = %workspace.root.display(), "Workspace allocated");
        Ok(workspace)
    }

    /// Generate ids until one allocates cleanly
    pub async fn allocate_fresh(
        &self,
        kind: WorkspaceKind,
    ) -> Result<(SessionId, Workspace), WorkspaceError> {
        let mut last_collision = None;
        for _ in 0..MAX_ALLOCATION_ATTEMPTS {
            let id = SessionId::generate();
            match self.allocate(&id, kind).await {
                Ok(workspace) => return Ok((id, workspace)),
                Err(WorkspaceError::Collision(path)) => {
                    warn!(path = %path.display(), "Session id collision, retrying");
                    last_collision = Some(path);
                }
                Err(e) => return Err(e),
            }
        }
        Err(WorkspaceError::Collision(
            last_collision.unwrap_or_else(|| self.root.clone()),
        ))
    }

    /// Existing workspace of `id`, if its directory is on disk
    pub async fn open(&self, id: &SessionId, kind: WorkspaceKind) -> Option<Workspace> {
        let workspace = self.path_for(id, kind);
        match tokio::fs::metadata(&workspace.code_dir).await {
            Ok(meta) if meta.is_dir() => Some(workspace),
            _ => None,
        }
    }

    /// Write a file readable and writable from inside the container.
    ///
    /// The directories are writable by the container, so whatever sits at
    /// `path` may have been planted there: a link or other non-regular entry
    /// is unlinked first, and the open itself refuses to follow links.
    pub async fn write_file(&self, path: &Path, content: &[u8]) -> Result<(), WorkspaceError> {
        match tokio::fs::symlink_metadata(path).await {
            Ok(meta) if !meta.file_type().is_file() => {
                warn!(path = %path.display(), "Replacing non-regular entry");
                tokio::fs::remove_file(path).await?;
            }
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let mut file = open_for_write(path).await?;
        file.write_all(content).await?;
        file.flush().await?;
        set_file_mode(&file).await?;
        Ok(())
    }

    /// Read a regular file, refusing links and other special entries
    pub async fn read_file(&self, path: &Path) -> Result<Vec<u8>, WorkspaceError> {
        Ok(read_regular(path).await?)
    }

    /// Decode one attachment and write it under `dir`
    pub async fn write_attachment(
        &self,
        dir: &Path,
        attachment: &Attachment,
    ) -> Result<PathBuf, WorkspaceError> {
        validate_name(&attachment.name)?;
        let bytes = STANDARD
            .decode(attachment.content.trim())
            .map_err(|_| WorkspaceError::AttachmentDecode {
                name: attachment.name.clone(),
            })?;

        let path = dir.join(&attachment.name);
        self.write_file(&path, &bytes).await?;
        Ok(path)
    }

    /// Write every attachment that decodes; bad ones are logged and skipped.
    /// Returns the paths actually written.
    pub async fn materialize_attachments(
        &self,
        dir: &Path,
        attachments: &[Attachment],
    ) -> Vec<PathBuf> {
        let mut written = Vec::with_capacity(attachments.len());
        for attachment in attachments {
            match self.write_attachment(dir, attachment).await {
                Ok(path) => written.push(path),
                Err(e) => warn!(name = %attachment.name, error = %e, "Skipping attachment"),
            }
        }
        written
    }

    /// Remove files written by `materialize_attachments`
    pub async fn remove_files(&self, paths: &[PathBuf]) {
        for path in paths {
            if let Err(e) = tokio::fs::remove_file(path).await {
                if e.kind() != ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "Failed to remove input file");
                }
            }
        }
    }

    /// Regular files in `dir` in name order, base64 encoded, at most `limit`
    pub async fn collect_attachments(
        &self,
        dir: &Path,
        limit: Option<usize>,
    ) -> Result<Vec<Attachment>, WorkspaceError> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();

        let limit = limit.unwrap_or(usize::MAX);
        let mut attachments = Vec::new();
        for name in names.into_iter().take(limit) {
            let bytes = match read_regular(&dir.join(&name)).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(name = %name, error = %e, "Skipping output file");
                    continue;
                }
            };
            attachments.push(Attachment {
                name,
                content: STANDARD.encode(bytes),
            });
        }
        Ok(attachments)
    }

    /// Recursively delete a workspace. Missing directories are fine and other
    /// failures are only logged, so cleanup never masks the original error.
    pub async fn destroy(&self, workspace: &Workspace) {
        match tokio::fs::remove_dir_all(&workspace.root).await {
            Ok(()) => debug!(path = %workspace.root.display(), "Workspace removed"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %workspace.root.display(), error = %e, "Failed to remove workspace")
            }
        }
    }
}

fn validate_name(name: &str) -> Result<(), WorkspaceError> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if invalid {
        return Err(WorkspaceError::InvalidAttachmentName(name.to_string()));
    }
    Ok(())
}

#[cfg(unix)]
async fn set_dir_mode(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(SHARED_DIR_MODE)).await
}

#[cfg(not(unix))]
async fn set_dir_mode(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(unix)]
async fn open_for_write(path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(SHARED_FILE_MODE)
        .custom_flags(libc::O_NOFOLLOW)
        .open(path)
        .await
}

#[cfg(not(unix))]
async fn open_for_write(path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .await
}

/// Mode is set on the handle so the umask does not apply and no path is re-resolved
#[cfg(unix)]
async fn set_file_mode(file: &File) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    file.set_permissions(std::fs::Permissions::from_mode(SHARED_FILE_MODE))
        .await
}

#[cfg(not(unix))]
async fn set_file_mode(_file: &File) -> std::io::Result<()> {
    Ok(())
}

/// Read a file without following a link swapped in after the directory listing
async fn read_regular(path: &Path) -> std::io::Result<Vec<u8>> {
    let mut options = OpenOptions::new();
    options.read(true);
    #[cfg(unix)]
    options.custom_flags(libc::O_NOFOLLOW | libc::O_NONBLOCK);

    let mut file = options.open(path).await?;
    if !file.metadata().await?.is_file() {
        return Err(std::io::Error::new(ErrorKind::Other, "not a regular file"));
    }
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).await?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn manager() -> (tempfile::TempDir, WorkspaceManager) {
        let dir = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::new(dir.path());
        (dir, manager)
    }

    fn attachment(name: &str, raw: &[u8]) -> Attachment {
        Attachment {
            name: name.to_string(),
            content: STANDARD.encode(raw),
        }
    }

    #[tokio::test]
    async fn test_allocate_layouts() {
        let (dir, manager) = manager();
        let id = SessionId::parse("abc").unwrap();

        let ws = manager
            .allocate(&id, WorkspaceKind::Code(Language::Python))
            .await
            .unwrap();
        assert_eq!(ws.code_dir, dir.path().join("python/abc/app"));
        assert!(ws.attachments_dir.is_dir());

        let nb = manager.allocate(&id, WorkspaceKind::Notebook).await.unwrap();
        assert_eq!(nb.code_dir, dir.path().join("nb/abc/api"));
        assert!(nb.code_dir.is_dir());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_allocate_sets_shared_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let (_dir, manager) = manager();
        let (_, ws) = manager
            .allocate_fresh(WorkspaceKind::Code(Language::Bash))
            .await
            .unwrap();
        let mode = std::fs::metadata(&ws.attachments_dir).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o777);
    }

    #[tokio::test]
    async fn test_allocate_collision() {
        let (_dir, manager) = manager();
        let id = SessionId::parse("same").unwrap();
        let kind = WorkspaceKind::Code(Language::Bash);

        manager.allocate(&id, kind).await.unwrap();
        let err = manager.allocate(&id, kind).await.unwrap_err();
        assert!(matches!(err, WorkspaceError::Collision(_)));
    }

    #[tokio::test]
    async fn test_materialize_skips_bad_attachments() {
        let (_dir, manager) = manager();
        let (_, ws) = manager
            .allocate_fresh(WorkspaceKind::Code(Language::Python))
            .await
            .unwrap();

        let attachments = vec![
            attachment("a.txt", b"X"),
            Attachment {
                name: "bad.bin".into(),
                content: "not base64!!".into(),
            },
            attachment("../escape.txt", b"nope"),
        ];
        let written = manager
            .materialize_attachments(&ws.code_dir, &attachments)
            .await;

        assert_eq!(written, vec![ws.code_dir.join("a.txt")]);
        assert_eq!(std::fs::read(ws.code_dir.join("a.txt")).unwrap(), b"X");
        assert!(!ws.root.parent().unwrap().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn test_collect_sorted_and_capped() {
        let (_dir, manager) = manager();
        let (_, ws) = manager
            .allocate_fresh(WorkspaceKind::Notebook)
            .await
            .unwrap();
        for name in ["c.txt", "a.txt", "b.txt"] {
            std::fs::write(ws.attachments_dir.join(name), name).unwrap();
        }
        std::fs::create_dir(ws.attachments_dir.join("subdir")).unwrap();

        let all = manager
            .collect_attachments(&ws.attachments_dir, None)
            .await
            .unwrap();
        let names: Vec<_> = all.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "c.txt"]);
        assert_eq!(STANDARD.decode(&all[0].content).unwrap(), b"a.txt");

        let capped = manager
            .collect_attachments(&ws.attachments_dir, Some(2))
            .await
            .unwrap();
        assert_eq!(capped.len(), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_write_replaces_planted_symlink() {
        use std::os::unix::fs::PermissionsExt;

        let (dir, manager) = manager();
        let (_, ws) = manager
            .allocate_fresh(WorkspaceKind::Notebook)
            .await
            .unwrap();

        let outside = dir.path().join("host-secret");
        std::fs::write(&outside, b"original").unwrap();
        std::fs::set_permissions(&outside, std::fs::Permissions::from_mode(0o600)).unwrap();
        std::os::unix::fs::symlink(&outside, ws.attachments_dir.join("k")).unwrap();

        let written = manager
            .materialize_attachments(&ws.attachments_dir, &[attachment("k", b"pwned")])
            .await;

        assert_eq!(written, vec![ws.attachments_dir.join("k")]);
        assert_eq!(std::fs::read(&outside).unwrap(), b"original");
        let outside_mode = std::fs::metadata(&outside).unwrap().permissions().mode();
        assert_eq!(outside_mode & 0o777, 0o600);

        let planted = std::fs::symlink_metadata(ws.attachments_dir.join("k")).unwrap();
        assert!(planted.file_type().is_file());
        assert_eq!(planted.permissions().mode() & 0o777, 0o666);
        assert_eq!(std::fs::read(ws.attachments_dir.join("k")).unwrap(), b"pwned");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_collect_ignores_symlinks() {
        let (dir, manager) = manager();
        let (_, ws) = manager
            .allocate_fresh(WorkspaceKind::Notebook)
            .await
            .unwrap();

        let outside = dir.path().join("host-secret");
        std::fs::write(&outside, b"secret").unwrap();
        std::os::unix::fs::symlink(&outside, ws.attachments_dir.join("link")).unwrap();
        std::fs::write(ws.attachments_dir.join("out.txt"), b"ok").unwrap();

        let collected = manager
            .collect_attachments(&ws.attachments_dir, None)
            .await
            .unwrap();
        let names: Vec<_> = collected.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["out.txt"]);
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let (_dir, manager) = manager();
        let (id, ws) = manager
            .allocate_fresh(WorkspaceKind::Notebook)
            .await
            .unwrap();
        assert!(manager.open(&id, WorkspaceKind::Notebook).await.is_some());

        manager.destroy(&ws).await;
        manager.destroy(&ws).await;
        assert!(!ws.root.exists());
        assert!(manager.open(&id, WorkspaceKind::Notebook).await.is_none());
    }
}
