//! Container runtime abstraction
//!
//! Everything the session managers need from Docker/Podman, expressed as an
//! async trait so the managers can be driven by an in-memory runtime in tests.

use std::pin::Pin;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;
use tokio::io::AsyncWrite;

/// Errors surfaced by a container runtime
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Container not found: {0}")]
    NotFound(String),

    #[error("Container runtime error: {0}")]
    Backend(String),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Raw output chunks of an attached container
pub type OutputStream = BoxStream<'static, RuntimeResult<Vec<u8>>>;

/// Standard input of an attached container
pub type InputSink = Pin<Box<dyn AsyncWrite + Send>>;

/// A bind mount from a host directory into the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bind {
    pub host: String,
    pub container: String,
}

impl Bind {
    pub fn new(host: impl Into<String>, container: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
        }
    }

    /// `host:container` form understood by the Docker API
    pub fn to_spec(&self) -> String {
        format!("{}:{}", self.host, self.container)
    }
}

/// Everything needed to create a container
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub binds: Vec<Bind>,
    /// Image default command when `None`
    pub command: Option<Vec<String>>,
    pub tty: bool,
    /// Keep stdin open and attachable
    pub interactive: bool,
}

/// Coarse container state as reported by inspect/list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Exited,
    Other(String),
}

impl ContainerStatus {
    pub fn parse(status: &str) -> Self {
        match status {
            "created" => ContainerStatus::Created,
            "running" => ContainerStatus::Running,
            "paused" => ContainerStatus::Paused,
            "exited" => ContainerStatus::Exited,
            other => ContainerStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ContainerStatus::Created => "created",
            ContainerStatus::Running => "running",
            ContainerStatus::Paused => "paused",
            ContainerStatus::Exited => "exited",
            ContainerStatus::Other(other) => other,
        }
    }
}

/// One row of a container listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub names: Vec<String>,
    pub state: String,
}

/// Live duplex connection to a container's standard streams
pub struct AttachedStreams {
    pub output: OutputStream,
    pub input: InputSink,
}

impl std::fmt::Debug for AttachedStreams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachedStreams").finish_non_exhaustive()
    }
}

/// Operations the orchestrator requires from the container runtime
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create a container and return its runtime id
    async fn create(&self, spec: &ContainerSpec) -> RuntimeResult<String>;

    async fn start(&self, container: &str) -> RuntimeResult<()>;

    /// Attach to stdin/stdout/stderr as a live stream
    async fn attach(&self, container: &str) -> RuntimeResult<AttachedStreams>;

    /// Resolve when the container's process exits, yielding its exit code
    async fn wait(&self, container: &str) -> RuntimeResult<i64>;

    /// Graceful stop using the runtime's own grace period
    async fn stop(&self, container: &str) -> RuntimeResult<()>;

    async fn kill(&self, container: &str) -> RuntimeResult<()>;

    async fn pause(&self, container: &str) -> RuntimeResult<()>;

    async fn unpause(&self, container: &str) -> RuntimeResult<()>;

    async fn status(&self, container: &str) -> RuntimeResult<ContainerStatus>;

    /// Combined stdout and stderr captured so far
    async fn logs(&self, container: &str) -> RuntimeResult<String>;

    async fn remove(&self, container: &str, force: bool) -> RuntimeResult<()>;

    /// Every container known to the runtime, stopped ones included
    async fn list(&self) -> RuntimeResult<Vec<ContainerSummary>>;

    async fn version(&self) -> Option<String>;
}
