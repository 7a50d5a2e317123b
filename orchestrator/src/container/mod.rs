//! Container management for the CES orchestrator
//!
//! - `runtime`: the operations required from Docker/Podman
//! - `docker`: the bollard-backed implementation
//! - `session`: session ids and records
//! - `executor`: one-shot (ephemeral) runs

mod docker;
mod executor;
mod runtime;
pub mod session;

#[cfg(test)]
pub(crate) mod fake;

pub use docker::DockerRuntime;
pub use executor::{ExecutionOrchestrator, RunOutcome, EMPTY_OUTPUT, TIMEOUT_MESSAGE};
pub use runtime::{
    AttachedStreams, Bind, ContainerRuntime, ContainerSpec, ContainerStatus, ContainerSummary,
    InputSink, OutputStream, RuntimeError, RuntimeResult,
};
pub use session::{Session, SessionId, SessionKind};

#[cfg(test)]
pub use runtime::MockContainerRuntime;

/// Mount point of the code (`app`) directory
pub const APP_MOUNT: &str = "/app";
/// Mount point of the attachments directory (the container user's home)
pub const ATTACHMENTS_MOUNT: &str = "/home/appuser";
/// Mount point of the notebook exchange directory
pub const NOTEBOOK_API_MOUNT: &str = "/api";
