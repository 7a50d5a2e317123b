//! CES orchestrator library
//!
//! Runs untrusted Python and Bash snippets inside disposable containers,
//! either once (`/run`), as stateful notebooks (`/nb_*`) or as interactive
//! sessions streamed over a WebSocket (`/run_interactive` + `/ws`).

use std::sync::Arc;
use std::time::Instant;

pub mod api;
pub mod config;
pub mod container;
pub mod error;
pub mod interactive;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod notebook;
pub mod workspace;

use container::{ContainerRuntime, ExecutionOrchestrator};
use interactive::InteractiveManager;
use notebook::NotebookManager;
use workspace::WorkspaceManager;

/// Application state shared across all handlers
pub struct AppState {
    pub config: config::AppConfig,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub executor: ExecutionOrchestrator,
    pub notebooks: NotebookManager,
    pub interactive: Arc<InteractiveManager>,
    pub started_at: Instant,
}

impl AppState {
    /// Wire the three session managers to one runtime and one data directory
    pub fn new(config: config::AppConfig, runtime: Arc<dyn ContainerRuntime>) -> Self {
        let workspaces = WorkspaceManager::new(&config.data_dir);

        let executor = ExecutionOrchestrator::new(
            runtime.clone(),
            workspaces.clone(),
            config.images.clone(),
            config.limits.clone(),
        );
        let notebooks = NotebookManager::new(
            runtime.clone(),
            workspaces.clone(),
            config.images.notebook.clone(),
            config.limits.clone(),
        );
        let interactive = Arc::new(InteractiveManager::new(
            runtime.clone(),
            workspaces,
            config.images.python.clone(),
            config.limits.clone(),
        ));

        Self {
            config,
            runtime,
            executor,
            notebooks,
            interactive,
            started_at: Instant::now(),
        }
    }
}
