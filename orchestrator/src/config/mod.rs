//! Configuration module for the CES orchestrator
//!
//! Supports configuration via:
//! - YAML/TOML config files
//! - Environment variables (with CES_ prefix)

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::models::Language;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory for the JSON log file (stdout only when unset)
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Root of all session workspaces
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Docker/Podman socket path (local defaults when unset)
    #[serde(default)]
    pub docker_socket: Option<String>,

    /// Container images per session type
    #[serde(default)]
    pub images: ImageConfig,

    /// Timeouts and caps
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// Images used for each kind of container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    #[serde(default = "default_python_image")]
    pub python: String,

    #[serde(default = "default_bash_image")]
    pub bash: String,

    /// Image running the notebook exec/out loop
    #[serde(default = "default_notebook_image")]
    pub notebook: String,
}

/// Execution limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Wall-clock deadline of an ephemeral run
    #[serde(default = "default_run_timeout_ms")]
    pub run_timeout_ms: u64,

    /// Lifetime of an attached interactive session
    #[serde(default = "default_interactive_timeout_secs")]
    pub interactive_timeout_secs: u64,

    /// How long an interactive session may wait for its client
    #[serde(default = "default_attach_timeout_secs")]
    pub attach_timeout_secs: u64,

    /// Poll interval of the notebook out file
    #[serde(default = "default_notebook_poll_interval_ms")]
    pub notebook_poll_interval_ms: u64,

    /// Upper bound on a single notebook run
    #[serde(default = "default_notebook_run_timeout_secs")]
    pub notebook_run_timeout_secs: u64,

    /// Output attachments returned by an ephemeral run
    #[serde(default = "default_max_output_attachments")]
    pub max_output_attachments: usize,

    /// Largest accepted code submission
    #[serde(default = "default_max_code_bytes")]
    pub max_code_bytes: usize,

    /// Largest accepted request body, attachments included
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/ces")
}

fn default_python_image() -> String {
    "python-docker".to_string()
}

fn default_bash_image() -> String {
    "bash-docker".to_string()
}

fn default_notebook_image() -> String {
    "python-nb".to_string()
}

fn default_run_timeout_ms() -> u64 {
    10_200
}

fn default_interactive_timeout_secs() -> u64 {
    60
}

fn default_attach_timeout_secs() -> u64 {
    60
}

fn default_notebook_poll_interval_ms() -> u64 {
    100
}

fn default_notebook_run_timeout_secs() -> u64 {
    300
}

fn default_max_output_attachments() -> usize {
    10
}

fn default_max_code_bytes() -> usize {
    1_000_000
}

fn default_max_body_bytes() -> usize {
    32 * 1024 * 1024
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            python: default_python_image(),
            bash: default_bash_image(),
            notebook: default_notebook_image(),
        }
    }
}

impl ImageConfig {
    /// Image for one-shot and interactive runs of `language`
    pub fn for_language(&self, language: Language) -> &str {
        match language {
            Language::Python => &self.python,
            Language::Bash => &self.bash,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            run_timeout_ms: default_run_timeout_ms(),
            interactive_timeout_secs: default_interactive_timeout_secs(),
            attach_timeout_secs: default_attach_timeout_secs(),
            notebook_poll_interval_ms: default_notebook_poll_interval_ms(),
            notebook_run_timeout_secs: default_notebook_run_timeout_secs(),
            max_output_attachments: default_max_output_attachments(),
            max_code_bytes: default_max_code_bytes(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl LimitsConfig {
    pub fn run_timeout(&self) -> Duration {
        Duration::from_millis(self.run_timeout_ms)
    }

    pub fn interactive_timeout(&self) -> Duration {
        Duration::from_secs(self.interactive_timeout_secs)
    }

    pub fn attach_timeout(&self) -> Duration {
        Duration::from_secs(self.attach_timeout_secs)
    }

    pub fn notebook_poll_interval(&self) -> Duration {
        Duration::from_millis(self.notebook_poll_interval_ms)
    }

    pub fn notebook_run_timeout(&self) -> Duration {
        Duration::from_secs(self.notebook_run_timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            log_dir: None,
            data_dir: default_data_dir(),
            docker_socket: None,
            images: ImageConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file and environment variables
    pub fn load() -> Result<Self> {
        // Try to load .env file if present
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config/ces").required(false))
            .add_source(config::File::with_name("/etc/ces/config").required(false))
            // Override with environment variables (CES__ prefix)
            .add_source(
                config::Environment::with_prefix("CES")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;

        Ok(app_config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            anyhow::bail!("Port cannot be 0");
        }

        if self.limits.run_timeout_ms == 0 {
            anyhow::bail!("Run timeout cannot be 0");
        }

        if self.limits.interactive_timeout_secs == 0 || self.limits.attach_timeout_secs == 0 {
            anyhow::bail!("Interactive timeouts cannot be 0");
        }

        if self.limits.notebook_poll_interval_ms == 0 {
            anyhow::bail!("Notebook poll interval cannot be 0");
        }

        if self.limits.notebook_run_timeout_secs == 0 {
            anyhow::bail!("Notebook run timeout cannot be 0");
        }

        if self.limits.max_output_attachments == 0 {
            anyhow::bail!("At least one output attachment must be allowed");
        }

        if self.limits.max_body_bytes < self.limits.max_code_bytes {
            anyhow::bail!("Body limit cannot be smaller than the code limit");
        }

        Ok(())
    }
}
