//! Data models for the CES orchestrator
//!
//! Request/response bodies of the HTTP surface and the small value types shared
//! by the session managers.

use serde::{Deserialize, Serialize};

// ============================================================================
// Language
// ============================================================================

/// Languages accepted by the execution endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Bash,
}

impl Language {
    /// Parse the `lang` field of a request
    pub fn parse(lang: &str) -> Option<Self> {
        match lang {
            "python" => Some(Language::Python),
            "bash" => Some(Language::Bash),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Bash => "bash",
        }
    }

    pub fn file_extension(&self) -> &'static str {
        match self {
            Language::Python => "py",
            Language::Bash => "sh",
        }
    }

    /// Name of the file the container image launches
    pub fn entry_file(&self) -> String {
        format!("launch.{}", self.file_extension())
    }
}

// ============================================================================
// Attachments
// ============================================================================

/// A named file carried as base64 inside a JSON body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    /// Base64 encoded content
    pub content: String,
}

// ============================================================================
// Execution Models
// ============================================================================

/// Body of `/run` and `/run_interactive`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunRequest {
    pub lang: String,

    pub code: String,

    #[serde(default)]
    pub attachments: Option<Vec<Attachment>>,
}

/// Result of a one-shot or notebook run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResponse {
    pub result: String,

    /// Files left in the attachments directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments_out: Option<Vec<Attachment>>,

    /// Wall time in seconds
    #[serde(rename = "executionTime")]
    pub execution_time: f64,
}

/// Returned when a session is created
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCreated {
    pub id: String,
}

// ============================================================================
// Notebook Models
// ============================================================================

/// Body of `/nb_run`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotebookRunRequest {
    #[serde(default)]
    pub id: String,

    pub lang: String,

    pub code: String,

    #[serde(default)]
    pub attachments: Option<Vec<Attachment>>,
}

/// Body of `/nb_delete`, `/nb_pause` and `/nb_resume`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotebookIdRequest {
    #[serde(default)]
    pub id: String,
}

/// One entry of `/nb_list`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotebookSummary {
    pub id: String,
    pub state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotebookListResponse {
    pub notebooks: Vec<NotebookSummary>,
}

/// Plain acknowledgement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub result: String,
}

impl MessageResponse {
    pub fn new(result: impl Into<String>) -> Self {
        Self {
            result: result.into(),
        }
    }
}

// ============================================================================
// Streaming Models
// ============================================================================

/// First frame a socket client sends
#[derive(Debug, Clone, Deserialize)]
pub struct AttachRequest {
    #[serde(default)]
    pub id: String,
}

// ============================================================================
// System Models
// ============================================================================

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub active_sessions: u64,
    #[serde(default)]
    pub runtime_version: Option<String>,
}

/// Health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

// ============================================================================
// Error Models
// ============================================================================

/// Standard error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
