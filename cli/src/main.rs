//! CES CLI - Command-line interface for the CES orchestrator
//!
//! Runs code, drives notebooks and prepares interactive sessions

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::{Parser, Subcommand};
use colored::Colorize;
use reqwest::blocking::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// CES CLI - Execute code in disposable sandboxes
#[derive(Parser)]
#[command(name = "ces")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "CLI for CES - the code execution service", long_about = None)]
struct Cli {
    /// CES API URL
    #[arg(short, long, default_value = "http://127.0.0.1:8080")]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute code once in a fresh sandbox
    Run {
        /// Programming language (python or bash)
        lang: String,

        /// Code to execute (or path to file with @ prefix)
        code: String,

        /// Files to place next to the code
        #[arg(short, long)]
        attach: Vec<PathBuf>,

        /// Directory to write produced files into
        #[arg(short, long)]
        save_dir: Option<PathBuf>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        output: String,
    },

    /// Prepare an interactive Python session
    Interactive {
        /// Code to execute (or path to file with @ prefix)
        code: String,

        /// Files to place in the session's home directory
        #[arg(short, long)]
        attach: Vec<PathBuf>,
    },

    /// Manage notebooks
    #[command(subcommand)]
    Nb(NbCommands),

    /// Get server health status
    Health,
}

#[derive(Subcommand)]
enum NbCommands {
    /// Start a new notebook
    Create,

    /// List notebooks and their state
    List,

    /// Run a snippet in a notebook
    Run {
        /// Notebook id (nb-...)
        id: String,

        /// Code to execute (or path to file with @ prefix)
        code: String,

        /// Programming language
        #[arg(short, long, default_value = "python")]
        lang: String,

        /// Files to add to the notebook's home directory
        #[arg(short, long)]
        attach: Vec<PathBuf>,

        /// Directory to write the notebook's files into
        #[arg(short, long)]
        save_dir: Option<PathBuf>,
    },

    /// Pause a notebook
    Pause { id: String },

    /// Resume a paused notebook
    Resume { id: String },

    /// Delete a notebook and its files
    Delete { id: String },
}

#[derive(Debug, Serialize, Deserialize)]
struct Attachment {
    name: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct RunRequest {
    lang: String,
    code: String,
    attachments: Vec<Attachment>,
}

#[derive(Debug, Serialize)]
struct NotebookRunRequest {
    id: String,
    lang: String,
    code: String,
    attachments: Vec<Attachment>,
}

#[derive(Debug, Serialize)]
struct IdRequest<'a> {
    id: &'a str,
}

#[derive(Debug, Serialize, Deserialize)]
struct RunResponse {
    result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    attachments_out: Option<Vec<Attachment>>,
    #[serde(rename = "executionTime")]
    execution_time: f64,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_seconds: u64,
    active_sessions: u64,
    runtime_version: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::new();
    let api = cli.api_url.trim_end_matches('/');

    match cli.command {
        Commands::Run {
            lang,
            code,
            attach,
            save_dir,
            output,
        } => {
            let request = RunRequest {
                lang,
                code: read_code(&code)?,
                attachments: load_attachments(&attach)?,
            };

            let body = send(client.post(format!("{}/run", api)).json(&request))?;
            let result: RunResponse =
                serde_json::from_value(body).context("Failed to parse response")?;

            if output == "json" {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_run(&result);
            }
            save_attachments(save_dir.as_deref(), &result)?;
        }

        Commands::Interactive { code, attach } => {
            let request = RunRequest {
                lang: "python".to_string(),
                code: read_code(&code)?,
                attachments: load_attachments(&attach)?,
            };

            let body = send(client.post(format!("{}/run_interactive", api)).json(&request))?;
            let id = body["id"].as_str().context("Invalid response")?;

            println!("{} {}", "✓ Session:".green(), id);
            println!(
                "  Connect to {} and send {}",
                format!("{}/ws", api.replacen("http", "ws", 1)).cyan(),
                serde_json::json!({ "id": id })
            );
        }

        Commands::Nb(command) => run_notebook_command(&client, api, command)?,

        Commands::Health => {
            let body = send(client.get(format!("{}/health", api)))?;
            let health: HealthResponse =
                serde_json::from_value(body).context("Failed to parse response")?;

            println!("{}", "CES Orchestrator Status".bright_cyan().bold());
            println!("{}", "=".repeat(40).bright_blue());
            println!("{} {}", "Status:".cyan(),
                if health.status == "healthy" {
                    health.status.green()
                } else {
                    health.status.yellow()
                }
            );
            println!("{} {}", "Version:".cyan(), health.version);
            println!("{} {}s", "Uptime:".cyan(), health.uptime_seconds);
            println!("{} {}", "Active Sessions:".cyan(), health.active_sessions);
            if let Some(runtime) = health.runtime_version {
                println!("{} {}", "Runtime:".cyan(), runtime);
            }
        }
    }

    Ok(())
}

fn run_notebook_command(client: &Client, api: &str, command: NbCommands) -> Result<()> {
    match command {
        NbCommands::Create => {
            let body = send(client.get(format!("{}/nb_create", api)))?;
            let id = body["id"].as_str().context("Invalid response")?;
            println!("{} {}", "✓ Notebook:".green(), id);
        }

        NbCommands::List => {
            let body = send(client.get(format!("{}/nb_list", api)))?;
            let notebooks = body["notebooks"].as_array().context("Invalid response")?;

            println!("{}", "Notebooks:".bright_cyan().bold());
            for notebook in notebooks {
                let id = notebook["id"].as_str().unwrap_or("?");
                let state = notebook["state"].as_str().unwrap_or("?");
                let state = if state == "running" {
                    state.green()
                } else {
                    state.yellow()
                };
                println!("  {} {}", id, state);
            }
        }

        NbCommands::Run {
            id,
            code,
            lang,
            attach,
            save_dir,
        } => {
            let request = NotebookRunRequest {
                id,
                lang,
                code: read_code(&code)?,
                attachments: load_attachments(&attach)?,
            };

            let body = send(client.post(format!("{}/nb_run", api)).json(&request))?;
            let result: RunResponse =
                serde_json::from_value(body).context("Failed to parse response")?;

            print_run(&result);
            save_attachments(save_dir.as_deref(), &result)?;
        }

        NbCommands::Pause { id } => notebook_action(client, api, "nb_pause", &id)?,
        NbCommands::Resume { id } => notebook_action(client, api, "nb_resume", &id)?,
        NbCommands::Delete { id } => notebook_action(client, api, "nb_delete", &id)?,
    }

    Ok(())
}

fn notebook_action(client: &Client, api: &str, endpoint: &str, id: &str) -> Result<()> {
    let body = send(
        client
            .post(format!("{}/{}", api, endpoint))
            .json(&IdRequest { id }),
    )?;
    let message = body["result"].as_str().unwrap_or("done");
    println!("{} {}", "✓".green(), message);
    Ok(())
}

/// Send a request and return its JSON body; `{"error": ...}` bodies are failures
fn send(request: RequestBuilder) -> Result<Value> {
    let response = request.send().context("Failed to send request")?;
    let status = response.status();
    let body: Value = response.json().context("Failed to parse response")?;

    if let Some(error) = body.get("error").and_then(Value::as_str) {
        anyhow::bail!("Request failed: {}", error);
    }
    if !status.is_success() {
        anyhow::bail!("Request failed: {}", status);
    }
    Ok(body)
}

/// Read code from file if it starts with @
fn read_code(code: &str) -> Result<String> {
    match code.strip_prefix('@') {
        Some(file_path) => fs::read_to_string(file_path)
            .with_context(|| format!("Failed to read code file: {}", file_path)),
        None => Ok(code.to_string()),
    }
}

fn load_attachments(files: &[PathBuf]) -> Result<Vec<Attachment>> {
    files
        .iter()
        .map(|file| {
            let name = file
                .file_name()
                .and_then(|n| n.to_str())
                .context("Invalid filename")?;
            let content = fs::read(file)
                .with_context(|| format!("Failed to read file: {}", file.display()))?;
            Ok(Attachment {
                name: name.to_string(),
                content: STANDARD.encode(content),
            })
        })
        .collect()
}

fn print_run(result: &RunResponse) {
    println!("{}", "=".repeat(60).bright_blue());
    println!("{} {:.3}s", "Duration:".bright_cyan(), result.execution_time);
    println!("\n{}", "OUTPUT:".bright_green().bold());
    println!("{}", result.result);

    if let Some(files) = result.attachments_out.as_ref().filter(|f| !f.is_empty()) {
        println!("\n{}", "FILES:".bright_green().bold());
        for file in files {
            println!("  📄 {}", file.name);
        }
    }
    println!("{}", "=".repeat(60).bright_blue());
}

fn save_attachments(dir: Option<&Path>, result: &RunResponse) -> Result<()> {
    let (Some(dir), Some(files)) = (dir, result.attachments_out.as_ref()) else {
        return Ok(());
    };

    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

    for file in files {
        // Only the final path component is trusted
        let Some(name) = Path::new(&file.name).file_name() else {
            continue;
        };
        let content = STANDARD
            .decode(&file.content)
            .with_context(|| format!("Invalid content for {}", file.name))?;
        let path = dir.join(name);
        fs::write(&path, &content)
            .with_context(|| format!("Failed to write file: {}", path.display()))?;
        println!("{} {} ({} bytes)", "✓ Saved:".green(), path.display(), content.len());
    }
    Ok(())
}
