//! CES orchestrator - code execution sandboxes behind a small HTTP API
//!
//! This is the main entry point of the service. It connects to the
//! container runtime and serves the run, notebook and interactive endpoints.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::HeaderName;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use ces_orchestrator::api::create_router;
use ces_orchestrator::config::AppConfig;
use ces_orchestrator::container::{ContainerRuntime, DockerRuntime};
use ces_orchestrator::logging::init_logging;
use ces_orchestrator::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = AppConfig::load()?;

    // Initialize logging
    init_logging(&config.log_level, config.log_dir.as_deref())?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting CES orchestrator"
    );

    if ces_orchestrator::metrics::init_metrics() {
        info!("Prometheus metrics initialized");
    } else {
        warn!("Prometheus recorder unavailable, /metrics will answer 503");
    }

    tokio::fs::create_dir_all(&config.data_dir)
        .await
        .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;

    let runtime: Arc<dyn ContainerRuntime> =
        Arc::new(DockerRuntime::connect(config.docker_socket.as_deref())?);
    match runtime.version().await {
        Some(version) => info!(%version, "Container runtime connected"),
        None => warn!("Container runtime not reachable, sessions will fail until it is"),
    }

    let state = Arc::new(AppState::new(config.clone(), runtime));

    // Build the router with all routes and middleware
    let x_request_id = HeaderName::from_static("x-request-id");
    let app = create_router(state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
        .layer(PropagateRequestIdLayer::new(x_request_id))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Listening on");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down...");

    // Interactive sessions die with the server; notebooks are left for the next start
    state.interactive.close_all().await;

    info!("CES orchestrator stopped");
    Ok(())
}

/// Handle shutdown signals gracefully
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
