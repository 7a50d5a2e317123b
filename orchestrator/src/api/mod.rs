//! HTTP surface of the orchestrator
//!
//! Every route is listed in [`Endpoint`]; anything else falls through to
//! [`handlers::invalid_route`], which answers with `{"error": ...}`.

mod error;
mod extract;
mod handlers;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::Method,
    routing::{get, post, MethodRouter},
    Router,
};

use crate::AppState;

pub use error::{ApiError, INTERNAL_ERROR_MESSAGE};
pub use extract::JsonBody;

/// The closed set of request endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    NbCreate,
    NbList,
    NbRun,
    NbDelete,
    NbPause,
    NbResume,
    Run,
    RunInteractive,
}

impl Endpoint {
    pub const ALL: [Endpoint; 8] = [
        Endpoint::NbCreate,
        Endpoint::NbList,
        Endpoint::NbRun,
        Endpoint::NbDelete,
        Endpoint::NbPause,
        Endpoint::NbResume,
        Endpoint::Run,
        Endpoint::RunInteractive,
    ];

    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::NbCreate => "/nb_create",
            Endpoint::NbList => "/nb_list",
            Endpoint::NbRun => "/nb_run",
            Endpoint::NbDelete => "/nb_delete",
            Endpoint::NbPause => "/nb_pause",
            Endpoint::NbResume => "/nb_resume",
            Endpoint::Run => "/run",
            Endpoint::RunInteractive => "/run_interactive",
        }
    }

    pub fn method(&self) -> Method {
        match self {
            Endpoint::NbCreate | Endpoint::NbList => Method::GET,
            _ => Method::POST,
        }
    }

    fn handler(&self) -> MethodRouter<Arc<AppState>> {
        use handlers::{interactive, notebook, run};

        let router = match self {
            Endpoint::NbCreate => get(notebook::nb_create),
            Endpoint::NbList => get(notebook::nb_list),
            Endpoint::NbRun => post(notebook::nb_run),
            Endpoint::NbDelete => post(notebook::nb_delete),
            Endpoint::NbPause => post(notebook::nb_pause),
            Endpoint::NbResume => post(notebook::nb_resume),
            Endpoint::Run => post(run::run),
            Endpoint::RunInteractive => post(interactive::run_interactive),
        };
        router.fallback(handlers::invalid_route)
    }
}

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let body_limit = DefaultBodyLimit::max(state.config.limits.max_body_bytes);
    let router = Endpoint::ALL
        .iter()
        .fold(Router::new(), |router, endpoint| {
            router.route(endpoint.path(), endpoint.handler())
        });

    router
        .route(
            "/health",
            get(handlers::health::health_check).fallback(handlers::invalid_route),
        )
        .route(
            "/metrics",
            get(crate::metrics::metrics_handler).fallback(handlers::invalid_route),
        )
        .route(
            "/ws",
            get(handlers::interactive::ws_handler).fallback(handlers::invalid_route),
        )
        .fallback(handlers::invalid_route)
        .layer(body_limit)
        .with_state(state)
}
