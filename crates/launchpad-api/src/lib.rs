//! launchpad-api — REST API for Launchpad.
//!
//! Provides axum route handlers for submitting and inspecting releases.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/releases` | Submit a release |
//! | GET | `/api/v1/releases` | List executions (`?namespace=` filters) |
//! | GET | `/api/v1/releases/:id` | Get an execution with its history |
//! | POST | `/api/v1/releases/:id/abort` | Abort an execution |
//! | GET | `/api/v1/releases/:id/smoke` | Smoke results of an execution |
//! | GET | `/api/v1/artifacts/:id/reports` | Validation reports of an artifact |
//! | GET | `/api/v1/namespaces/:ns/live` | Live version of a namespace |
//! | GET | `/metrics` | Prometheus exposition |

pub mod handlers;

use axum::Router;
use axum::routing::{get, post};
use launchpad_release::Orchestrator;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Orchestrator,
}

/// Build the complete API router (REST + metrics).
pub fn build_router(orchestrator: Orchestrator) -> Router {
    let api_state = ApiState { orchestrator };

    let api_routes = Router::new()
        .route(
            "/releases",
            get(handlers::list_releases).post(handlers::submit_release),
        )
        .route("/releases/{id}", get(handlers::get_release))
        .route("/releases/{id}/abort", post(handlers::abort_release))
        .route("/releases/{id}/smoke", get(handlers::list_smoke_results))
        .route("/artifacts/{id}/reports", get(handlers::list_reports))
        .route("/namespaces/{ns}/live", get(handlers::get_live_version))
        .with_state(api_state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route(
            "/metrics",
            get(handlers::prometheus_metrics).with_state(api_state),
        )
}
