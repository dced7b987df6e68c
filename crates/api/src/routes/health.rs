use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Number of tracked jobs per status.
    pub jobs: JobCountsResponse,
}

#[derive(Serialize)]
pub struct JobCountsResponse {
    pub waiting: usize,
    pub working: usize,
    pub finished: usize,
}

/// GET /health -- returns service status and job counts.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let counts = state.jobs.counts().await;

    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        jobs: JobCountsResponse {
            waiting: counts.waiting,
            working: counts.working,
            finished: counts.finished,
        },
    })
}

/// Mount health check routes (intended for root level, NOT under `/apiv1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
