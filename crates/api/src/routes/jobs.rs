use axum::routing::{get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Job submission and retrieval routes.
///
/// ```text
/// POST   /convert          -> convert
/// GET    /status/{id}      -> status
/// GET    /download/{id}    -> download
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/convert", post(jobs::convert))
        .route("/status/{id}", get(jobs::status))
        .route("/download/{id}", get(jobs::download))
}
