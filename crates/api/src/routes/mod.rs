pub mod health;
pub mod jobs;

use axum::Router;

use crate::state::AppState;

/// Build the `/apiv1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /convert                 submit a signed render request (POST)
/// /status/{id}             job status (GET)
/// /download/{id}           finished PDF, `?download` for an attachment (GET)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().merge(jobs::router())
}
