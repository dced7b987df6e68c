use std::sync::Arc;

use urlpdf_pipeline::{JobStore, Scheduler};

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: everything inside is behind an `Arc` or is itself a
/// handle.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration (secret, output directory, timeouts).
    pub config: Arc<ServerConfig>,
    /// Job registry, read directly by the status and download handlers.
    pub jobs: Arc<JobStore>,
    /// Admission control; owns the running render tasks.
    pub scheduler: Scheduler,
}

impl AppState {
    pub fn new(config: Arc<ServerConfig>, scheduler: Scheduler) -> Self {
        Self {
            config,
            jobs: Arc::clone(scheduler.store()),
            scheduler,
        }
    }
}
