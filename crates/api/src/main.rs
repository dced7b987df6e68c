use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use urlpdf_api::background;
use urlpdf_api::config::ServerConfig;
use urlpdf_api::router::build_app_router;
use urlpdf_api::state::AppState;
use urlpdf_chrome::executable::{find_browser_executable, probe_version};
use urlpdf_chrome::{LaunchOptions, PortAllocator};
use urlpdf_pipeline::{JobStore, RenderConfig, RenderPipeline, Scheduler};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "urlpdf_api=debug,urlpdf_pipeline=debug,urlpdf_chrome=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Output directory ---
    tokio::fs::create_dir_all(&config.output_dir)
        .await
        .expect("Failed to create output directory");
    tracing::info!(output_dir = %config.output_dir.display(), "Output directory ready");

    // --- Browser ---
    let chrome_path = config
        .chrome_path
        .clone()
        .or_else(find_browser_executable)
        .expect("No browser found: set CHROME_PATH or install chromium");
    let version = probe_version(&chrome_path)
        .await
        .expect("Browser version check failed");
    tracing::info!(path = %chrome_path.display(), %version, "Found browser");

    // --- Jobs ---
    let jobs = Arc::new(JobStore::new(&config.output_dir, config.job_retention()));

    match background::reaper::sweep_orphans(&jobs).await {
        Ok(removed) => tracing::info!(removed, "Startup sweep complete"),
        Err(e) => tracing::warn!(error = %e, "Startup sweep failed"),
    }

    let mut render_config = RenderConfig::new(LaunchOptions::new(chrome_path));
    render_config.settle_delay = config.page_settle_delay();
    render_config.watermark_label = config.watermark_label();
    let pipeline = RenderPipeline::new(PortAllocator::new(std::env::temp_dir()), render_config);

    let scheduler = Scheduler::new(
        Arc::clone(&jobs),
        Arc::new(pipeline),
        config.max_concurrent_jobs,
    );
    tracing::info!(max_concurrent = config.max_concurrent_jobs, "Scheduler ready");

    // --- Reaper ---
    let reaper_cancel = CancellationToken::new();
    let reaper_handle = tokio::spawn(background::reaper::run(
        Arc::clone(&jobs),
        config.reaper_interval(),
        reaper_cancel.clone(),
    ));

    // --- App state & router ---
    let config = Arc::new(config);
    let state = AppState::new(Arc::clone(&config), scheduler.clone());
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    reaper_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), reaper_handle).await;
    tracing::info!("Job reaper stopped");

    scheduler
        .shutdown(Duration::from_secs(config.shutdown_timeout_secs))
        .await;

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
