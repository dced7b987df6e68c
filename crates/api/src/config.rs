use std::path::PathBuf;
use std::time::Duration;

/// Retention is clamped to ten years so expiry timestamps cannot overflow.
const MAX_JOB_RETENTION_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Server configuration loaded from environment variables.
///
/// Everything except `WORKER_SECRET` has a default suitable for local
/// development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8080`).
    pub port: u16,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// How long shutdown waits for in-flight renders (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// Shared secret for request signatures.
    pub worker_secret: String,
    /// Explicit renderer binary; `None` means search `PATH`.
    pub chrome_path: Option<PathBuf>,
    /// Where finished PDFs are written (default: `./pdf`).
    pub output_dir: PathBuf,
    /// Seconds a job is kept after submission (default: `1000`).
    pub job_retention_secs: u64,
    /// Maximum renders running at once (default: `20`).
    pub max_concurrent_jobs: usize,
    /// Delay between navigation and printing in ms (default: `6000`).
    pub page_settle_ms: u64,
    /// Seconds between reaper sweeps (default: `30`).
    pub reaper_interval_secs: u64,
    /// Watermark label; empty disables watermarking.
    pub watermark_text: String,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default              |
    /// |-------------------------|----------------------|
    /// | `HOST`                  | `0.0.0.0`            |
    /// | `PORT`                  | `8080`               |
    /// | `REQUEST_TIMEOUT_SECS`  | `30`                 |
    /// | `SHUTDOWN_TIMEOUT_SECS` | `30`                 |
    /// | `WORKER_SECRET`         | required             |
    /// | `CHROME_PATH`           | search `PATH`        |
    /// | `OUTPUT_DIR`            | `./pdf`              |
    /// | `JOB_RETENTION_SECS`    | `1000`               |
    /// | `MAX_CONCURRENT_JOBS`   | `20`                 |
    /// | `PAGE_SETTLE_MS`        | `6000`               |
    /// | `REAPER_INTERVAL_SECS`  | `30`                 |
    /// | `WATERMARK_TEXT`        | `Rendered by urlpdf` |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".into())
            .parse()
            .expect("PORT must be a valid u16");

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let shutdown_timeout_secs: u64 = std::env::var("SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("SHUTDOWN_TIMEOUT_SECS must be a valid u64");

        let worker_secret = std::env::var("WORKER_SECRET").expect("WORKER_SECRET must be set");
        assert!(
            !worker_secret.is_empty(),
            "WORKER_SECRET must not be empty"
        );

        let chrome_path = std::env::var_os("CHROME_PATH")
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);

        let output_dir = std::env::var_os("OUTPUT_DIR")
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./pdf"));

        let job_retention_secs: u64 = std::env::var("JOB_RETENTION_SECS")
            .unwrap_or_else(|_| "1000".into())
            .parse()
            .expect("JOB_RETENTION_SECS must be a valid u64");

        let max_concurrent_jobs: usize = std::env::var("MAX_CONCURRENT_JOBS")
            .unwrap_or_else(|_| "20".into())
            .parse()
            .expect("MAX_CONCURRENT_JOBS must be a valid usize");

        let page_settle_ms: u64 = std::env::var("PAGE_SETTLE_MS")
            .unwrap_or_else(|_| "6000".into())
            .parse()
            .expect("PAGE_SETTLE_MS must be a valid u64");

        let reaper_interval_secs: u64 = std::env::var("REAPER_INTERVAL_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REAPER_INTERVAL_SECS must be a valid u64");

        let watermark_text =
            std::env::var("WATERMARK_TEXT").unwrap_or_else(|_| "Rendered by urlpdf".into());

        Self {
            host,
            port,
            request_timeout_secs,
            shutdown_timeout_secs,
            worker_secret,
            chrome_path,
            output_dir,
            job_retention_secs,
            max_concurrent_jobs,
            page_settle_ms,
            reaper_interval_secs,
            watermark_text,
        }
    }

    pub fn job_retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.job_retention_secs.min(MAX_JOB_RETENTION_SECS) as i64)
    }

    pub fn page_settle_delay(&self) -> Duration {
        Duration::from_millis(self.page_settle_ms)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs.max(1))
    }

    /// `None` when watermarking is disabled.
    pub fn watermark_label(&self) -> Option<String> {
        let text = self.watermark_text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }
}
