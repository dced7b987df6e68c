//! One headless renderer process and its debugging channel.
//!
//! A session owns the child process, the port reservation it was started
//! on, and the connected [`CommandChannel`]. Opening a session only
//! succeeds once the renderer has shown a blank page with no navigation
//! history; anything else is treated as a failed launch.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::process::{Child, Command};

use crate::channel::{CommandChannel, DEFAULT_CALL_TIMEOUT};
use crate::error::BrowserError;
use crate::port::PortReservation;

/// How long `Browser.close` gets to be acknowledged before the process is
/// killed.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Process and timing parameters for starting a renderer.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub executable: PathBuf,
    pub crash_dump_dir: PathBuf,
    /// Total time to wait for the discovery endpoint to answer.
    pub startup_timeout: Duration,
    /// Pause between discovery polls.
    pub poll_interval: Duration,
    /// Per-request timeout for a discovery poll.
    pub discovery_request_timeout: Duration,
    pub connect_timeout: Duration,
    pub call_timeout: Duration,
}

impl LaunchOptions {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            crash_dump_dir: std::env::temp_dir(),
            startup_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(250),
            discovery_request_timeout: Duration::from_millis(1200),
            connect_timeout: Duration::from_secs(20),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

/// A running renderer with an open debugging channel.
#[derive(Debug)]
pub struct BrowserSession {
    child: Child,
    channel: CommandChannel,
    reservation: PortReservation,
}

impl BrowserSession {
    /// Start the renderer on the reserved port and connect to it.
    ///
    /// On any failure the process is killed and the reservation released
    /// before the error is returned.
    pub async fn open(
        options: &LaunchOptions,
        reservation: PortReservation,
    ) -> Result<Self, BrowserError> {
        let port = reservation.port();
        let args = launch_args(port, &options.crash_dump_dir, running_as_root());

        let mut child = Command::new(&options.executable)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                BrowserError::LaunchFailed(format!("{}: {e}", options.executable.display()))
            })?;

        tracing::debug!(port, pid = child.id(), "Browser process started");

        match connect(&mut child, port, options).await {
            Ok(channel) => {
                tracing::info!(port, "Browser session ready");
                Ok(Self {
                    child,
                    channel,
                    reservation,
                })
            }
            Err(e) => {
                tracing::warn!(port, error = %e, "Browser session failed to open");
                terminate(&mut child).await;
                drop(reservation);
                Err(e)
            }
        }
    }

    pub fn port(&self) -> u16 {
        self.reservation.port()
    }

    /// Issue a protocol command on the session's channel.
    pub async fn call(&mut self, method: &str, params: Value) -> Result<Value, BrowserError> {
        self.channel.call(method, params).await
    }

    /// Ask the renderer to exit, then make sure it has.
    ///
    /// Never fails: every step is best effort, and the port is released
    /// once the process is gone.
    pub async fn close(self) {
        let Self {
            mut child,
            mut channel,
            reservation,
        } = self;
        let port = reservation.port();

        match tokio::time::timeout(CLOSE_GRACE, channel.call("Browser.close", json!({}))).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::debug!(port, error = %e, "Browser.close failed"),
            Err(_) => tracing::debug!(port, "Browser.close not acknowledged"),
        }
        channel.close().await;

        if tokio::time::timeout(CLOSE_GRACE, child.wait()).await.is_err() {
            terminate(&mut child).await;
        }

        reservation.release();
        tracing::debug!(port, "Browser session closed");
    }
}

async fn connect(
    child: &mut Child,
    port: u16,
    options: &LaunchOptions,
) -> Result<CommandChannel, BrowserError> {
    let ws_url = wait_for_debugger_url(child, port, options).await?;

    let mut channel = CommandChannel::connect(&ws_url, options.connect_timeout)
        .await?
        .with_call_timeout(options.call_timeout);

    let history = channel
        .call("Page.getNavigationHistory", json!({}))
        .await?;
    if let Err(e) = verify_clean_history(&history) {
        channel.close().await;
        return Err(e);
    }

    Ok(channel)
}

/// Outcome of one poll of the discovery endpoint.
#[derive(Debug, PartialEq, Eq)]
enum Discovery {
    NotReady,
    Ready(String),
}

/// Poll `http://127.0.0.1:<port>/json` until it lists a target with a
/// WebSocket URL, the process exits, or the startup timeout elapses.
async fn wait_for_debugger_url(
    child: &mut Child,
    port: u16,
    options: &LaunchOptions,
) -> Result<String, BrowserError> {
    let client = reqwest::Client::builder()
        .timeout(options.discovery_request_timeout)
        .build()
        .map_err(|e| BrowserError::LaunchFailed(format!("HTTP client: {e}")))?;
    let url = format!("http://127.0.0.1:{port}/json");
    let deadline = tokio::time::Instant::now() + options.startup_timeout;

    loop {
        if let Some(status) = child.try_wait()? {
            return Err(BrowserError::LaunchFailed(format!(
                "browser exited during startup ({status})"
            )));
        }

        if let Discovery::Ready(ws_url) = poll_discovery(&client, &url).await? {
            tracing::debug!(port, ws_url = %ws_url, "Debugger endpoint discovered");
            return Ok(ws_url);
        }

        if tokio::time::Instant::now() + options.poll_interval > deadline {
            return Err(BrowserError::ConnectTimeout(format!(
                "no debugger endpoint on port {port} after {:?}",
                options.startup_timeout
            )));
        }
        tokio::time::sleep(options.poll_interval).await;
    }
}

async fn poll_discovery(client: &reqwest::Client, url: &str) -> Result<Discovery, BrowserError> {
    let response = match client.get(url).send().await {
        Ok(response) => response,
        Err(e) if e.is_connect() || e.is_timeout() => return Ok(Discovery::NotReady),
        Err(e) => {
            return Err(BrowserError::LaunchFailed(format!(
                "discovery request failed: {e}"
            )))
        }
    };

    if !response.status().is_success() {
        return Ok(Discovery::NotReady);
    }

    // A half-started renderer may drop the connection mid-body.
    match response.text().await {
        Ok(body) => classify_discovery(&body),
        Err(_) => Ok(Discovery::NotReady),
    }
}

/// Interpret a discovery response body.
///
/// An unparsable body or an empty target list means "not ready yet". A
/// target without a WebSocket URL is a renderer we cannot drive.
fn classify_discovery(body: &str) -> Result<Discovery, BrowserError> {
    let Ok(targets) = serde_json::from_str::<Value>(body) else {
        return Ok(Discovery::NotReady);
    };
    let Some(first) = targets.as_array().and_then(|targets| targets.first()) else {
        return Ok(Discovery::NotReady);
    };

    match first.get("webSocketDebuggerUrl").and_then(Value::as_str) {
        Some(ws_url) if !ws_url.is_empty() => Ok(Discovery::Ready(ws_url.to_string())),
        _ => Err(BrowserError::UnexpectedState(
            "debug target has no webSocketDebuggerUrl".to_string(),
        )),
    }
}

/// Accept only a freshly started tab: no entries at all, or exactly one
/// blank entry.
fn verify_clean_history(history: &Value) -> Result<(), BrowserError> {
    let index = history.get("currentIndex").and_then(Value::as_i64);
    let entries = history.get("entries").and_then(Value::as_array);

    let clean = match (index, entries) {
        (Some(-1), Some(entries)) => entries.is_empty(),
        (Some(0), Some(entries)) => {
            entries.len() == 1
                && matches!(
                    entries[0].get("url").and_then(Value::as_str),
                    Some("about:blank") | Some("")
                )
        }
        _ => false,
    };

    if clean {
        Ok(())
    } else {
        tracing::warn!(history = %history, "Browser started with navigation history");
        Err(BrowserError::UnexpectedState(
            "This browser has navigation history".to_string(),
        ))
    }
}

fn launch_args(port: u16, crash_dump_dir: &std::path::Path, as_root: bool) -> Vec<String> {
    let mut args = vec![
        "--headless".to_string(),
        format!("--crash-dumps-dir={}", crash_dump_dir.display()),
        "--single-process".to_string(),
        format!("--remote-debugging-port={port}"),
    ];
    if as_root {
        args.push("--no-sandbox".to_string());
    }
    args
}

#[cfg(unix)]
fn running_as_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
fn running_as_root() -> bool {
    false
}

async fn terminate(child: &mut Child) {
    if let Err(e) = child.kill().await {
        tracing::debug!(error = %e, "Killing browser process failed");
    }
}
