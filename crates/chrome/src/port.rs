//! Debugging port allocation.
//!
//! Several render jobs may start at the same moment, in this process or in
//! a sibling worker sharing the host, so "is this port free?" is not enough.
//! A candidate port is first claimed by atomically creating a marker file
//! (create-new semantics), then probed with a TCP connect. The marker stays
//! on disk for as long as the [`PortReservation`] lives.

use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use rand::Rng;
use tokio::net::TcpStream;

use crate::error::BrowserError;

/// First port of the scan range.
pub const DEFAULT_RANGE_START: u16 = 9000;

/// Scanning stops before reaching this port.
pub const DEFAULT_RANGE_END: u16 = 9999;

/// Width of the window the randomised starting port is drawn from.
pub const DEFAULT_RANDOM_SPAN: u16 = 500;

/// Upper bound on a single connect probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

const MARKER_PREFIX: &str = "urlpdf-port-";

/// Result of probing a candidate port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Probe {
    Free,
    Busy,
}

/// Hands out debugging ports guarded by marker files.
#[derive(Debug, Clone)]
pub struct PortAllocator {
    marker_dir: PathBuf,
    range_start: u16,
    range_end: u16,
    random_span: u16,
    probe_timeout: Duration,
}

impl PortAllocator {
    /// Allocator using the default `9000..9999` range with markers in
    /// `marker_dir`.
    pub fn new(marker_dir: impl Into<PathBuf>) -> Self {
        Self {
            marker_dir: marker_dir.into(),
            range_start: DEFAULT_RANGE_START,
            range_end: DEFAULT_RANGE_END,
            random_span: DEFAULT_RANDOM_SPAN,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    /// Restrict scanning to `start..end`, with the first candidate drawn
    /// from `start..start + random_span`.
    pub fn with_range(mut self, start: u16, end: u16, random_span: u16) -> Self {
        self.range_start = start;
        self.range_end = end;
        self.random_span = random_span;
        self
    }

    /// Reserve a free port.
    ///
    /// Starts from a randomised offset so concurrent callers rarely contend
    /// on their first candidate, then walks upward until the end of the
    /// range.
    pub async fn acquire(&self) -> Result<PortReservation, BrowserError> {
        let offset = if self.random_span == 0 {
            0
        } else {
            rand::rng().random_range(0..self.random_span)
        };
        let mut port = self.range_start.saturating_add(offset);

        while port < self.range_end {
            let marker = self.marker_path(port);
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&marker)
                .await
            {
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    port += 1;
                    continue;
                }
                Err(e) => return Err(BrowserError::Io(e)),
            }

            let reservation = PortReservation {
                port,
                marker: Some(marker),
            };
            match probe(port, self.probe_timeout).await {
                Probe::Free => {
                    tracing::debug!(port, "Reserved debugging port");
                    return Ok(reservation);
                }
                Probe::Busy => {
                    reservation.release();
                    port += 1;
                }
            }
        }

        tracing::warn!(
            range_start = self.range_start,
            range_end = self.range_end,
            "No free debugging port found",
        );
        Err(BrowserError::ResourceExhausted)
    }

    fn marker_path(&self, port: u16) -> PathBuf {
        self.marker_dir.join(format!("{MARKER_PREFIX}{port}.lock"))
    }
}

/// Check whether anything listens on `127.0.0.1:port`.
///
/// Only "connection refused" counts as free; a successful connect or any
/// other outcome (timeout, unreachable, ...) counts as busy.
async fn probe(port: u16, timeout: Duration) -> Probe {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => Probe::Free,
        Ok(Ok(_)) => Probe::Busy,
        Ok(Err(e)) => {
            tracing::debug!(port, error = %e, "Port probe failed, treating as busy");
            Probe::Busy
        }
        Err(_) => Probe::Busy,
    }
}

/// A reserved debugging port.
///
/// The marker file is removed exactly once: by [`release`](Self::release),
/// or on drop if `release` was never called.
#[derive(Debug)]
pub struct PortReservation {
    port: u16,
    marker: Option<PathBuf>,
}

impl PortReservation {
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Remove the marker file, making the port available to other callers.
    pub fn release(mut self) {
        self.remove_marker();
    }

    fn remove_marker(&mut self) {
        if let Some(marker) = self.marker.take() {
            match std::fs::remove_file(&marker) {
                Ok(()) => tracing::debug!(port = self.port, "Released debugging port"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(port = self.port, error = %e, "Failed to remove port marker");
                }
            }
        }
    }
}

impl Drop for PortReservation {
    fn drop(&mut self) {
        self.remove_marker();
    }
}
