//! Locating the renderer binary.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;

use crate::error::BrowserError;

/// Binary names tried, in order, when no explicit path is configured.
pub const DEFAULT_CANDIDATES: &[&str] = &["chromium", "chrome", "google-chrome", "google chrome"];

const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Search `PATH` for the first of [`DEFAULT_CANDIDATES`].
pub fn find_browser_executable() -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    find_in_path(&path, DEFAULT_CANDIDATES)
}

/// Search the directories of a `PATH`-style value for the first candidate
/// name that exists as a file. Candidates are tried in order, each across
/// every directory, before moving to the next.
pub fn find_in_path(path: &OsStr, candidates: &[&str]) -> Option<PathBuf> {
    let dirs: Vec<PathBuf> = std::env::split_paths(path).collect();
    candidates.iter().find_map(|name| {
        dirs.iter()
            .map(|dir| dir.join(name))
            .find(|candidate| candidate.is_file())
    })
}

/// Run `<executable> --version` and return its trimmed output.
///
/// Used at startup to fail fast when the configured renderer is missing or
/// broken.
pub async fn probe_version(executable: &Path) -> Result<String, BrowserError> {
    let output = tokio::time::timeout(
        VERSION_PROBE_TIMEOUT,
        Command::new(executable)
            .arg("--version")
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| {
        BrowserError::LaunchFailed(format!("{} --version timed out", executable.display()))
    })?
    .map_err(|e| BrowserError::LaunchFailed(format!("{}: {e}", executable.display())))?;

    if !output.status.success() {
        return Err(BrowserError::LaunchFailed(format!(
            "{} --version exited with {}",
            executable.display(),
            output.status
        )));
    }

    let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if version.is_empty() {
        return Err(BrowserError::LaunchFailed(format!(
            "{} --version printed nothing",
            executable.display()
        )));
    }
    Ok(version)
}
