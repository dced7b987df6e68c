//! Periodic removal of expired jobs and their PDFs.
//!
//! Expired records are taken out of the store under its lock; the files are
//! deleted afterwards. A missing file is not an error: failed jobs never
//! produced one.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use urlpdf_core::job::looks_like_job_id;
use urlpdf_pipeline::render::{PRINT_TEMP_SUFFIX, WATERMARK_TEMP_SUFFIX};
use urlpdf_pipeline::JobStore;

/// Run the reaper loop until `cancel` is triggered.
pub async fn run(jobs: Arc<JobStore>, interval: Duration, cancel: CancellationToken) {
    tracing::info!(interval_secs = interval.as_secs(), "Job reaper started");

    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Job reaper stopping");
                break;
            }
            _ = ticker.tick() => {
                sweep_expired(&jobs, Utc::now()).await;
            }
        }
    }
}

/// Remove jobs that expired before `now` and delete their output files.
/// Returns the number of jobs removed.
pub async fn sweep_expired(jobs: &JobStore, now: DateTime<Utc>) -> usize {
    let expired = jobs.take_expired(now).await;

    for job in &expired {
        remove_file(&job.output_path).await;
    }

    if expired.is_empty() {
        tracing::trace!("Reaper: nothing expired");
    } else {
        tracing::info!(removed = expired.len(), "Reaper: removed expired jobs");
    }
    expired.len()
}

/// Delete PDFs and render temp files in the output directory that belong to
/// no tracked job, e.g. leftovers from a previous process.
///
/// Files whose names do not look like job output are left alone.
pub async fn sweep_orphans(jobs: &JobStore) -> std::io::Result<usize> {
    let tracked = jobs.tracked_file_names().await;
    let mut entries = tokio::fs::read_dir(jobs.output_dir()).await?;
    let mut removed = 0;

    while let Some(entry) = entries.next_entry().await? {
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        let Some(output_name) = job_output_name(name) else {
            continue;
        };
        if tracked.contains(output_name) || !entry.file_type().await?.is_file() {
            continue;
        }

        tracing::info!(file = name, "Deleting orphaned job file");
        remove_file(&entry.path()).await;
        removed += 1;
    }

    Ok(removed)
}

/// For `<id>.pdf` or one of its temp files, the `<id>.pdf` name it belongs
/// to.
fn job_output_name(name: &str) -> Option<&str> {
    let output = name
        .strip_suffix(PRINT_TEMP_SUFFIX)
        .or_else(|| name.strip_suffix(WATERMARK_TEMP_SUFFIX))
        .unwrap_or(name);
    let stem = output.strip_suffix(".pdf")?;
    looks_like_job_id(stem).then_some(output)
}

async fn remove_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "Deleted job file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to delete job file"),
    }
}
