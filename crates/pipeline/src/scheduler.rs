//! Admission control for render jobs.
//!
//! Submissions queue as `waiting`; [`Scheduler::try_advance`] promotes the
//! oldest one whenever fewer than `max_concurrent` jobs are `working`, and
//! every finished render triggers another advance to fill its slot.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use urlpdf_core::convert::ConvertRequest;
use urlpdf_core::error::CoreError;

use crate::error::RenderError;
use crate::runner::JobRunner;
use crate::store::{JobClaim, JobSnapshot, JobStore};

#[derive(Clone)]
pub struct Scheduler {
    store: Arc<JobStore>,
    runner: Arc<dyn JobRunner>,
    max_concurrent: usize,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(store: Arc<JobStore>, runner: Arc<dyn JobRunner>, max_concurrent: usize) -> Self {
        Self {
            store,
            runner,
            max_concurrent: max_concurrent.max(1),
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Queue a validated request and try to start it immediately.
    ///
    /// The returned snapshot is the job as queued (`waiting`), even if it
    /// has already been promoted by the time this returns.
    pub async fn submit(&self, request: ConvertRequest) -> Result<JobSnapshot, CoreError> {
        if self.cancel.is_cancelled() {
            return Err(CoreError::Internal(
                "Scheduler is shutting down".to_string(),
            ));
        }

        let job = self.store.insert(request).await;
        tracing::info!(job_id = %job.id.short(), "Job queued");

        self.try_advance().await;
        Ok(job)
    }

    /// Start the oldest waiting job if a slot is free.
    ///
    /// Boxed because completion of the spawned job calls back into this
    /// method.
    pub fn try_advance(&self) -> BoxFuture<'static, ()> {
        let scheduler = self.clone();
        Box::pin(async move {
            if scheduler.cancel.is_cancelled() {
                return;
            }
            let Some(claim) = scheduler.store.claim_next(scheduler.max_concurrent).await else {
                return;
            };

            tracing::debug!(job_id = %claim.id.short(), "Job claimed");
            let worker = scheduler.clone();
            scheduler.tracker.spawn(async move {
                worker.execute(claim).await;
            });
        })
    }

    async fn execute(&self, claim: JobClaim) {
        let started = Instant::now();
        tracing::info!(job_id = %claim.id.short(), url = %claim.request.url, "Render started");

        let run = self.runner.run(&claim.request, &claim.output_path);
        let outcome = match AssertUnwindSafe(run).catch_unwind().await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(panic) => Err(RenderError::Panicked(panic_message(&*panic)).to_string()),
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(()) => tracing::info!(job_id = %claim.id.short(), elapsed_ms, "Render finished"),
            Err(e) => {
                tracing::warn!(job_id = %claim.id.short(), elapsed_ms, error = %e, "Render failed")
            }
        }

        self.store.complete(&claim.id, outcome).await;
        self.try_advance().await;
    }

    /// Number of renders currently running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Stop admitting and starting jobs, then wait up to `grace` for running
    /// renders. Returns `true` if they all completed in time.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.cancel.cancel();
        self.tracker.close();

        let in_flight = self.tracker.len();
        tracing::info!(in_flight, "Scheduler shutting down");

        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => {
                tracing::info!("All renders completed");
                true
            }
            Err(_) => {
                tracing::warn!(
                    in_flight = self.tracker.len(),
                    grace_secs = grace.as_secs(),
                    "Renders still running after shutdown grace period",
                );
                false
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
