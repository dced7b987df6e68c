//! In-memory job registry.
//!
//! One mutex guards the whole collection. Every state transition happens
//! inside a single critical section and no lock is held across I/O.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use tokio::sync::Mutex;
use urlpdf_core::convert::ConvertRequest;
use urlpdf_core::error::CoreError;
use urlpdf_core::job::{JobId, JobStatus};

/// A job record as held by the store.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub request: ConvertRequest,
    pub status: JobStatus,
    /// Set at most once, before the job becomes `Finished`.
    pub error_msg: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// `<output_dir>/<id>.pdf`; only exists on disk after a successful render.
    pub output_path: PathBuf,
}

/// Read-only view of a job handed out to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSnapshot {
    pub id: JobId,
    pub status: JobStatus,
    pub error_msg: Option<String>,
    pub file_name: Option<String>,
    pub output_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<&Job> for JobSnapshot {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            status: job.status,
            error_msg: job.error_msg.clone(),
            file_name: job.request.file_name.clone(),
            output_path: job.output_path.clone(),
            created_at: job.created_at,
            expires_at: job.expires_at,
        }
    }
}

/// What a runner needs to execute a job it was handed.
#[derive(Debug, Clone)]
pub struct JobClaim {
    pub id: JobId,
    pub request: ConvertRequest,
    pub output_path: PathBuf,
}

/// A job removed by [`JobStore::take_expired`].
#[derive(Debug, Clone)]
pub struct ExpiredJob {
    pub id: JobId,
    pub output_path: PathBuf,
}

/// Number of jobs per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobCounts {
    pub waiting: usize,
    pub working: usize,
    pub finished: usize,
}

pub struct JobStore {
    jobs: Mutex<IndexMap<JobId, Job>>,
    output_dir: PathBuf,
    retention: chrono::Duration,
}

impl JobStore {
    /// Jobs write to `output_dir` and expire `retention` after creation.
    pub fn new(output_dir: impl Into<PathBuf>, retention: chrono::Duration) -> Self {
        Self {
            jobs: Mutex::new(IndexMap::new()),
            output_dir: output_dir.into(),
            retention,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Register a new `waiting` job with a fresh unique id.
    pub async fn insert(&self, request: ConvertRequest) -> JobSnapshot {
        let mut jobs = self.jobs.lock().await;

        let id = loop {
            let candidate = JobId::generate();
            if !jobs.contains_key(&candidate) {
                break candidate;
            }
        };

        let now = Utc::now();
        let job = Job {
            output_path: self.output_dir.join(id.file_name()),
            id: id.clone(),
            request,
            status: JobStatus::Waiting,
            error_msg: None,
            created_at: now,
            expires_at: now + self.retention,
        };
        let snapshot = JobSnapshot::from(&job);
        jobs.insert(id, job);
        snapshot
    }

    pub async fn status(&self, id: &JobId) -> Result<JobSnapshot, CoreError> {
        self.jobs
            .lock()
            .await
            .get(id)
            .map(JobSnapshot::from)
            .ok_or_else(|| CoreError::NotFound {
                entity: "Job",
                id: id.short().to_string(),
            })
    }

    /// Promote the oldest `waiting` job to `working`, unless `max_working`
    /// jobs are already running.
    pub async fn claim_next(&self, max_working: usize) -> Option<JobClaim> {
        let mut jobs = self.jobs.lock().await;

        let working = jobs
            .values()
            .filter(|job| job.status == JobStatus::Working)
            .count();
        if working >= max_working {
            return None;
        }

        let job = jobs
            .values_mut()
            .find(|job| job.status == JobStatus::Waiting)?;
        job.status = JobStatus::Working;

        Some(JobClaim {
            id: job.id.clone(),
            request: job.request.clone(),
            output_path: job.output_path.clone(),
        })
    }

    /// Record a job's outcome and mark it `finished`.
    ///
    /// Returns `false` if the job is gone or was not `working`.
    pub async fn complete(&self, id: &JobId, outcome: Result<(), String>) -> bool {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get_mut(id) else {
            return false;
        };
        if !job.status.can_transition_to(JobStatus::Finished) {
            tracing::warn!(job_id = %id.short(), status = %job.status, "Ignoring completion");
            return false;
        }

        if let Err(msg) = outcome {
            if job.error_msg.is_none() {
                job.error_msg = Some(msg);
            }
        }
        job.status = JobStatus::Finished;
        true
    }

    /// Remove every job whose expiry is before `now`. Jobs still `working`
    /// are kept until their render completes.
    pub async fn take_expired(&self, now: DateTime<Utc>) -> Vec<ExpiredJob> {
        let mut removed = Vec::new();
        self.jobs.lock().await.retain(|_, job| {
            let expired = job.expires_at < now && job.status != JobStatus::Working;
            if expired {
                removed.push(ExpiredJob {
                    id: job.id.clone(),
                    output_path: job.output_path.clone(),
                });
            }
            !expired
        });
        removed
    }

    /// Output file names (`<id>.pdf`) of every job currently tracked.
    pub async fn tracked_file_names(&self) -> HashSet<String> {
        self.jobs
            .lock()
            .await
            .keys()
            .map(JobId::file_name)
            .collect()
    }

    pub async fn counts(&self) -> JobCounts {
        let jobs = self.jobs.lock().await;
        let mut counts = JobCounts::default();
        for job in jobs.values() {
            match job.status {
                JobStatus::Waiting => counts.waiting += 1,
                JobStatus::Working => counts.working += 1,
                JobStatus::Finished => counts.finished += 1,
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use urlpdf_core::job::JOB_ID_LENGTH;

    use super::*;

    fn store() -> JobStore {
        JobStore::new("/srv/pdf", chrono::Duration::seconds(1000))
    }

    fn request(n: usize) -> ConvertRequest {
        ConvertRequest::for_url(format!("https://example.com/{n}"))
    }

    #[tokio::test]
    async fn insert_creates_waiting_job() {
        let store = store();
        let job = store.insert(request(0)).await;

        assert_eq!(job.status, JobStatus::Waiting);
        assert_eq!(job.error_msg, None);
        assert_eq!(job.id.as_str().len(), JOB_ID_LENGTH);
        assert_eq!(
            job.output_path,
            PathBuf::from(format!("/srv/pdf/{}.pdf", job.id))
        );
        assert_eq!(job.expires_at - job.created_at, chrono::Duration::seconds(1000));
    }

    #[tokio::test]
    async fn ids_are_unique() {
        let store = store();
        let mut seen = HashSet::new();
        for n in 0..50 {
            assert!(seen.insert(store.insert(request(n)).await.id));
        }
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        assert_matches!(
            store().status(&JobId::from_raw("NOPE")).await,
            Err(CoreError::NotFound { entity: "Job", .. })
        );
    }

    #[tokio::test]
    async fn claims_are_fifo_and_capped() {
        let store = store();
        let first = store.insert(request(1)).await;
        let second = store.insert(request(2)).await;
        let third = store.insert(request(3)).await;

        assert_eq!(store.claim_next(2).await.unwrap().id, first.id);
        assert_eq!(store.claim_next(2).await.unwrap().id, second.id);
        assert!(store.claim_next(2).await.is_none());
        assert_eq!(store.status(&third.id).await.unwrap().status, JobStatus::Waiting);

        assert!(store.complete(&first.id, Ok(())).await);
        let claim = store.claim_next(2).await.unwrap();
        assert_eq!(claim.id, third.id);
        assert_eq!(claim.request.url, "https://example.com/3");
    }

    #[tokio::test]
    async fn claim_with_nothing_waiting_is_none() {
        assert!(store().claim_next(5).await.is_none());
    }

    #[tokio::test]
    async fn failure_records_error_once() {
        let store = store();
        let job = store.insert(request(0)).await;
        store.claim_next(1).await.unwrap();

        assert!(store.complete(&job.id, Err("first".into())).await);
        assert!(!store.complete(&job.id, Err("second".into())).await);

        let snapshot = store.status(&job.id).await.unwrap();
        assert_eq!(snapshot.status, JobStatus::Finished);
        assert_eq!(snapshot.error_msg.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn waiting_job_cannot_complete() {
        let store = store();
        let job = store.insert(request(0)).await;
        assert!(!store.complete(&job.id, Ok(())).await);
        assert_eq!(store.status(&job.id).await.unwrap().status, JobStatus::Waiting);
    }

    #[tokio::test]
    async fn expired_jobs_are_removed_except_running_ones() {
        let store = store();
        let done = store.insert(request(0)).await;
        let running = store.insert(request(1)).await;
        let waiting = store.insert(request(2)).await;
        store.claim_next(5).await.unwrap();
        store.claim_next(5).await.unwrap();
        store.complete(&done.id, Ok(())).await;
        assert_eq!(store.status(&waiting.id).await.unwrap().status, JobStatus::Waiting);

        let later = Utc::now() + chrono::Duration::seconds(2000);
        let expired: Vec<JobId> = store
            .take_expired(later)
            .await
            .into_iter()
            .map(|e| e.id)
            .collect();

        assert_eq!(expired, vec![done.id.clone(), waiting.id.clone()]);
        assert!(store.status(&done.id).await.is_err());
        assert!(store.status(&waiting.id).await.is_err());
        assert!(store.status(&running.id).await.is_ok());
    }

    #[tokio::test]
    async fn nothing_expires_early() {
        let store = store();
        store.insert(request(0)).await;
        assert!(store.take_expired(Utc::now()).await.is_empty());
        assert_eq!(store.counts().await.waiting, 1);
    }

    #[tokio::test]
    async fn counts_and_tracked_names() {
        let store = store();
        let a = store.insert(request(0)).await;
        store.insert(request(1)).await;
        store.claim_next(5).await.unwrap();
        store.complete(&a.id, Err("boom".into())).await;

        assert_eq!(
            store.counts().await,
            JobCounts {
                waiting: 1,
                working: 0,
                finished: 1
            }
        );
        assert!(store.tracked_file_names().await.contains(&a.id.file_name()));
        assert_eq!(store.tracked_file_names().await.len(), 2);
    }
}
