//! Job identity and lifecycle status.
//!
//! A job id is an opaque, high-entropy token handed to the client at
//! submission time. It doubles as the output file stem, so it is restricted
//! to characters that are safe in a file name.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Number of characters in a generated job id.
pub const JOB_ID_LENGTH: usize = 128;

/// Alphabet used for job ids: uppercase ASCII letters and digits.
const JOB_ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Number of id characters written to logs.
const LOG_PREFIX_LENGTH: usize = 12;

// ---------------------------------------------------------------------------
// JobId
// ---------------------------------------------------------------------------

/// Unique, unguessable identifier of a render job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generate a fresh random id.
    ///
    /// Uniqueness is not guaranteed here; the job store retries on the
    /// (astronomically unlikely) collision.
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let id: String = (0..JOB_ID_LENGTH)
            .map(|_| JOB_ID_ALPHABET[rng.random_range(0..JOB_ID_ALPHABET.len())] as char)
            .collect();
        Self(id)
    }

    /// Wrap an externally supplied string (e.g. a URL path segment).
    ///
    /// No validation happens here: an id that was never generated simply
    /// won't be found in the store.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix used in log lines so full tokens never hit the logs.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(LOG_PREFIX_LENGTH)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }

    /// File name of the job's output PDF (`<id>.pdf`).
    pub fn file_name(&self) -> String {
        format!("{}.pdf", self.0)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether `stem` has the shape of a generated job id.
///
/// Used by the startup sweep to recognise output files left behind by a
/// previous process.
pub fn looks_like_job_id(stem: &str) -> bool {
    stem.len() == JOB_ID_LENGTH && stem.bytes().all(|b| JOB_ID_ALPHABET.contains(&b))
}

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a job.
///
/// Transitions are strictly `Waiting -> Working -> Finished`. Failure is
/// not a separate state: a failed job is `Finished` with an error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Waiting,
    Working,
    Finished,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Working => "working",
            JobStatus::Finished => "finished",
        }
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Waiting, JobStatus::Working) | (JobStatus::Working, JobStatus::Finished)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
