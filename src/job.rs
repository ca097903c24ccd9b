//! Remote job identifiers, status and records.
//!
//! The remote job state machine:
//!
//! ```text
//!   submit() ──→ Queued ──→ Running ──→ Completed
//!                  │           │
//!                  └───────────┴──→ Failed(reason)
//! ```
//!
//! **Invariants:**
//! - A job never moves back to an earlier status.
//! - Terminal states (`Completed`, `Failed`) are permanent.
//! - `fetch()` is only valid when status is `Completed`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::observable::PauliWord;

/// Backend-assigned identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    /// Wrap a service-issued identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Status reported by the service. `Queued` and `Running` both count as
/// pending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum JobStatus {
    /// Accepted, waiting for the device.
    Queued,
    /// Executing.
    Running,
    /// Counts are ready to fetch.
    Completed,
    /// Job failed with the reason reported by the service.
    Failed(String),
}

impl JobStatus {
    /// Check if the status can no longer change.
    pub fn is_terminal(&self) -> bool {
        !self.is_pending()
    }

    /// Check if the job has not finished yet.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Queued | Self::Running)
    }

    /// Check if counts can be fetched.
    pub fn is_success(&self) -> bool {
        *self == Self::Completed
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => f.write_str("queued"),
            Self::Running => f.write_str("running"),
            Self::Completed => f.write_str("completed"),
            Self::Failed(reason) => write!(f, "failed ({reason})"),
        }
    }
}

/// Everything needed to re-poll and decode one remote job.
///
/// `shots` and `submitted_at` are only known to the process that submitted
/// the job; a record rebuilt from a serialized handle leaves them unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    /// The job identifier.
    pub id: JobId,
    /// Backend target the job was queued on.
    pub target: String,
    /// Number of shots requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shots: Option<u32>,
    /// Time the job was accepted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<DateTime<Utc>>,
    /// Measurement basis whose parity decodes this job's counts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub basis: Option<PauliWord>,
}

impl JobRecord {
    /// Record for a job accepted just now.
    pub fn submitted(id: impl Into<JobId>, target: impl Into<String>, shots: u32) -> Self {
        Self {
            id: id.into(),
            target: target.into(),
            shots: Some(shots),
            submitted_at: Some(Utc::now()),
            basis: None,
        }
    }

    /// Record rebuilt from persisted state.
    pub fn restored(id: impl Into<JobId>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            target: target.into(),
            shots: None,
            submitted_at: None,
            basis: None,
        }
    }

    /// Attach the decoding basis.
    pub fn with_basis(mut self, basis: PauliWord) -> Self {
        self.basis = Some(basis);
        self
    }
}
