//! Handle and registry error types.
//!
//! Errors are categorized by recoverability:
//!
//! | Category | Variants | Recovery |
//! |----------|----------|----------|
//! | **Recoverable** | `RetrievalTimeout` | Call `get()` again later |
//! | **Remote** | `Submission`, `RemoteExecution` | Fix input or resubmit |
//! | **Caller input** | `MalformedHandle`, `InvalidObservable`, `InvalidOperation`, `UnknownOperation`, `UnsupportedOperationAttribute`, `InvalidConfig` | Fix input |
//!
//! Nothing is retried automatically; every variant surfaces to the caller.

use thiserror::Error;

/// Errors that can occur while submitting, retrieving or building operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HandleError {
    // ── Remote errors ────────────────────────────────────────────────
    /// The service rejected the request before it was queued.
    #[error("Submission rejected: {0}")]
    Submission(String),

    /// A job reached the terminal failed status.
    #[error("{}", remote_message(.job_id, .term.as_deref(), .reason))]
    RemoteExecution {
        /// The failing job.
        job_id: String,
        /// Basis label of the failing term, for aggregate retrievals.
        term: Option<String>,
        /// Reason reported by the service.
        reason: String,
    },

    // ── Recoverable ──────────────────────────────────────────────────
    /// The wait budget was exhausted before every job finished.
    #[error("Timed out after {waited_ms}ms waiting for job {job_id}")]
    RetrievalTimeout {
        /// First job still pending when the budget ran out.
        job_id: String,
        /// How long the retrieval waited.
        waited_ms: u64,
    },

    // ── Caller input ─────────────────────────────────────────────────
    /// A serialized handle could not be parsed.
    #[error("Malformed handle: {0}")]
    MalformedHandle(String),

    /// The observable is empty or does not match the persisted handle.
    #[error("Invalid observable: {0}")]
    InvalidObservable(String),

    /// A custom operation (or its use) failed validation.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// No operation with this name is registered.
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    /// The attribute is not a recognized variant of a custom operation.
    #[error("Operation '{operation}' has no attribute '{attribute}' (expected ctrl or adj)")]
    UnsupportedOperationAttribute {
        /// Name of the registered operation.
        operation: String,
        /// The rejected attribute.
        attribute: String,
    },

    /// Retrieval settings are out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

fn remote_message(job_id: &str, term: Option<&str>, reason: &str) -> String {
    match term {
        Some(term) => format!("Job {job_id} for term {term} failed: {reason}"),
        None => format!("Job {job_id} failed: {reason}"),
    }
}

impl HandleError {
    /// Returns `true` if a later retrieval may succeed without changing input.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::RetrievalTimeout { .. })
    }
}

/// Result type for handle and registry operations.
pub type HandleResult<T> = Result<T, HandleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_errors() {
        let timeout = HandleError::RetrievalTimeout {
            job_id: "job-1".into(),
            waited_ms: 10,
        };
        assert!(timeout.is_recoverable());
        assert!(!HandleError::Submission("offline".into()).is_recoverable());
        assert!(!HandleError::MalformedHandle("bad".into()).is_recoverable());
    }

    #[test]
    fn test_remote_error_names_term() {
        let err = HandleError::RemoteExecution {
            job_id: "job-7".into(),
            term: Some("X0X1".into()),
            reason: "calibration drift".into(),
        };
        assert_eq!(
            err.to_string(),
            "Job job-7 for term X0X1 failed: calibration drift"
        );

        let err = HandleError::RemoteExecution {
            job_id: "job-8".into(),
            term: None,
            reason: "lost".into(),
        };
        assert_eq!(err.to_string(), "Job job-8 failed: lost");
    }

    #[test]
    fn test_error_display() {
        let err = HandleError::UnsupportedOperationAttribute {
            operation: "custom_s".into(),
            attribute: "foo".into(),
        };
        assert_eq!(
            err.to_string(),
            "Operation 'custom_s' has no attribute 'foo' (expected ctrl or adj)"
        );
    }
}
