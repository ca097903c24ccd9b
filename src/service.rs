//! Remote execution service contract.
//!
//! The [`ExecutionService`] trait is the narrow interface job handles use to
//! talk to a queued backend:
//!
//! ```text
//!   submit() ──→ status() ──→ ... ──→ status() ──→ fetch()
//!   (job id)     (pending)            (completed)  (counts)
//! ```
//!
//! ## Method table
//!
//! | Method | Kind | Returns |
//! |--------|------|---------|
//! | `name()` | sync | `&str` |
//! | `submit()` | async | `HandleResult<JobId>` |
//! | `status()` | async | `HandleResult<JobStatus>` |
//! | `fetch()` | async | `HandleResult<ExecutionResult>` |
//!
//! Transport failures are reported as `Err` from any method and propagate
//! to the caller unchanged. A job the service reports as failed is a
//! successful `status()` call returning [`JobStatus::Failed`].

use async_trait::async_trait;

use crate::circuit::Circuit;
use crate::error::HandleResult;
use crate::job::{JobId, JobStatus};
use crate::result::ExecutionResult;

/// A queued execution backend reachable from this process.
///
/// # Contract
///
/// - `submit()` returns as soon as the job is queued. Rejections (bad
///   circuit, unknown or unavailable target, authentication) are
///   `HandleError::Submission`.
/// - `status()` never blocks on the job; `Queued` and `Running` mean pending.
/// - `fetch()` is only called after `status()` returned `Completed`.
/// - Job ids stay valid across processes for as long as the service
///   retains the job.
#[async_trait]
pub trait ExecutionService: Send + Sync {
    /// Name of this service, for logs.
    fn name(&self) -> &str;

    /// Queue `circuit` for `shots` executions on `target`.
    async fn submit(&self, target: &str, circuit: &Circuit, shots: u32) -> HandleResult<JobId>;

    /// Get the status of a job.
    async fn status(&self, job_id: &JobId) -> HandleResult<JobStatus>;

    /// Get the result of a completed job.
    async fn fetch(&self, job_id: &JobId) -> HandleResult<ExecutionResult>;
}
