//! Persistable handles to single sampling jobs.
//!
//! The handle state machine:
//!
//! ```text
//!   submit() ──→ Submitted ──→ Resolving ──→ Resolved
//!                    ▲             │
//!                    │             ├──→ Failed(reason)
//!   deserialize() ───┘             │
//!                                  └──→ (timeout: stays poll-able)
//! ```
//!
//! **Invariants:**
//! - `Resolved` and `Failed` are terminal; `get()` on them never contacts
//!   the service again.
//! - A handle restored from text always starts `Submitted`.
//! - Dropping a handle does not cancel its remote job.

use std::fmt;
use std::sync::Arc;

use tokio::time::{Instant, sleep};
use tracing::{debug, info, instrument, warn};

use crate::circuit::Circuit;
use crate::config::RetrievalConfig;
use crate::error::{HandleError, HandleResult};
use crate::format::{HandleKind, PersistedHandle};
use crate::job::{JobRecord, JobStatus};
use crate::observable::PauliWord;
use crate::result::Counts;
use crate::service::ExecutionService;

/// Observable lifecycle state of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// Queued remotely; nothing fetched yet.
    Submitted,
    /// A retrieval started and has not reached a terminal status.
    Resolving,
    /// Counts fetched and cached.
    Resolved,
    /// The remote job failed; the reason is cached.
    Failed,
}

#[derive(Debug, Clone)]
enum Stage {
    Submitted,
    Resolving,
    Resolved(Counts),
    Failed(String),
}

/// Handle to one remote sampling job.
///
/// `Display` (and [`JobHandle::serialize`]) produce the persisted form;
/// [`JobHandle::deserialize`] restores it in another process.
pub struct JobHandle {
    service: Arc<dyn ExecutionService>,
    record: JobRecord,
    config: RetrievalConfig,
    stage: Stage,
}

impl JobHandle {
    /// Submit `circuit` and return without waiting for it to run.
    pub async fn submit(
        service: Arc<dyn ExecutionService>,
        circuit: &Circuit,
        shots: u32,
        target: &str,
    ) -> HandleResult<Self> {
        Self::submit_in_basis(service, circuit, shots, target, None).await
    }

    #[instrument(skip(service, circuit), fields(service = service.name()))]
    pub(crate) async fn submit_in_basis(
        service: Arc<dyn ExecutionService>,
        circuit: &Circuit,
        shots: u32,
        target: &str,
        basis: Option<PauliWord>,
    ) -> HandleResult<Self> {
        if shots == 0 {
            return Err(HandleError::Submission("shots must be positive".into()));
        }
        if target.is_empty() {
            return Err(HandleError::Submission("target must not be empty".into()));
        }
        let id = service.submit(target, circuit, shots).await?;
        if id.as_str().is_empty() {
            return Err(HandleError::Submission(format!(
                "'{target}' returned an empty job id"
            )));
        }
        debug!("Submitted job {} ({} qubits, {} shots)", id, circuit.num_qubits(), shots);

        let mut record = JobRecord::submitted(id, target, shots);
        if let Some(basis) = basis {
            record = record.with_basis(basis);
        }
        Ok(Self::from_record(service, record))
    }

    pub(crate) fn from_record(service: Arc<dyn ExecutionService>, record: JobRecord) -> Self {
        Self {
            service,
            record,
            config: RetrievalConfig::default(),
            stage: Stage::Submitted,
        }
    }

    /// Use `config` for subsequent [`JobHandle::get`] calls.
    pub fn with_config(mut self, config: RetrievalConfig) -> Self {
        self.config = config;
        self
    }

    /// The underlying job record.
    pub fn record(&self) -> &JobRecord {
        &self.record
    }

    /// The remote job id.
    pub fn job_id(&self) -> &str {
        self.record.id.as_str()
    }

    /// The backend target.
    pub fn target(&self) -> &str {
        &self.record.target
    }

    /// Current lifecycle state.
    pub fn state(&self) -> HandleState {
        match self.stage {
            Stage::Submitted => HandleState::Submitted,
            Stage::Resolving => HandleState::Resolving,
            Stage::Resolved(_) => HandleState::Resolved,
            Stage::Failed(_) => HandleState::Failed,
        }
    }

    /// Check if counts are cached.
    pub fn is_resolved(&self) -> bool {
        matches!(self.stage, Stage::Resolved(_))
    }

    /// Cached counts, if resolved.
    pub fn counts(&self) -> Option<&Counts> {
        match &self.stage {
            Stage::Resolved(counts) => Some(counts),
            _ => None,
        }
    }

    /// Wait for the job using the handle's retrieval config.
    pub async fn get(&mut self) -> HandleResult<Counts> {
        let config = self.config.clone();
        self.get_with(&config).await
    }

    /// Wait for the job, polling per `config`.
    ///
    /// Returns cached counts immediately once resolved and re-raises the
    /// cached failure once failed. On timeout the handle stays poll-able.
    #[instrument(skip(self, config), fields(job_id = %self.record.id))]
    pub async fn get_with(&mut self, config: &RetrievalConfig) -> HandleResult<Counts> {
        match &self.stage {
            Stage::Resolved(counts) => return Ok(counts.clone()),
            Stage::Failed(reason) => return Err(self.remote_error(reason)),
            Stage::Submitted | Stage::Resolving => {}
        }
        config.validate()?;
        self.stage = Stage::Resolving;

        let started = Instant::now();
        let mut interval = config.poll_interval();
        loop {
            match self.service.status(&self.record.id).await? {
                JobStatus::Completed => {
                    let result = self.service.fetch(&self.record.id).await?;
                    info!(
                        "Job {} completed: {} outcomes over {} shots",
                        self.record.id,
                        result.counts.len(),
                        result.counts.total_shots()
                    );
                    self.stage = Stage::Resolved(result.counts.clone());
                    return Ok(result.counts);
                }
                JobStatus::Failed(reason) => {
                    warn!("Job {} failed: {}", self.record.id, reason);
                    let err = self.remote_error(&reason);
                    self.stage = Stage::Failed(reason);
                    return Err(err);
                }
                JobStatus::Queued | JobStatus::Running => {}
            }

            let delay = match config.timeout() {
                Some(timeout) => {
                    let waited = started.elapsed();
                    if waited >= timeout {
                        debug!("Gave up on job {} after {:?}", self.record.id, waited);
                        return Err(HandleError::RetrievalTimeout {
                            job_id: self.record.id.0.clone(),
                            waited_ms: u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
                        });
                    }
                    interval.min(timeout - waited)
                }
                None => interval,
            };
            sleep(delay).await;
            interval = config.next_interval(interval);
        }
    }

    fn remote_error(&self, reason: &str) -> HandleError {
        HandleError::RemoteExecution {
            job_id: self.record.id.0.clone(),
            term: self.record.basis.as_ref().map(ToString::to_string),
            reason: reason.to_string(),
        }
    }

    /// The persisted form of this handle.
    pub fn serialize(&self) -> String {
        self.to_string()
    }

    /// Restore a handle from its persisted form without contacting the service.
    pub fn deserialize(text: &str, service: Arc<dyn ExecutionService>) -> HandleResult<Self> {
        let persisted = PersistedHandle::decode(text, HandleKind::Sample)?;
        let id = persisted
            .jobs
            .into_iter()
            .next()
            .ok_or_else(|| HandleError::MalformedHandle("no job id".into()))?;
        Ok(Self::from_record(
            service,
            JobRecord::restored(id, persisted.target),
        ))
    }

    fn persisted(&self) -> PersistedHandle {
        PersistedHandle {
            kind: HandleKind::Sample,
            target: self.record.target.clone(),
            jobs: vec![self.record.id.clone()],
            bases: Vec::new(),
        }
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self.persisted().encode().map_err(|_| fmt::Error)?;
        f.write_str(&text)
    }
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("service", &self.service.name())
            .field("record", &self.record)
            .field("state", &self.state())
            .finish()
    }
}

/// Submit `circuit` and wait for its counts.
pub async fn sample(
    service: Arc<dyn ExecutionService>,
    circuit: &Circuit,
    shots: u32,
    target: &str,
) -> HandleResult<Counts> {
    JobHandle::submit(service, circuit, shots, target)
        .await?
        .get()
        .await
}
