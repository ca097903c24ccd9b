//! In-process execution service backed by a noiseless statevector.
//!
//! [`LocalService`] behaves like a queued remote service: `submit()` returns
//! a fresh job id at once, `status()` can be told to report the job as
//! pending for a number of polls, and jobs can be made to fail. Job state
//! lives in the service, so a handle serialized in one place can be restored
//! and resolved anywhere that shares the same `LocalService`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashMap;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::circuit::{Circuit, Instruction};
use crate::error::{HandleError, HandleResult};
use crate::job::{JobId, JobStatus};
use crate::registry::Matrix;
use crate::result::{Counts, ExecutionResult};
use crate::service::ExecutionService;

/// Target name accepted by a default [`LocalService`].
pub const DEFAULT_TARGET: &str = "local-sim";

/// How shots are drawn from the final state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingMode {
    /// Apportion shots to outcomes by probability (largest remainder),
    /// so results are reproducible and track the exact distribution.
    Exact,
    /// Draw every shot independently from a seeded generator.
    Seeded(u64),
}

type FailureRule = Box<dyn Fn(&Circuit) -> Option<String> + Send + Sync>;
type PendingRule = Box<dyn Fn(&Circuit) -> Option<u32> + Send + Sync>;

struct LocalJob {
    /// Pending polls at submission; the first half report `Queued`.
    initial_polls: u32,
    pending_polls: u32,
    outcome: Result<ExecutionResult, String>,
}

/// Noiseless local "remote" service.
pub struct LocalService {
    targets: Vec<String>,
    max_qubits: u32,
    pending_polls: u32,
    sampling: SamplingMode,
    failure: Option<FailureRule>,
    pending: Option<PendingRule>,
    jobs: Mutex<FxHashMap<String, LocalJob>>,
    submit_calls: AtomicUsize,
    status_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl LocalService {
    /// Create a service accepting [`DEFAULT_TARGET`], up to 16 qubits.
    pub fn new() -> Self {
        Self {
            targets: vec![DEFAULT_TARGET.to_string()],
            max_qubits: 16,
            pending_polls: 0,
            sampling: SamplingMode::Exact,
            failure: None,
            pending: None,
            jobs: Mutex::new(FxHashMap::default()),
            submit_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
        }
    }

    /// Also accept jobs for `target`.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.targets.push(target.into());
        self
    }

    /// Reject circuits wider than `max_qubits`.
    pub fn with_max_qubits(mut self, max_qubits: u32) -> Self {
        self.max_qubits = max_qubits;
        self
    }

    /// Report each job as pending for `polls` status calls.
    pub fn with_pending_polls(mut self, polls: u32) -> Self {
        self.pending_polls = polls;
        self
    }

    /// Report a job as pending for the polls `rule` returns for its circuit,
    /// falling back to [`LocalService::with_pending_polls`] on `None`.
    pub fn with_pending_when(
        mut self,
        rule: impl Fn(&Circuit) -> Option<u32> + Send + Sync + 'static,
    ) -> Self {
        self.pending = Some(Box::new(rule));
        self
    }

    /// Choose how shots are sampled.
    pub fn with_sampling(mut self, sampling: SamplingMode) -> Self {
        self.sampling = sampling;
        self
    }

    /// Make every job fail remotely with `reason`.
    pub fn with_failure(self, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        self.with_failure_when(move |_| Some(reason.clone()))
    }

    /// Make jobs fail remotely when `rule` returns a reason for their circuit.
    pub fn with_failure_when(
        mut self,
        rule: impl Fn(&Circuit) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.failure = Some(Box::new(rule));
        self
    }

    /// Number of `submit()` calls so far.
    pub fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    /// Number of `status()` calls so far.
    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    /// Number of `fetch()` calls so far.
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Number of jobs held by the service.
    pub fn job_count(&self) -> usize {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Run `circuit` and sample `shots` outcomes.
    #[instrument(skip(self, circuit))]
    fn run(&self, circuit: &Circuit, shots: u32) -> ExecutionResult {
        let start = Instant::now();
        let mut sv = Statevector::new(circuit.num_qubits() as usize);
        for inst in circuit.instructions() {
            sv.apply(inst);
        }
        debug!(
            "Simulated {} instructions on {} qubits",
            circuit.instructions().len(),
            circuit.num_qubits()
        );

        let probabilities = sv.probabilities();
        let frequencies = match self.sampling {
            SamplingMode::Exact => apportion(&probabilities, shots),
            SamplingMode::Seeded(seed) => draw(&probabilities, shots, seed),
        };

        let width = circuit.num_qubits() as usize;
        let counts = frequencies
            .into_iter()
            .enumerate()
            .filter(|(_, n)| *n > 0)
            .map(|(index, n)| (format!("{index:0width$b}"), n))
            .collect::<Counts>();

        let elapsed = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        ExecutionResult::new(counts, shots).with_execution_time(elapsed)
    }
}

impl Default for LocalService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionService for LocalService {
    fn name(&self) -> &str {
        "local"
    }

    async fn submit(&self, target: &str, circuit: &Circuit, shots: u32) -> HandleResult<JobId> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        if !self.targets.iter().any(|t| t == target) {
            return Err(HandleError::Submission(format!(
                "backend '{target}' is unavailable"
            )));
        }
        if circuit.num_qubits() > self.max_qubits {
            return Err(HandleError::Submission(format!(
                "circuit has {} qubits but '{target}' supports {}",
                circuit.num_qubits(),
                self.max_qubits
            )));
        }
        if shots == 0 {
            return Err(HandleError::Submission("shots must be positive".into()));
        }

        let id = Uuid::new_v4().to_string();
        let outcome = match self.failure.as_ref().and_then(|rule| rule(circuit)) {
            Some(reason) => Err(reason),
            None => Ok(self.run(circuit, shots)),
        };
        let polls = self
            .pending
            .as_ref()
            .and_then(|rule| rule(circuit))
            .unwrap_or(self.pending_polls);
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id.clone(),
                LocalJob {
                    initial_polls: polls,
                    pending_polls: polls,
                    outcome,
                },
            );

        debug!("Queued job {} on {}", id, target);
        Ok(JobId::new(id))
    }

    async fn status(&self, job_id: &JobId) -> HandleResult<JobStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(job) = jobs.get_mut(&job_id.0) else {
            return Ok(JobStatus::Failed(format!("job {job_id} not found")));
        };
        if job.pending_polls > 0 {
            let status = if job.pending_polls > job.initial_polls / 2 {
                JobStatus::Queued
            } else {
                JobStatus::Running
            };
            job.pending_polls -= 1;
            return Ok(status);
        }
        Ok(match &job.outcome {
            Ok(_) => JobStatus::Completed,
            Err(reason) => JobStatus::Failed(reason.clone()),
        })
    }

    async fn fetch(&self, job_id: &JobId) -> HandleResult<ExecutionResult> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        let remote = |reason: String| HandleError::RemoteExecution {
            job_id: job_id.0.clone(),
            term: None,
            reason,
        };
        match jobs.get(&job_id.0) {
            None => Err(remote("job not found".into())),
            Some(job) if job.pending_polls > 0 => Err(remote("job has not completed".into())),
            Some(LocalJob {
                outcome: Ok(result), ..
            }) => Ok(result.clone()),
            Some(LocalJob {
                outcome: Err(reason),
                ..
            }) => Err(remote(reason.clone())),
        }
    }
}

/// Split `shots` across outcomes in proportion to `probabilities`; the
/// result always sums to `shots`.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn apportion(probabilities: &[f64], shots: u32) -> Vec<u64> {
    let total = f64::from(shots);
    let mut counts: Vec<u64> = probabilities
        .iter()
        .map(|p| (p * total).floor() as u64)
        .collect();
    let assigned: u64 = counts.iter().sum();
    let mut remainders: Vec<(usize, f64)> = probabilities
        .iter()
        .enumerate()
        .map(|(i, p)| (i, p * total - counts[i] as f64))
        .collect();
    remainders.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    let missing = u64::from(shots).saturating_sub(assigned) as usize;
    for &(i, _) in remainders.iter().take(missing) {
        counts[i] += 1;
    }
    counts
}

fn draw(probabilities: &[f64], shots: u32, seed: u64) -> Vec<u64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut counts = vec![0u64; probabilities.len()];
    for _ in 0..shots {
        let r: f64 = rng.r#gen();
        let mut acc = 0.0;
        let mut chosen = probabilities.len() - 1;
        for (i, p) in probabilities.iter().enumerate() {
            acc += p;
            if r < acc {
                chosen = i;
                break;
            }
        }
        counts[chosen] += 1;
    }
    counts
}

/// State amplitudes, index bit `q` = qubit `q`.
struct Statevector {
    amplitudes: Vec<Complex64>,
    num_qubits: usize,
}

impl Statevector {
    /// |0…0⟩ on `num_qubits` qubits.
    fn new(num_qubits: usize) -> Self {
        let mut amplitudes = vec![Complex64::new(0.0, 0.0); 1 << num_qubits];
        amplitudes[0] = Complex64::new(1.0, 0.0);
        Self {
            amplitudes,
            num_qubits,
        }
    }

    fn apply(&mut self, instruction: &Instruction) {
        let qubits: Vec<usize> = instruction.qubits.iter().map(|&q| q as usize).collect();
        self.apply_matrix(&instruction.gate.matrix(), &qubits);
    }

    /// Apply `matrix` with `qubits[0]` as the most-significant matrix bit.
    fn apply_matrix(&mut self, matrix: &Matrix, qubits: &[usize]) {
        let m = qubits.len();
        let dim = 1usize << m;
        let mask = qubits.iter().fold(0usize, |acc, &q| acc | (1 << q));

        let mut indices = vec![0usize; dim];
        let mut old = vec![Complex64::new(0.0, 0.0); dim];
        for base in 0..(1usize << self.num_qubits) {
            if base & mask != 0 {
                continue;
            }
            for (k, index) in indices.iter_mut().enumerate() {
                *index = qubits
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| (k >> (m - 1 - j)) & 1 == 1)
                    .fold(base, |acc, (_, &q)| acc | (1 << q));
            }
            for (k, &index) in indices.iter().enumerate() {
                old[k] = self.amplitudes[index];
            }
            for (row, &index) in indices.iter().enumerate() {
                self.amplitudes[index] = (0..dim).map(|col| matrix[[row, col]] * old[col]).sum();
            }
        }
    }

    fn probabilities(&self) -> Vec<f64> {
        self.amplitudes.iter().map(|a| a.norm_sqr()).collect()
    }
}
