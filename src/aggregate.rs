//! Observable expectation values over several remote jobs.
//!
//! An [`AggregateHandle`] measures `O = Σ_k c_k · P_k` by submitting one
//! basis-rotated job per distinct non-identity `P_k`. Terms that share a
//! basis share its job; identity terms contribute their coefficient with
//! no job and no variance.
//!
//! Retrieval polls every job concurrently and combines them only once all
//! are terminal:
//!
//! ```text
//!   ⟨O⟩      = Σ_I Re(c_I) + Σ_b Re(C_b · ⟨P_b⟩)
//!   Var(⟨O⟩) = Σ_b |C_b|² · (1 − ⟨P_b⟩²) / shots_b
//! ```
//!
//! where `C_b` is the summed coefficient of every term measured in basis `b`
//! and the jobs are assumed independent.

use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::circuit::Circuit;
use crate::config::RetrievalConfig;
use crate::error::{HandleError, HandleResult};
use crate::format::{HandleKind, PersistedHandle};
use crate::handle::JobHandle;
use crate::job::JobRecord;
use crate::observable::{Observable, PauliWord};
use crate::result::Counts;
use crate::service::ExecutionService;

/// Estimate for one measurement basis (or the identity).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermEstimate {
    /// Measurement basis.
    pub basis: PauliWord,
    /// Summed coefficient of every term in this basis.
    pub coefficient: Complex64,
    /// Estimated ⟨P⟩ (1 for the identity).
    pub expectation: f64,
    /// Shot-noise variance of the weighted contribution.
    pub variance: f64,
}

/// Combined expectation value of an observable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    expectation: f64,
    std_error: f64,
    terms: Vec<TermEstimate>,
}

impl AggregateResult {
    /// The expectation value ⟨O⟩.
    pub fn expectation(&self) -> f64 {
        self.expectation
    }

    /// Standard error of the expectation value.
    pub fn std_error(&self) -> f64 {
        self.std_error
    }

    /// Per-basis estimates, identity first when present.
    pub fn terms(&self) -> &[TermEstimate] {
        &self.terms
    }

    /// Estimate for one basis.
    pub fn term(&self, basis: &PauliWord) -> Option<&TermEstimate> {
        self.terms.iter().find(|t| &t.basis == basis)
    }
}

/// Handle to the jobs measuring one observable.
pub struct AggregateHandle {
    target: String,
    observable: Observable,
    jobs: Vec<JobHandle>,
    config: RetrievalConfig,
    result: Option<AggregateResult>,
}

impl AggregateHandle {
    /// Submit one job per distinct basis of `observable` and return without
    /// waiting.
    #[instrument(skip_all, fields(backend = target, terms = observable.len()))]
    pub async fn submit(
        service: Arc<dyn ExecutionService>,
        template: &Circuit,
        observable: &Observable,
        shots: u32,
        target: &str,
    ) -> HandleResult<Self> {
        Self::check_observable(observable)?;
        if observable.num_qubits() > template.num_qubits() {
            return Err(HandleError::InvalidObservable(format!(
                "observable acts on {} qubits but the circuit has {}",
                observable.num_qubits(),
                template.num_qubits()
            )));
        }
        if shots == 0 {
            return Err(HandleError::Submission("shots must be positive".into()));
        }
        if target.is_empty() {
            return Err(HandleError::Submission("target must not be empty".into()));
        }

        let bases = observable.distinct_bases();
        debug!(
            "Observable has {} terms over {} distinct bases",
            observable.len(),
            bases.len()
        );
        let mut jobs = Vec::with_capacity(bases.len());
        for basis in bases {
            let circuit = template.with_basis_rotation(&basis)?;
            let job = JobHandle::submit_in_basis(
                Arc::clone(&service),
                &circuit,
                shots,
                target,
                Some(basis),
            )
            .await?;
            jobs.push(job);
        }

        Ok(Self {
            target: target.to_string(),
            observable: observable.clone(),
            jobs,
            config: RetrievalConfig::default(),
            result: None,
        })
    }

    fn check_observable(observable: &Observable) -> HandleResult<()> {
        if observable.is_empty() {
            return Err(HandleError::InvalidObservable(
                "observable has no terms".into(),
            ));
        }
        Ok(())
    }

    /// Use `config` for subsequent [`AggregateHandle::get`] calls.
    pub fn with_config(mut self, config: RetrievalConfig) -> Self {
        self.config = config;
        self
    }

    /// The backend target.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// The observable this handle measures.
    pub fn observable(&self) -> &Observable {
        &self.observable
    }

    /// Measured bases, parallel to [`AggregateHandle::job_ids`].
    pub fn bases(&self) -> Vec<PauliWord> {
        self.jobs
            .iter()
            .filter_map(|job| job.record().basis.clone())
            .collect()
    }

    /// Remote job ids, one per measured basis.
    pub fn job_ids(&self) -> Vec<&str> {
        self.jobs.iter().map(JobHandle::job_id).collect()
    }

    /// Per-basis job handles.
    pub fn jobs(&self) -> &[JobHandle] {
        &self.jobs
    }

    /// Cached counts of the job measuring `basis`, once it has resolved.
    pub fn term_counts(&self, basis: &PauliWord) -> Option<&Counts> {
        self.jobs
            .iter()
            .find(|job| job.record().basis.as_ref() == Some(basis))
            .and_then(JobHandle::counts)
    }

    /// Check if the combined result is cached.
    pub fn is_resolved(&self) -> bool {
        self.result.is_some()
    }

    /// Wait for every job using the handle's retrieval config.
    pub async fn get(&mut self) -> HandleResult<AggregateResult> {
        let config = self.config.clone();
        self.get_with(&config).await
    }

    /// Wait for every job and combine their results.
    ///
    /// A failed job fails the whole retrieval with a `RemoteExecution`
    /// error naming its basis; the other jobs keep their cached counts.
    /// If no job failed but some are still pending when the wait budget
    /// runs out, the retrieval fails with `RetrievalTimeout`.
    #[instrument(skip_all, fields(backend = %self.target, jobs = self.jobs.len()))]
    pub async fn get_with(&mut self, config: &RetrievalConfig) -> HandleResult<AggregateResult> {
        if let Some(result) = &self.result {
            return Ok(result.clone());
        }

        let outcomes = join_all(self.jobs.iter_mut().map(|job| job.get_with(config))).await;

        let mut first_error = None;
        let mut measured = Vec::with_capacity(outcomes.len());
        for (job, outcome) in self.jobs.iter().zip(outcomes) {
            match outcome {
                Ok(counts) => {
                    if let Some(basis) = &job.record().basis {
                        measured.push((basis.clone(), counts));
                    }
                }
                Err(err @ HandleError::RemoteExecution { .. }) => return Err(err),
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        let result = combine(&self.observable, &measured);
        debug!(
            "Combined {} bases: {:.6} ± {:.6}",
            measured.len(),
            result.expectation,
            result.std_error
        );
        self.result = Some(result.clone());
        Ok(result)
    }

    /// The persisted form of this handle. Coefficients are not included.
    pub fn serialize(&self) -> String {
        self.to_string()
    }

    /// Restore a handle from its persisted form and the observable that
    /// produced it, without contacting the service.
    pub fn deserialize(
        text: &str,
        observable: &Observable,
        service: Arc<dyn ExecutionService>,
    ) -> HandleResult<Self> {
        let persisted = PersistedHandle::decode(text, HandleKind::Observe)?;
        Self::check_observable(observable)?;

        let expected = observable.distinct_bases();
        if let Some(missing) = expected.iter().find(|b| !persisted.bases.contains(b)) {
            return Err(HandleError::InvalidObservable(format!(
                "observable term {missing} has no job in the handle"
            )));
        }
        if let Some(extra) = persisted.bases.iter().find(|b| !expected.contains(b)) {
            return Err(HandleError::InvalidObservable(format!(
                "handle measures {extra}, which is not a term of the observable"
            )));
        }

        let jobs = persisted
            .jobs
            .into_iter()
            .zip(persisted.bases)
            .map(|(id, basis)| {
                let record = JobRecord::restored(id, persisted.target.as_str()).with_basis(basis);
                JobHandle::from_record(Arc::clone(&service), record)
            })
            .collect();

        Ok(Self {
            target: persisted.target,
            observable: observable.clone(),
            jobs,
            config: RetrievalConfig::default(),
            result: None,
        })
    }

    fn persisted(&self) -> PersistedHandle {
        PersistedHandle {
            kind: HandleKind::Observe,
            target: self.target.clone(),
            jobs: self.jobs.iter().map(|job| job.record().id.clone()).collect(),
            bases: self.bases(),
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn combine(observable: &Observable, measured: &[(PauliWord, Counts)]) -> AggregateResult {
    let mut terms = Vec::with_capacity(measured.len() + 1);
    let identity = PauliWord::identity();
    if observable.terms().iter().any(|t| t.basis.is_identity()) {
        terms.push(TermEstimate {
            coefficient: observable.coefficient_for(&identity),
            basis: identity,
            expectation: 1.0,
            variance: 0.0,
        });
    }

    for (basis, counts) in measured {
        let coefficient = observable.coefficient_for(basis);
        let expectation = counts.parity_expectation(&basis.qubits());
        let shots = counts.total_shots() as f64;
        let variance = if shots > 0.0 {
            coefficient.norm_sqr() * (1.0 - expectation * expectation).max(0.0) / shots
        } else {
            0.0
        };
        terms.push(TermEstimate {
            basis: basis.clone(),
            coefficient,
            expectation,
            variance,
        });
    }

    let expectation: f64 = terms
        .iter()
        .map(|t| (t.coefficient * t.expectation).re)
        .sum();
    let std_error = terms.iter().map(|t| t.variance).sum::<f64>().sqrt();

    AggregateResult {
        expectation,
        std_error,
        terms,
    }
}

impl fmt::Display for AggregateHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self.persisted().encode().map_err(|_| fmt::Error)?;
        f.write_str(&text)
    }
}

impl fmt::Debug for AggregateHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateHandle")
            .field("target", &self.target)
            .field("jobs", &self.jobs)
            .field("resolved", &self.result.is_some())
            .finish()
    }
}

/// Submit the jobs for `observable` and wait for the combined result.
pub async fn observe(
    service: Arc<dyn ExecutionService>,
    template: &Circuit,
    observable: &Observable,
    shots: u32,
    target: &str,
) -> HandleResult<AggregateResult> {
    AggregateHandle::submit(service, template, observable, shots, target)
        .await?
        .get()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_groups_shared_bases() {
        let observable = Observable::from_labels([(2.0, "I"), (1.0, "Z0"), (0.5, "Z0")]).unwrap();
        let z0: PauliWord = "Z0".parse().unwrap();
        // ⟨Z0⟩ = 0.5
        let counts = Counts::from_pairs([("0", 75), ("1", 25)]);

        let result = combine(&observable, &[(z0.clone(), counts)]);
        assert!((result.expectation() - (2.0 + 1.5 * 0.5)).abs() < 1e-12);

        let term = result.term(&z0).unwrap();
        assert_eq!(term.coefficient, Complex64::new(1.5, 0.0));
        let expected_var = 1.5 * 1.5 * (1.0 - 0.25) / 100.0;
        assert!((term.variance - expected_var).abs() < 1e-12);
        assert!((result.std_error() - expected_var.sqrt()).abs() < 1e-12);

        let identity = result.term(&PauliWord::identity()).unwrap();
        assert_eq!(identity.variance, 0.0);
    }

    #[test]
    fn test_identity_only_has_zero_error() {
        let observable = Observable::from_labels([(5.907, "I")]).unwrap();
        let result = combine(&observable, &[]);
        assert!((result.expectation() - 5.907).abs() < 1e-12);
        assert_eq!(result.std_error(), 0.0);
    }
}
