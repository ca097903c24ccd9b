//! End-to-end walkthrough against the in-process service.
//!
//! Submits a sampling job, persists and restores its handle, estimates a
//! two-qubit Hamiltonian through an aggregate handle, and builds a circuit
//! from registered custom operations.
//!
//! Set `RUST_LOG=qpu_handles=debug` to see polling and submission logs.

use std::sync::Arc;
use std::time::Duration;

use ndarray::array;
use num_complex::Complex64;
use qpu_handles::local::DEFAULT_TARGET;
use qpu_handles::{
    AggregateHandle, Circuit, HandleResult, JobHandle, LocalService, Observable,
    OperationRegistry, RetrievalConfig,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> HandleResult<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let service = Arc::new(LocalService::new().with_pending_polls(3));
    let config = RetrievalConfig::default().with_poll_interval(Duration::from_millis(20));

    // ── Sampling job ─────────────────────────────────────────────────
    let mut bell = Circuit::new(2);
    bell.h(0)?.cx(0, 1)?;

    let handle = JobHandle::submit(service.clone(), &bell, 1000, DEFAULT_TARGET).await?;
    let text = handle.serialize();
    info!("Persisted handle: {text}");
    drop(handle);

    let mut restored = JobHandle::deserialize(&text, service.clone())?.with_config(config.clone());
    let counts = restored.get().await?;
    info!("Bell counts: {counts}");
    if let Some((bits, n)) = counts.most_frequent() {
        info!("Most frequent outcome: {bits} ({n} shots)");
    }

    // ── Observable ───────────────────────────────────────────────────
    let theta = 0.59;
    let mut ansatz = Circuit::new(2);
    ansatz.x(0)?.ry(theta, 1)?.cx(1, 0)?;
    let hamiltonian =
        Observable::from_labels([(5.907, "I"), (-2.1433, "XX"), (0.21829, "Z0")])?;

    let aggregate =
        AggregateHandle::submit(service.clone(), &ansatz, &hamiltonian, 10_000, DEFAULT_TARGET)
            .await?;
    let text = aggregate.serialize();
    info!("Persisted aggregate: {text}");

    let mut aggregate = AggregateHandle::deserialize(&text, &hamiltonian, service.clone())?
        .with_config(config);
    let energy = aggregate.get().await?;
    info!(
        "Energy at theta={theta}: {:.4} ± {:.4}",
        energy.expectation(),
        energy.std_error()
    );
    for term in energy.terms() {
        info!(
            "  {:>6}  c={:+.5}  <P>={:+.4}",
            term.basis.to_string(),
            term.coefficient.re,
            term.expectation
        );
    }

    // ── Custom operations ────────────────────────────────────────────
    let registry = OperationRegistry::new();
    let h = std::f64::consts::FRAC_1_SQRT_2;
    let zero = Complex64::new(0.0, 0.0);
    let one = Complex64::new(1.0, 0.0);
    registry.register_matrix(
        "custom_h",
        1,
        array![[Complex64::new(h, 0.0), Complex64::new(h, 0.0)], [
            Complex64::new(h, 0.0),
            Complex64::new(-h, 0.0)
        ]],
    )?;
    registry.register_matrix("custom_x", 1, array![[zero, one], [one, zero]])?;

    let mut circuit = Circuit::new(2);
    circuit
        .custom(&registry, "custom_h", &[], &[0])?
        .custom_ctrl(&registry, "custom_x", &[], &[0], &[1])?;
    let counts = qpu_handles::sample(service, &circuit, 1000, DEFAULT_TARGET).await?;
    info!("Bell from custom operations: {counts}");
    info!("Registered operations: {:?}", registry.names());

    Ok(())
}
