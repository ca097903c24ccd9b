//! Aggregate (observable) handle lifecycle against the local service.

use std::sync::Arc;
use std::time::Duration;

use qpu_handles::local::DEFAULT_TARGET;
use qpu_handles::{
    AggregateHandle, Circuit, Gate, HandleError, LocalService, Observable, PauliWord,
    RetrievalConfig, observe,
};

const THETA: f64 = 0.59;

/// x(q0), ry(θ, q1), cx(q1, q0): cos(θ/2)|01⟩ + sin(θ/2)|10⟩.
fn ansatz(theta: f64) -> Circuit {
    let mut circuit = Circuit::new(2);
    circuit.x(0).unwrap().ry(theta, 1).unwrap().cx(1, 0).unwrap();
    circuit
}

fn hamiltonian() -> Observable {
    Observable::from_labels([(5.907, "I"), (-2.1433, "XX"), (0.21829, "Z0")]).unwrap()
}

fn reference_energy(theta: f64) -> f64 {
    5.907 - 2.1433 * theta.sin() - 0.21829 * theta.cos()
}

fn fast_config() -> RetrievalConfig {
    RetrievalConfig::default()
        .with_poll_interval(Duration::from_millis(1))
        .with_max_poll_interval(Duration::from_millis(5))
}

#[tokio::test]
async fn test_energy_matches_reference() {
    let service = Arc::new(LocalService::new());
    let result = observe(service.clone(), &ansatz(THETA), &hamiltonian(), 10_000, DEFAULT_TARGET)
        .await
        .unwrap();

    assert!((result.expectation() - reference_energy(THETA)).abs() < 1e-2);
    assert!((result.expectation() - 4.5332).abs() < 1e-2);
    assert!(result.std_error() > 0.0);
    assert!(result.std_error() < 0.05);
    // Identity contributes without a job.
    assert_eq!(service.submit_calls(), 2);

    let z0 = result.term(&"Z0".parse().unwrap()).unwrap();
    assert!((z0.expectation + THETA.cos()).abs() < 1e-2);
    let xx = result.term(&"X0X1".parse().unwrap()).unwrap();
    assert!((xx.expectation - THETA.sin()).abs() < 1e-2);
    let id = result.term(&PauliWord::identity()).unwrap();
    assert_eq!(id.expectation, 1.0);
    assert_eq!(id.variance, 0.0);
}

#[tokio::test]
async fn test_shared_basis_is_measured_once() {
    let service = Arc::new(LocalService::new());
    let observable = Observable::from_labels([(1.0, "Z0"), (2.0, "Z0"), (0.5, "I")]).unwrap();

    let mut handle =
        AggregateHandle::submit(service.clone(), &ansatz(THETA), &observable, 1000, DEFAULT_TARGET)
            .await
            .unwrap();
    assert_eq!(service.submit_calls(), 1);
    assert_eq!(handle.job_ids().len(), 1);

    let result = handle.get().await.unwrap();
    let expected = 0.5 - 3.0 * THETA.cos();
    assert!((result.expectation() - expected).abs() < 1e-2);
}

#[tokio::test]
async fn test_empty_observable_is_rejected() {
    let service = Arc::new(LocalService::new());
    let err = AggregateHandle::submit(
        service.clone(),
        &ansatz(THETA),
        &Observable::from_terms(Vec::new()),
        1000,
        DEFAULT_TARGET,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, HandleError::InvalidObservable(_)));
    assert_eq!(service.submit_calls(), 0);
}

#[tokio::test]
async fn test_identity_only_needs_no_jobs() {
    let service = Arc::new(LocalService::new());
    let observable = Observable::from_labels([(2.5, "I"), (0.5, "II")]).unwrap();
    let result = observe(service.clone(), &ansatz(THETA), &observable, 1000, DEFAULT_TARGET)
        .await
        .unwrap();

    assert_eq!(result.expectation(), 3.0);
    assert_eq!(result.std_error(), 0.0);
    assert_eq!(service.submit_calls(), 0);
}

#[tokio::test]
async fn test_observable_wider_than_circuit() {
    let service = Arc::new(LocalService::new());
    let observable = Observable::from_labels([(1.0, "Z3")]).unwrap();
    let err = AggregateHandle::submit(service, &ansatz(THETA), &observable, 100, DEFAULT_TARGET)
        .await
        .unwrap_err();
    assert!(matches!(err, HandleError::InvalidObservable(_)));
}

#[tokio::test]
async fn test_restored_handle_reproduces_value() {
    let service = Arc::new(LocalService::new().with_pending_polls(2));
    let handle = AggregateHandle::submit(
        service.clone(),
        &ansatz(THETA),
        &hamiltonian(),
        10_000,
        DEFAULT_TARGET,
    )
    .await
    .unwrap();
    let text = handle.serialize();
    assert!(!text.contains("5.907"));
    drop(handle);

    let mut restored = AggregateHandle::deserialize(&text, &hamiltonian(), service.clone())
        .unwrap()
        .with_config(fast_config());
    assert_eq!(restored.serialize(), text);
    let result = restored.get().await.unwrap();
    assert!((result.expectation() - reference_energy(THETA)).abs() < 1e-2);
    assert_eq!(service.submit_calls(), 2);

    // Cached after the first retrieval.
    let status_calls = service.status_calls();
    assert_eq!(restored.get().await.unwrap(), result);
    assert_eq!(service.status_calls(), status_calls);
}

#[tokio::test]
async fn test_restore_with_different_observable() {
    let service = Arc::new(LocalService::new());
    let handle = AggregateHandle::submit(
        service.clone(),
        &ansatz(THETA),
        &hamiltonian(),
        100,
        DEFAULT_TARGET,
    )
    .await
    .unwrap();
    let text = handle.serialize();

    let other = Observable::from_labels([(1.0, "Y0")]).unwrap();
    assert!(matches!(
        AggregateHandle::deserialize(&text, &other, service.clone()),
        Err(HandleError::InvalidObservable(_))
    ));
    assert!(matches!(
        AggregateHandle::deserialize("not-a-valid-handle", &hamiltonian(), service),
        Err(HandleError::MalformedHandle(_))
    ));
}

#[tokio::test]
async fn test_failed_term_is_named() {
    let service = Arc::new(LocalService::new().with_failure_when(|circuit| {
        circuit
            .instructions()
            .iter()
            .any(|inst| matches!(inst.gate, Gate::H))
            .then(|| "readout calibration failed".to_string())
    }));
    let mut handle = AggregateHandle::submit(
        service.clone(),
        &ansatz(THETA),
        &hamiltonian(),
        1000,
        DEFAULT_TARGET,
    )
    .await
    .unwrap()
    .with_config(fast_config());

    match handle.get().await {
        Err(HandleError::RemoteExecution { term, reason, .. }) => {
            assert_eq!(term.as_deref(), Some("X0X1"));
            assert_eq!(reason, "readout calibration failed");
        }
        other => panic!("expected a remote failure, got {other:?}"),
    }
    assert!(!handle.is_resolved());

    // The healthy term is still cached.
    let z0: PauliWord = "Z0".parse().unwrap();
    assert!(handle.term_counts(&z0).is_some());
    assert!(handle.term_counts(&"X0X1".parse().unwrap()).is_none());
}

fn rotates_to_x(circuit: &Circuit) -> bool {
    circuit
        .instructions()
        .iter()
        .any(|inst| matches!(inst.gate, Gate::H))
}

#[tokio::test(start_paused = true)]
async fn test_timeout_keeps_finished_terms() {
    let service = Arc::new(
        LocalService::new().with_pending_when(|circuit| rotates_to_x(circuit).then_some(50)),
    );
    let mut handle = AggregateHandle::submit(
        service.clone(),
        &ansatz(THETA),
        &hamiltonian(),
        10_000,
        DEFAULT_TARGET,
    )
    .await
    .unwrap();

    let config = RetrievalConfig::default()
        .with_poll_interval(Duration::from_millis(10))
        .with_max_poll_interval(Duration::from_millis(10))
        .with_timeout(Duration::from_millis(25));
    let err = handle.get_with(&config).await.unwrap_err();
    assert!(matches!(err, HandleError::RetrievalTimeout { .. }));
    assert!(err.is_recoverable());
    assert!(!handle.is_resolved());
    assert!(handle.term_counts(&"Z0".parse().unwrap()).is_some());
    assert!(handle.term_counts(&"X0X1".parse().unwrap()).is_none());

    let result = handle.with_config(fast_config()).get().await.unwrap();
    assert!((result.expectation() - reference_energy(THETA)).abs() < 1e-2);
    assert_eq!(service.submit_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_completion_order_does_not_change_value() {
    let mut results = Vec::new();
    for x_first in [true, false] {
        let service = Arc::new(LocalService::new().with_pending_when(move |circuit| {
            Some(if rotates_to_x(circuit) == x_first { 1 } else { 20 })
        }));
        let result = AggregateHandle::submit(
            service,
            &ansatz(THETA),
            &hamiltonian(),
            10_000,
            DEFAULT_TARGET,
        )
        .await
        .unwrap()
        .with_config(fast_config())
        .get()
        .await
        .unwrap();
        results.push(result);
    }

    assert_eq!(results[0], results[1]);
    assert!((results[0].expectation() - reference_energy(THETA)).abs() < 1e-2);
}

#[tokio::test]
async fn test_empty_target_is_rejected() {
    let service = Arc::new(LocalService::new().with_target(""));
    for observable in [hamiltonian(), Observable::from_labels([(2.5, "I")]).unwrap()] {
        let err = AggregateHandle::submit(service.clone(), &ansatz(THETA), &observable, 100, "")
            .await
            .unwrap_err();
        assert!(matches!(err, HandleError::Submission(_)));
    }
    assert_eq!(service.submit_calls(), 0);
}
