//! Custom operations end to end: register, build circuits, run locally.

use std::f64::consts::{FRAC_1_SQRT_2, PI};
use std::sync::Arc;

use ndarray::array;
use num_complex::Complex64;
use qpu_handles::local::DEFAULT_TARGET;
use qpu_handles::registry::dagger;
use qpu_handles::{
    Circuit, Counts, HandleError, LocalService, Matrix, OperationAttribute, OperationRegistry,
    sample,
};

fn c(re: f64, im: f64) -> Complex64 {
    Complex64::new(re, im)
}

fn registry() -> OperationRegistry {
    let h = FRAC_1_SQRT_2;
    let registry = OperationRegistry::new();
    registry
        .register_matrix("custom_h", 1, array![[c(h, 0.0), c(h, 0.0)], [c(h, 0.0), c(-h, 0.0)]])
        .unwrap();
    registry
        .register_matrix("custom_x", 1, array![[c(0.0, 0.0), c(1.0, 0.0)], [c(1.0, 0.0), c(0.0, 0.0)]])
        .unwrap();
    registry
        .register_matrix("custom_s", 1, array![[c(1.0, 0.0), c(0.0, 0.0)], [c(0.0, 0.0), c(0.0, 1.0)]])
        .unwrap();
    registry
        .register_generator("custom_rx", 1, 1, |p: &[f64]| {
            let (cos, sin) = ((p[0] / 2.0).cos(), (p[0] / 2.0).sin());
            array![[c(cos, 0.0), c(0.0, -sin)], [c(0.0, -sin), c(cos, 0.0)]]
        })
        .unwrap();
    registry
        .register_generator("custom_rz", 1, 1, |p: &[f64]| {
            let half = p[0] / 2.0;
            array![
                [Complex64::from_polar(1.0, -half), c(0.0, 0.0)],
                [c(0.0, 0.0), Complex64::from_polar(1.0, half)]
            ]
        })
        .unwrap();
    registry
}

async fn run(circuit: &Circuit) -> Counts {
    sample(Arc::new(LocalService::new()), circuit, 1000, DEFAULT_TARGET)
        .await
        .unwrap()
}

fn assert_close(a: &Matrix, b: &Matrix) {
    assert_eq!(a.dim(), b.dim());
    for (x, y) in a.iter().zip(b.iter()) {
        assert!((x - y).norm() < 1e-12, "{a} != {b}");
    }
}

#[tokio::test]
async fn test_bell_from_custom_operations() {
    let registry = registry();
    let mut circuit = Circuit::new(2);
    circuit
        .custom(&registry, "custom_h", &[], &[0])
        .unwrap()
        .custom_ctrl(&registry, "custom_x", &[], &[0], &[1])
        .unwrap();

    let counts = run(&circuit).await;
    assert_eq!(counts.get("00"), 500);
    assert_eq!(counts.get("11"), 500);
    assert_eq!(counts.len(), 2);
}

#[tokio::test]
async fn test_two_qubit_matrix() {
    let registry = OperationRegistry::new();
    let (o, l) = (c(0.0, 0.0), c(1.0, 0.0));
    registry
        .register_matrix(
            "cnot",
            2,
            array![[l, o, o, o], [o, l, o, o], [o, o, o, l], [o, o, l, o]],
        )
        .unwrap();

    let mut circuit = Circuit::new(2);
    circuit.x(0).unwrap().custom(&registry, "cnot", &[], &[0, 1]).unwrap();
    assert_eq!(run(&circuit).await.get("11"), 1000);

    // Control clear: target untouched.
    let mut circuit = Circuit::new(2);
    circuit.x(1).unwrap().custom(&registry, "cnot", &[], &[0, 1]).unwrap();
    assert_eq!(run(&circuit).await.get("10"), 1000);
}

#[tokio::test]
async fn test_toffoli_from_two_controls() {
    let registry = registry();

    let mut circuit = Circuit::new(3);
    circuit
        .x(0)
        .unwrap()
        .x(1)
        .unwrap()
        .custom_ctrl(&registry, "custom_x", &[], &[0, 1], &[2])
        .unwrap();
    assert_eq!(run(&circuit).await.get("111"), 1000);

    let mut circuit = Circuit::new(3);
    circuit
        .x(0)
        .unwrap()
        .x(1)
        .unwrap()
        .x(2)
        .unwrap()
        .custom_ctrl(&registry, "custom_x", &[], &[0, 1], &[2])
        .unwrap();
    assert_eq!(run(&circuit).await.get("011"), 1000);

    // One control clear.
    let mut circuit = Circuit::new(3);
    circuit
        .x(0)
        .unwrap()
        .custom_ctrl(&registry, "custom_x", &[], &[0, 1], &[2])
        .unwrap();
    assert_eq!(run(&circuit).await.get("001"), 1000);
}

#[tokio::test]
async fn test_adjoint_applied_twice() {
    let registry = registry();
    let mut circuit = Circuit::new(1);
    circuit
        .custom(&registry, "custom_h", &[], &[0])
        .unwrap()
        .custom_adj(&registry, "custom_s", &[], &[0])
        .unwrap()
        .custom_adj(&registry, "custom_s", &[], &[0])
        .unwrap()
        .custom(&registry, "custom_h", &[], &[0])
        .unwrap();

    // H (S†)² H = H Z H = X
    assert_eq!(run(&circuit).await.get("1"), 1000);

    let mut circuit = Circuit::new(1);
    circuit
        .h(0)
        .unwrap()
        .custom(&registry, "custom_s", &[], &[0])
        .unwrap()
        .custom_attr(&registry, "custom_s", "adj", &[], &[], &[0])
        .unwrap()
        .h(0)
        .unwrap();
    assert_eq!(run(&circuit).await.get("0"), 1000);
}

#[tokio::test]
async fn test_parameterized_generators() {
    let registry = registry();

    let mut circuit = Circuit::new(1);
    circuit.custom(&registry, "custom_rx", &[PI], &[0]).unwrap();
    assert_eq!(run(&circuit).await.get("1"), 1000);

    let mut circuit = Circuit::new(1);
    circuit
        .h(0)
        .unwrap()
        .custom(&registry, "custom_rz", &[PI], &[0])
        .unwrap()
        .h(0)
        .unwrap();
    assert_eq!(run(&circuit).await.get("1"), 1000);

    // rx(π/2) splits evenly.
    let mut circuit = Circuit::new(1);
    circuit.custom(&registry, "custom_rx", &[PI / 2.0], &[0]).unwrap();
    let counts = run(&circuit).await;
    assert_eq!(counts.get("0"), 500);
    assert_eq!(counts.get("1"), 500);
}

#[tokio::test]
async fn test_controlled_generator() {
    let registry = registry();
    let mut circuit = Circuit::new(2);
    circuit
        .x(1)
        .unwrap()
        .custom_ctrl(&registry, "custom_rx", &[PI], &[1], &[0])
        .unwrap();
    assert_eq!(run(&circuit).await.get("11"), 1000);
}

#[tokio::test]
async fn test_multi_parameter_generator() {
    let registry = OperationRegistry::new();
    registry
        .register_generator("u3", 1, 3, |p: &[f64]| {
            let (theta, phi, lambda) = (p[0], p[1], p[2]);
            let (cos, sin) = ((theta / 2.0).cos(), (theta / 2.0).sin());
            array![
                [c(cos, 0.0), -Complex64::from_polar(sin, lambda)],
                [
                    Complex64::from_polar(sin, phi),
                    Complex64::from_polar(cos, phi + lambda)
                ]
            ]
        })
        .unwrap();

    let mut circuit = Circuit::new(1);
    circuit.custom(&registry, "u3", &[PI, 0.0, PI], &[0]).unwrap();
    assert_eq!(run(&circuit).await.get("1"), 1000);

    let err = Circuit::new(1)
        .custom(&registry, "u3", &[PI, 0.0], &[0])
        .unwrap_err();
    assert!(matches!(err, HandleError::InvalidOperation(_)));
}

#[test]
fn test_non_unitary_matrix_is_rejected() {
    let registry = OperationRegistry::new();
    let err = registry
        .register_matrix("shear", 1, array![[c(1.0, 0.0), c(1.0, 0.0)], [c(0.0, 0.0), c(1.0, 0.0)]])
        .unwrap_err();
    assert!(matches!(err, HandleError::InvalidOperation(_)));
    assert!(!registry.contains("shear"));

    let err = registry
        .register_matrix("wide", 1, Matrix::eye(4))
        .unwrap_err();
    assert!(matches!(err, HandleError::InvalidOperation(_)));
}

#[test]
fn test_non_unitary_generator_fails_at_use() {
    let registry = OperationRegistry::new();
    registry
        .register_generator("scale", 1, 1, |p: &[f64]| Matrix::eye(2).mapv(|e| e * p[0]))
        .unwrap();

    let mut circuit = Circuit::new(1);
    assert!(circuit.custom(&registry, "scale", &[1.0], &[0]).is_ok());
    assert!(matches!(
        circuit.custom(&registry, "scale", &[2.0], &[0]),
        Err(HandleError::InvalidOperation(_))
    ));
    assert_eq!(circuit.instructions().len(), 1);
}

#[test]
fn test_unsupported_attribute() {
    let registry = registry();
    let err = Circuit::new(2)
        .custom_attr(&registry, "custom_x", "foo", &[], &[0], &[1])
        .unwrap_err();
    match err {
        HandleError::UnsupportedOperationAttribute {
            operation,
            attribute,
        } => {
            assert_eq!(operation, "custom_x");
            assert_eq!(attribute, "foo");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!("foo".parse::<OperationAttribute>().is_err());
}

#[test]
fn test_unknown_and_duplicate_names() {
    let registry = registry();
    assert!(matches!(
        Circuit::new(1).custom(&registry, "custom_y", &[], &[0]),
        Err(HandleError::UnknownOperation(_))
    ));
    assert!(matches!(
        registry.register_matrix("custom_x", 1, Matrix::eye(2)),
        Err(HandleError::InvalidOperation(_))
    ));

    registry.clear();
    assert!(registry.is_empty());
    registry.register_matrix("custom_x", 1, Matrix::eye(2)).unwrap();
    assert_eq!(registry.names(), vec!["custom_x".to_string()]);
}

#[test]
fn test_operand_counts_are_checked() {
    let registry = registry();
    assert!(matches!(
        Circuit::new(2).custom(&registry, "custom_x", &[], &[0, 1]),
        Err(HandleError::InvalidOperation(_))
    ));
    assert!(matches!(
        Circuit::new(2).custom_ctrl(&registry, "custom_x", &[], &[], &[1]),
        Err(HandleError::InvalidOperation(_))
    ));
    assert!(matches!(
        Circuit::new(2).custom_attr(&registry, "custom_s", "adj", &[], &[0], &[1]),
        Err(HandleError::InvalidOperation(_))
    ));
}

#[test]
fn test_adjoint_of_adjoint_is_base() {
    let registry = registry();
    for (name, params) in [("custom_s", vec![]), ("custom_rx", vec![0.7])] {
        let op = registry.resolve(name).unwrap();
        let base = op.matrix(&params).unwrap();
        let adjoint = op.derive_adjoint().evaluate(&params).unwrap();

        assert_close(&dagger(&adjoint), &base);
        let product = adjoint.dot(&*base);
        assert_close(&product, &Matrix::eye(2));
    }
}

#[tokio::test]
async fn test_unitary_without_qubit_count() {
    let registry = OperationRegistry::new();
    let (o, l) = (c(0.0, 0.0), c(1.0, 0.0));
    registry
        .register_unitary("swap", array![[l, o, o, o], [o, o, l, o], [o, l, o, o], [o, o, o, l]])
        .unwrap();

    let mut circuit = Circuit::new(2);
    circuit.x(0).unwrap().custom(&registry, "swap", &[], &[0, 1]).unwrap();
    assert_eq!(run(&circuit).await.get("10"), 1000);
}
