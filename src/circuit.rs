//! Minimal circuit model consumed by execution services.
//!
//! A [`Circuit`] is a qubit count plus an ordered instruction list. Custom
//! operations are resolved through an [`OperationRegistry`] while the circuit
//! is built, so by the time a circuit reaches a service every instruction
//! carries a concrete matrix.
//!
//! Operand convention for matrices: the first operand of an instruction is
//! the most-significant bit of the matrix index. For a controlled operation
//! the controls come first, followed by the targets.
//!
//! All qubits are measured in the computational basis at the end of
//! execution.

use std::f64::consts::{FRAC_1_SQRT_2, PI};
use std::sync::Arc;

use ndarray::array;
use num_complex::Complex64;

use crate::error::{HandleError, HandleResult};
use crate::observable::{PauliOp, PauliWord};
use crate::registry::{Matrix, OperationAttribute, OperationRegistry};

/// A gate applied by one instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Gate {
    /// Pauli-X.
    X,
    /// Pauli-Y.
    Y,
    /// Pauli-Z.
    Z,
    /// Hadamard.
    H,
    /// Phase gate, √Z.
    S,
    /// Adjoint of S.
    Sdg,
    /// π/8 gate.
    T,
    /// Adjoint of T.
    Tdg,
    /// Rotation about X.
    Rx(f64),
    /// Rotation about Y.
    Ry(f64),
    /// Rotation about Z.
    Rz(f64),
    /// Phase shift on |1⟩.
    R1(f64),
    /// Controlled-X (control, target).
    CX,
    /// Controlled-Z.
    CZ,
    /// Swap.
    Swap,
    /// Explicit unitary, e.g. a resolved custom operation.
    Unitary {
        /// Display name, including any derived-form suffix.
        label: String,
        /// The 2^n × 2^n matrix.
        matrix: Arc<Matrix>,
    },
}

impl Gate {
    /// Name of the gate.
    pub fn name(&self) -> &str {
        match self {
            Gate::X => "x",
            Gate::Y => "y",
            Gate::Z => "z",
            Gate::H => "h",
            Gate::S => "s",
            Gate::Sdg => "sdg",
            Gate::T => "t",
            Gate::Tdg => "tdg",
            Gate::Rx(_) => "rx",
            Gate::Ry(_) => "ry",
            Gate::Rz(_) => "rz",
            Gate::R1(_) => "r1",
            Gate::CX => "cx",
            Gate::CZ => "cz",
            Gate::Swap => "swap",
            Gate::Unitary { label, .. } => label,
        }
    }

    /// Number of operands.
    pub fn num_qubits(&self) -> usize {
        match self {
            Gate::CX | Gate::CZ | Gate::Swap => 2,
            Gate::Unitary { matrix, .. } => matrix.nrows().trailing_zeros() as usize,
            _ => 1,
        }
    }

    /// The gate's unitary matrix.
    pub fn matrix(&self) -> Matrix {
        let c = |re: f64, im: f64| Complex64::new(re, im);
        let zero = c(0.0, 0.0);
        let one = c(1.0, 0.0);
        match self {
            Gate::X => array![[zero, one], [one, zero]],
            Gate::Y => array![[zero, c(0.0, -1.0)], [c(0.0, 1.0), zero]],
            Gate::Z => array![[one, zero], [zero, -one]],
            Gate::H => {
                let h = c(FRAC_1_SQRT_2, 0.0);
                array![[h, h], [h, -h]]
            }
            Gate::S => array![[one, zero], [zero, c(0.0, 1.0)]],
            Gate::Sdg => array![[one, zero], [zero, c(0.0, -1.0)]],
            Gate::T => array![[one, zero], [zero, Complex64::from_polar(1.0, PI / 4.0)]],
            Gate::Tdg => array![[one, zero], [zero, Complex64::from_polar(1.0, -PI / 4.0)]],
            Gate::Rx(theta) => {
                let (s, co) = (theta / 2.0).sin_cos();
                array![[c(co, 0.0), c(0.0, -s)], [c(0.0, -s), c(co, 0.0)]]
            }
            Gate::Ry(theta) => {
                let (s, co) = (theta / 2.0).sin_cos();
                array![[c(co, 0.0), c(-s, 0.0)], [c(s, 0.0), c(co, 0.0)]]
            }
            Gate::Rz(theta) => array![
                [Complex64::from_polar(1.0, -theta / 2.0), zero],
                [zero, Complex64::from_polar(1.0, theta / 2.0)]
            ],
            Gate::R1(theta) => array![[one, zero], [zero, Complex64::from_polar(1.0, *theta)]],
            Gate::CX => array![
                [one, zero, zero, zero],
                [zero, one, zero, zero],
                [zero, zero, zero, one],
                [zero, zero, one, zero]
            ],
            Gate::CZ => array![
                [one, zero, zero, zero],
                [zero, one, zero, zero],
                [zero, zero, one, zero],
                [zero, zero, zero, -one]
            ],
            Gate::Swap => array![
                [one, zero, zero, zero],
                [zero, zero, one, zero],
                [zero, one, zero, zero],
                [zero, zero, zero, one]
            ],
            Gate::Unitary { matrix, .. } => matrix.as_ref().clone(),
        }
    }
}

/// A gate bound to operand qubits.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// The gate.
    pub gate: Gate,
    /// Operand qubits, most-significant matrix bit first.
    pub qubits: Vec<u32>,
}

/// A fixed-width quantum circuit.
#[derive(Debug, Clone, PartialEq)]
pub struct Circuit {
    num_qubits: u32,
    instructions: Vec<Instruction>,
}

impl Circuit {
    /// Create an empty circuit on `num_qubits` qubits, all starting in |0⟩.
    pub fn new(num_qubits: u32) -> Self {
        Self {
            num_qubits,
            instructions: Vec::new(),
        }
    }

    /// Number of qubits.
    pub fn num_qubits(&self) -> u32 {
        self.num_qubits
    }

    /// Instructions in application order.
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Append a gate after checking its operands.
    pub fn push(&mut self, gate: Gate, qubits: &[u32]) -> HandleResult<&mut Self> {
        if qubits.len() != gate.num_qubits() {
            return Err(HandleError::InvalidOperation(format!(
                "gate '{}' acts on {} qubits, got {}",
                gate.name(),
                gate.num_qubits(),
                qubits.len()
            )));
        }
        for (i, q) in qubits.iter().enumerate() {
            if *q >= self.num_qubits {
                return Err(HandleError::InvalidOperation(format!(
                    "qubit {q} out of range for a {}-qubit circuit",
                    self.num_qubits
                )));
            }
            if qubits[..i].contains(q) {
                return Err(HandleError::InvalidOperation(format!(
                    "qubit {q} used twice by gate '{}'",
                    gate.name()
                )));
            }
        }
        self.instructions.push(Instruction {
            gate,
            qubits: qubits.to_vec(),
        });
        Ok(self)
    }

    /// Apply X.
    pub fn x(&mut self, q: u32) -> HandleResult<&mut Self> {
        self.push(Gate::X, &[q])
    }

    /// Apply Y.
    pub fn y(&mut self, q: u32) -> HandleResult<&mut Self> {
        self.push(Gate::Y, &[q])
    }

    /// Apply Z.
    pub fn z(&mut self, q: u32) -> HandleResult<&mut Self> {
        self.push(Gate::Z, &[q])
    }

    /// Apply H.
    pub fn h(&mut self, q: u32) -> HandleResult<&mut Self> {
        self.push(Gate::H, &[q])
    }

    /// Apply S.
    pub fn s(&mut self, q: u32) -> HandleResult<&mut Self> {
        self.push(Gate::S, &[q])
    }

    /// Apply S†.
    pub fn sdg(&mut self, q: u32) -> HandleResult<&mut Self> {
        self.push(Gate::Sdg, &[q])
    }

    /// Apply T.
    pub fn t(&mut self, q: u32) -> HandleResult<&mut Self> {
        self.push(Gate::T, &[q])
    }

    /// Apply T†.
    pub fn tdg(&mut self, q: u32) -> HandleResult<&mut Self> {
        self.push(Gate::Tdg, &[q])
    }

    /// Apply Rx(θ).
    pub fn rx(&mut self, theta: f64, q: u32) -> HandleResult<&mut Self> {
        self.push(Gate::Rx(theta), &[q])
    }

    /// Apply Ry(θ).
    pub fn ry(&mut self, theta: f64, q: u32) -> HandleResult<&mut Self> {
        self.push(Gate::Ry(theta), &[q])
    }

    /// Apply Rz(θ).
    pub fn rz(&mut self, theta: f64, q: u32) -> HandleResult<&mut Self> {
        self.push(Gate::Rz(theta), &[q])
    }

    /// Apply R1(θ).
    pub fn r1(&mut self, theta: f64, q: u32) -> HandleResult<&mut Self> {
        self.push(Gate::R1(theta), &[q])
    }

    /// Apply CX.
    pub fn cx(&mut self, control: u32, target: u32) -> HandleResult<&mut Self> {
        self.push(Gate::CX, &[control, target])
    }

    /// Apply CZ.
    pub fn cz(&mut self, q0: u32, q1: u32) -> HandleResult<&mut Self> {
        self.push(Gate::CZ, &[q0, q1])
    }

    /// Apply Swap.
    pub fn swap(&mut self, q0: u32, q1: u32) -> HandleResult<&mut Self> {
        self.push(Gate::Swap, &[q0, q1])
    }

    /// Append an explicit unitary.
    pub fn unitary(
        &mut self,
        label: impl Into<String>,
        matrix: Arc<Matrix>,
        qubits: &[u32],
    ) -> HandleResult<&mut Self> {
        let dim = matrix.nrows();
        if !matrix.is_square() || !dim.is_power_of_two() {
            return Err(HandleError::InvalidOperation(format!(
                "unitary is {}x{}, expected a 2^n square matrix",
                matrix.nrows(),
                matrix.ncols()
            )));
        }
        let label = label.into();
        self.push(Gate::Unitary { label, matrix }, qubits)
    }

    /// Apply a registered custom operation.
    pub fn custom(
        &mut self,
        registry: &OperationRegistry,
        name: &str,
        params: &[f64],
        qubits: &[u32],
    ) -> HandleResult<&mut Self> {
        self.apply_custom(registry, name, OperationAttribute::Base, params, &[], qubits)
    }

    /// Apply the controlled form of a registered custom operation.
    pub fn custom_ctrl(
        &mut self,
        registry: &OperationRegistry,
        name: &str,
        params: &[f64],
        controls: &[u32],
        targets: &[u32],
    ) -> HandleResult<&mut Self> {
        self.apply_custom(registry, name, OperationAttribute::Control, params, controls, targets)
    }

    /// Apply the adjoint of a registered custom operation.
    pub fn custom_adj(
        &mut self,
        registry: &OperationRegistry,
        name: &str,
        params: &[f64],
        qubits: &[u32],
    ) -> HandleResult<&mut Self> {
        self.apply_custom(registry, name, OperationAttribute::Adjoint, params, &[], qubits)
    }

    /// Apply a custom operation through a named attribute (`""`, `"ctrl"`, `"adj"`).
    pub fn custom_attr(
        &mut self,
        registry: &OperationRegistry,
        name: &str,
        attribute: &str,
        params: &[f64],
        controls: &[u32],
        targets: &[u32],
    ) -> HandleResult<&mut Self> {
        let attribute = OperationAttribute::parse(name, attribute)?;
        self.apply_custom(registry, name, attribute, params, controls, targets)
    }

    fn apply_custom(
        &mut self,
        registry: &OperationRegistry,
        name: &str,
        attribute: OperationAttribute,
        params: &[f64],
        controls: &[u32],
        targets: &[u32],
    ) -> HandleResult<&mut Self> {
        let matrix = registry.dispatch(name, attribute, params, controls.len(), targets.len())?;
        let operands: Vec<u32> = controls.iter().chain(targets).copied().collect();
        self.unitary(attribute.label(name), matrix, &operands)
    }

    /// A copy of this circuit with the rotations that map `basis` onto Z
    /// appended (X → H, Y → S†·H).
    pub fn with_basis_rotation(&self, basis: &PauliWord) -> HandleResult<Self> {
        let mut rotated = self.clone();
        for &(qubit, op) in basis.ops() {
            if qubit >= self.num_qubits {
                return Err(HandleError::InvalidObservable(format!(
                    "basis {basis} acts on qubit {qubit} but the circuit has {} qubits",
                    self.num_qubits
                )));
            }
            match op {
                PauliOp::X => {
                    rotated.h(qubit)?;
                }
                PauliOp::Y => {
                    rotated.sdg(qubit)?.h(qubit)?;
                }
                PauliOp::Z | PauliOp::I => {}
            }
        }
        Ok(rotated)
    }
}
