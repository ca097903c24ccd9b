//! Observables as weighted sums of Pauli words.
//!
//! An observable is
//!
//!   O = Σ_k  c_k · P_k
//!
//! where each P_k is a tensor product of single-qubit Pauli operators and
//! c_k ∈ ℂ. Each distinct P_k is measured by one remote job after rotating
//! its qubits into the computational basis.
//!
//! # Basis labels
//!
//! A [`PauliWord`] parses from two label forms:
//!
//! - positional: `"XX"`, `"IZY"`, where character *i* acts on qubit *i*;
//! - indexed: `"Z0"`, `"X0X1"`, `"Y3Z10"`.
//!
//! `"I"` and `""` are the identity. Labels always print in the canonical
//! indexed form (identity prints as `"I"`), so the label alphabet is
//! `[IXYZ0-9]`.

use std::fmt;
use std::str::FromStr;

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::error::{HandleError, HandleResult};

/// Single-qubit Pauli operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PauliOp {
    /// Identity.
    I,
    /// Pauli-X.
    X,
    /// Pauli-Y.
    Y,
    /// Pauli-Z.
    Z,
}

impl PauliOp {
    fn from_char(c: char) -> Option<Self> {
        match c {
            'I' => Some(Self::I),
            'X' => Some(Self::X),
            'Y' => Some(Self::Y),
            'Z' => Some(Self::Z),
            _ => None,
        }
    }

    fn as_char(self) -> char {
        match self {
            Self::I => 'I',
            Self::X => 'X',
            Self::Y => 'Y',
            Self::Z => 'Z',
        }
    }
}

/// A tensor product of Pauli operators on indexed qubits.
///
/// Stored sorted by qubit with identities omitted, so two words acting the
/// same way compare equal regardless of how their labels were written.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PauliWord {
    ops: Vec<(u32, PauliOp)>,
}

impl PauliWord {
    /// The identity word.
    pub fn identity() -> Self {
        Self::default()
    }

    /// Build a word from (qubit, op) pairs, rejecting repeated qubits.
    pub fn from_ops(ops: impl IntoIterator<Item = (u32, PauliOp)>) -> HandleResult<Self> {
        let mut v: Vec<(u32, PauliOp)> = ops
            .into_iter()
            .filter(|(_, op)| *op != PauliOp::I)
            .collect();
        if v.iter().any(|&(q, _)| q == u32::MAX) {
            return Err(HandleError::InvalidObservable(format!(
                "qubit index {} is out of range",
                u32::MAX
            )));
        }
        v.sort_by_key(|(q, _)| *q);
        if let Some(pair) = v.windows(2).find(|w| w[0].0 == w[1].0) {
            return Err(HandleError::InvalidObservable(format!(
                "qubit {} appears more than once",
                pair[0].0
            )));
        }
        Ok(Self { ops: v })
    }

    /// Non-identity (qubit, op) pairs, sorted by qubit.
    pub fn ops(&self) -> &[(u32, PauliOp)] {
        &self.ops
    }

    /// Qubits whose measured parity determines this word's eigenvalue.
    pub fn qubits(&self) -> Vec<u32> {
        self.ops.iter().map(|(q, _)| *q).collect()
    }

    /// True if no measurement is needed to evaluate this word.
    pub fn is_identity(&self) -> bool {
        self.ops.is_empty()
    }

    /// Highest referenced qubit, or `None` for the identity.
    pub fn max_qubit(&self) -> Option<u32> {
        self.ops.last().map(|(q, _)| *q)
    }
}

impl FromStr for PauliWord {
    type Err = HandleError;

    fn from_str(label: &str) -> HandleResult<Self> {
        let invalid = |why: &str| HandleError::InvalidObservable(format!("basis '{label}': {why}"));

        if label.chars().any(|c| c.is_ascii_digit()) {
            let mut ops = Vec::new();
            let mut chars = label.chars().peekable();
            while let Some(c) = chars.next() {
                let op = PauliOp::from_char(c).ok_or_else(|| invalid("expected I, X, Y or Z"))?;
                let mut digits = String::new();
                while let Some(d) = chars.next_if(char::is_ascii_digit) {
                    digits.push(d);
                }
                let qubit = digits
                    .parse::<u32>()
                    .map_err(|_| invalid("every operator needs a qubit index"))?;
                ops.push((qubit, op));
            }
            Self::from_ops(ops)
        } else {
            let ops = label
                .chars()
                .enumerate()
                .map(|(i, c)| {
                    let op = PauliOp::from_char(c).ok_or_else(|| invalid("expected I, X, Y or Z"))?;
                    let qubit = u32::try_from(i).map_err(|_| invalid("label too long"))?;
                    Ok((qubit, op))
                })
                .collect::<HandleResult<Vec<_>>>()?;
            Self::from_ops(ops)
        }
    }
}

impl fmt::Display for PauliWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ops.is_empty() {
            return write!(f, "I");
        }
        for (qubit, op) in &self.ops {
            write!(f, "{}{qubit}", op.as_char())?;
        }
        Ok(())
    }
}

impl TryFrom<String> for PauliWord {
    type Error = HandleError;

    fn try_from(label: String) -> HandleResult<Self> {
        label.parse()
    }
}

impl From<PauliWord> for String {
    fn from(word: PauliWord) -> Self {
        word.to_string()
    }
}

/// One weighted term of an observable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementTerm {
    /// Weight applied to the term's expectation value.
    pub coefficient: Complex64,
    /// Measurement basis of the term.
    pub basis: PauliWord,
}

impl MeasurementTerm {
    /// Create a term.
    pub fn new(coefficient: Complex64, basis: PauliWord) -> Self {
        Self { coefficient, basis }
    }

    /// Create a term with a real coefficient.
    pub fn real(coefficient: f64, basis: PauliWord) -> Self {
        Self::new(Complex64::new(coefficient, 0.0), basis)
    }

    /// Create a real-weighted term from a basis label.
    pub fn parse(coefficient: f64, label: &str) -> HandleResult<Self> {
        Ok(Self::real(coefficient, label.parse()?))
    }
}

/// An ordered list of measurement terms.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Observable {
    terms: Vec<MeasurementTerm>,
}

impl Observable {
    /// Create from a list of terms.
    pub fn from_terms(terms: Vec<MeasurementTerm>) -> Self {
        Self { terms }
    }

    /// Create from `(coefficient, label)` pairs.
    pub fn from_labels<'a>(pairs: impl IntoIterator<Item = (f64, &'a str)>) -> HandleResult<Self> {
        let terms = pairs
            .into_iter()
            .map(|(c, label)| MeasurementTerm::parse(c, label))
            .collect::<HandleResult<Vec<_>>>()?;
        Ok(Self { terms })
    }

    /// All terms, in insertion order.
    pub fn terms(&self) -> &[MeasurementTerm] {
        &self.terms
    }

    /// Number of terms.
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    /// True if there are no terms.
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Non-identity bases in order of first appearance, without repeats.
    pub fn distinct_bases(&self) -> Vec<PauliWord> {
        let mut bases: Vec<PauliWord> = Vec::new();
        for term in &self.terms {
            if !term.basis.is_identity() && !bases.contains(&term.basis) {
                bases.push(term.basis.clone());
            }
        }
        bases
    }

    /// Summed coefficient of every term measured in `basis`.
    pub fn coefficient_for(&self, basis: &PauliWord) -> Complex64 {
        self.terms
            .iter()
            .filter(|t| &t.basis == basis)
            .map(|t| t.coefficient)
            .sum()
    }

    /// Minimum register size the observable needs (0 if identity-only).
    pub fn num_qubits(&self) -> u32 {
        self.terms
            .iter()
            .filter_map(|t| t.basis.max_qubit())
            .max()
            .map_or(0, |q| q.saturating_add(1))
    }
}
