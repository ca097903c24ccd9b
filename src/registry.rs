//! Registry of user-defined unitary operations.
//!
//! A [`CustomOperation`] is either a fixed matrix or a generator mapping a
//! parameter vector to a matrix. Fixed matrices are validated when they are
//! registered; generators are validated each time they are invoked, which
//! first happens when a circuit using them is built.
//!
//! Derived forms (controlled, adjoint) are never registered separately. They
//! are computed from the base definition on first use and cached on it.
//!
//! Re-registering an existing name is rejected. Call
//! [`OperationRegistry::clear`] to start a fresh session.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use ndarray::{Array2, s};
use num_complex::Complex64;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::{HandleError, HandleResult};

/// A dense complex matrix, row-major.
pub type Matrix = Array2<Complex64>;

/// Maximum per-entry deviation of U†U from the identity.
pub const UNITARY_TOLERANCE: f64 = 1e-8;

/// Largest register a custom operation (including controls) may span.
pub const MAX_OPERATION_QUBITS: usize = 16;

type GeneratorFn = dyn Fn(&[f64]) -> HandleResult<Matrix> + Send + Sync;

/// Where an operation's matrix comes from.
#[derive(Clone)]
pub enum UnitarySource {
    /// A fixed matrix.
    Matrix(Arc<Matrix>),
    /// A parameter vector → matrix function.
    Generator(Arc<GeneratorFn>),
}

impl UnitarySource {
    /// Wrap a fixed matrix.
    pub fn matrix(matrix: Matrix) -> Self {
        Self::Matrix(Arc::new(matrix))
    }

    /// Wrap a generator function.
    pub fn generator<F>(f: F) -> Self
    where
        F: Fn(&[f64]) -> Matrix + Send + Sync + 'static,
    {
        Self::Generator(Arc::new(move |params: &[f64]| -> HandleResult<Matrix> {
            Ok(f(params))
        }))
    }

    /// True for generator-backed sources.
    pub fn is_parameterized(&self) -> bool {
        matches!(self, Self::Generator(_))
    }

    /// Evaluate the source. Fixed matrices ignore `params`.
    pub fn evaluate(&self, params: &[f64]) -> HandleResult<Arc<Matrix>> {
        match self {
            Self::Matrix(m) => Ok(Arc::clone(m)),
            Self::Generator(f) => f(params).map(Arc::new),
        }
    }
}

impl From<Matrix> for UnitarySource {
    fn from(matrix: Matrix) -> Self {
        Self::matrix(matrix)
    }
}

impl fmt::Debug for UnitarySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Matrix(m) => f.debug_tuple("Matrix").field(&m.dim()).finish(),
            Self::Generator(_) => f.write_str("Generator(..)"),
        }
    }
}

/// Build a matrix from rows, rejecting ragged input.
pub fn matrix_from_rows(rows: Vec<Vec<Complex64>>) -> HandleResult<Matrix> {
    let nrows = rows.len();
    let ncols = rows.first().map_or(0, Vec::len);
    if rows.iter().any(|r| r.len() != ncols) {
        return Err(HandleError::InvalidOperation(
            "matrix rows have different lengths".into(),
        ));
    }
    let flat: Vec<Complex64> = rows.into_iter().flatten().collect();
    Array2::from_shape_vec((nrows, ncols), flat)
        .map_err(|e| HandleError::InvalidOperation(e.to_string()))
}

/// Conjugate transpose.
pub fn dagger(matrix: &Matrix) -> Matrix {
    matrix.t().mapv(|c| c.conj())
}

/// Block-diagonal extension by `num_controls` leading control qubits:
/// identity on every branch except all-controls-set, where `base` acts.
pub fn controlled(base: &Matrix, num_controls: usize) -> Matrix {
    let d = base.nrows();
    let total = d << num_controls;
    let mut m = Matrix::eye(total);
    m.slice_mut(s![total - d.., total - d..]).assign(base);
    m
}

fn check_unitary(name: &str, matrix: &Matrix, num_qubits: usize) -> HandleResult<()> {
    let dim = 1usize << num_qubits;
    if matrix.nrows() != dim || matrix.ncols() != dim {
        return Err(HandleError::InvalidOperation(format!(
            "'{name}' acts on {num_qubits} qubit(s) and needs a {dim}x{dim} matrix, got {}x{}",
            matrix.nrows(),
            matrix.ncols()
        )));
    }
    if matrix.iter().any(|c| !c.re.is_finite() || !c.im.is_finite()) {
        return Err(HandleError::InvalidOperation(format!(
            "'{name}' matrix contains NaN or infinite entries"
        )));
    }
    let product = dagger(matrix).dot(matrix);
    let deviation = product
        .indexed_iter()
        .map(|((i, j), c)| {
            let expected = if i == j { 1.0 } else { 0.0 };
            (c - Complex64::new(expected, 0.0)).norm()
        })
        .fold(0.0, f64::max);
    if deviation > UNITARY_TOLERANCE {
        return Err(HandleError::InvalidOperation(format!(
            "'{name}' is not unitary (max deviation of U\u{2020}U from I is {deviation:.2e})"
        )));
    }
    Ok(())
}

/// Requested form of a custom operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationAttribute {
    /// The operation itself.
    Base,
    /// Controlled by one or more leading qubits.
    Control,
    /// Conjugate transpose.
    Adjoint,
}

impl OperationAttribute {
    /// Parse an attribute requested on operation `operation`.
    pub fn parse(operation: &str, attribute: &str) -> HandleResult<Self> {
        attribute
            .parse()
            .map_err(|_| HandleError::UnsupportedOperationAttribute {
                operation: operation.to_string(),
                attribute: attribute.to_string(),
            })
    }

    /// Instruction label for this form of `name`.
    pub fn label(self, name: &str) -> String {
        match self {
            Self::Base => name.to_string(),
            Self::Control => format!("{name}.ctrl"),
            Self::Adjoint => format!("{name}.adj"),
        }
    }
}

impl FromStr for OperationAttribute {
    type Err = HandleError;

    fn from_str(s: &str) -> HandleResult<Self> {
        match s {
            "" => Ok(Self::Base),
            "ctrl" | "control" => Ok(Self::Control),
            "adj" | "adjoint" => Ok(Self::Adjoint),
            other => Err(HandleError::InvalidOperation(format!(
                "unknown operation attribute '{other}' (expected ctrl or adj)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Variant {
    Controlled(usize),
    Adjoint,
}

/// A registered operation definition.
pub struct CustomOperation {
    name: String,
    num_qubits: usize,
    num_params: usize,
    source: UnitarySource,
    variants: Mutex<FxHashMap<Variant, UnitarySource>>,
}

impl CustomOperation {
    fn new(
        name: String,
        num_qubits: usize,
        num_params: usize,
        source: UnitarySource,
    ) -> HandleResult<Self> {
        if name.is_empty() {
            return Err(HandleError::InvalidOperation(
                "operation name cannot be empty".into(),
            ));
        }
        if num_qubits == 0 || num_qubits > MAX_OPERATION_QUBITS {
            return Err(HandleError::InvalidOperation(format!(
                "'{name}' must act on 1..={MAX_OPERATION_QUBITS} qubits, got {num_qubits}"
            )));
        }
        let source = match source {
            UnitarySource::Matrix(m) => {
                if num_params != 0 {
                    return Err(HandleError::InvalidOperation(format!(
                        "'{name}' has a fixed matrix but declares {num_params} parameter(s)"
                    )));
                }
                check_unitary(&name, &m, num_qubits)?;
                UnitarySource::Matrix(m)
            }
            UnitarySource::Generator(f) => {
                let label = name.clone();
                UnitarySource::Generator(Arc::new(move |params: &[f64]| -> HandleResult<Matrix> {
                    if params.len() != num_params {
                        return Err(HandleError::InvalidOperation(format!(
                            "'{label}' takes {num_params} parameter(s), got {}",
                            params.len()
                        )));
                    }
                    let m = f(params)?;
                    check_unitary(&label, &m, num_qubits)?;
                    Ok(m)
                }))
            }
        };
        Ok(Self {
            name,
            num_qubits,
            num_params,
            source,
            variants: Mutex::new(FxHashMap::default()),
        })
    }

    /// Registered name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of target qubits.
    pub fn num_qubits(&self) -> usize {
        self.num_qubits
    }

    /// Number of parameters the generator expects.
    pub fn num_params(&self) -> usize {
        self.num_params
    }

    /// The validated base source.
    pub fn source(&self) -> &UnitarySource {
        &self.source
    }

    /// Evaluate the base matrix for `params`.
    pub fn matrix(&self, params: &[f64]) -> HandleResult<Arc<Matrix>> {
        if !self.source.is_parameterized() && !params.is_empty() {
            return Err(HandleError::InvalidOperation(format!(
                "'{}' takes no parameters, got {}",
                self.name,
                params.len()
            )));
        }
        self.source.evaluate(params)
    }

    /// The operation controlled by `num_controls` leading qubits.
    ///
    /// Fixed matrices yield the block-diagonal extension; generators yield a
    /// generator that builds the block once parameters are bound. Zero
    /// controls return the base.
    pub fn derive_controlled(&self, num_controls: usize) -> HandleResult<UnitarySource> {
        if num_controls == 0 {
            return Ok(self.source.clone());
        }
        if self.num_qubits + num_controls > MAX_OPERATION_QUBITS {
            return Err(HandleError::InvalidOperation(format!(
                "'{}' with {num_controls} control(s) exceeds {MAX_OPERATION_QUBITS} qubits",
                self.name
            )));
        }
        Ok(self.variant(Variant::Controlled(num_controls), || match &self.source {
            UnitarySource::Matrix(m) => UnitarySource::matrix(controlled(m, num_controls)),
            UnitarySource::Generator(f) => {
                let f = Arc::clone(f);
                UnitarySource::Generator(Arc::new(move |params: &[f64]| -> HandleResult<Matrix> {
                    Ok(controlled(&f(params)?, num_controls))
                }))
            }
        }))
    }

    /// The conjugate transpose of the operation.
    pub fn derive_adjoint(&self) -> UnitarySource {
        self.variant(Variant::Adjoint, || match &self.source {
            UnitarySource::Matrix(m) => UnitarySource::matrix(dagger(m)),
            UnitarySource::Generator(f) => {
                let f = Arc::clone(f);
                UnitarySource::Generator(Arc::new(move |params: &[f64]| -> HandleResult<Matrix> {
                    Ok(dagger(&f(params)?))
                }))
            }
        })
    }

    fn variant(&self, key: Variant, derive: impl FnOnce() -> UnitarySource) -> UnitarySource {
        let mut variants = self.variants.lock().unwrap_or_else(PoisonError::into_inner);
        variants
            .entry(key)
            .or_insert_with(|| {
                debug!("Deriving {:?} of '{}'", key, self.name);
                derive()
            })
            .clone()
    }
}

impl fmt::Debug for CustomOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomOperation")
            .field("name", &self.name)
            .field("num_qubits", &self.num_qubits)
            .field("num_params", &self.num_params)
            .field("source", &self.source)
            .finish()
    }
}

/// Session-scoped store of custom operations.
///
/// Shared by reference (typically behind an `Arc`) between circuit builders.
/// Registration of distinct names may happen concurrently; registration of
/// the same name is serialized by the write lock and only the first wins.
#[derive(Debug, Default)]
pub struct OperationRegistry {
    ops: RwLock<FxHashMap<String, Arc<CustomOperation>>>,
}

impl OperationRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and store an operation.
    pub fn register(
        &self,
        name: impl Into<String>,
        num_qubits: usize,
        num_params: usize,
        source: impl Into<UnitarySource>,
    ) -> HandleResult<Arc<CustomOperation>> {
        let op = Arc::new(CustomOperation::new(
            name.into(),
            num_qubits,
            num_params,
            source.into(),
        )?);

        let mut ops = self.ops.write().unwrap_or_else(PoisonError::into_inner);
        if ops.contains_key(op.name()) {
            return Err(HandleError::InvalidOperation(format!(
                "an operation named '{}' is already registered",
                op.name()
            )));
        }
        debug!(
            "Registered operation '{}' ({} qubits, {} params)",
            op.name(),
            op.num_qubits(),
            op.num_params()
        );
        ops.insert(op.name().to_string(), Arc::clone(&op));
        Ok(op)
    }

    /// Register a fixed matrix.
    pub fn register_matrix(
        &self,
        name: impl Into<String>,
        num_qubits: usize,
        matrix: Matrix,
    ) -> HandleResult<Arc<CustomOperation>> {
        self.register(name, num_qubits, 0, UnitarySource::matrix(matrix))
    }

    /// Register a fixed matrix, taking the qubit count from its side length.
    pub fn register_unitary(
        &self,
        name: impl Into<String>,
        matrix: Matrix,
    ) -> HandleResult<Arc<CustomOperation>> {
        let name = name.into();
        let (rows, cols) = matrix.dim();
        if rows != cols || rows < 2 || !rows.is_power_of_two() {
            return Err(HandleError::InvalidOperation(format!(
                "'{name}' needs a square matrix with a power-of-two side, got {rows}x{cols}"
            )));
        }
        let num_qubits = rows.trailing_zeros() as usize;
        self.register_matrix(name, num_qubits, matrix)
    }

    /// Register a parameterized generator.
    pub fn register_generator<F>(
        &self,
        name: impl Into<String>,
        num_qubits: usize,
        num_params: usize,
        generator: F,
    ) -> HandleResult<Arc<CustomOperation>>
    where
        F: Fn(&[f64]) -> Matrix + Send + Sync + 'static,
    {
        self.register(name, num_qubits, num_params, UnitarySource::generator(generator))
    }

    /// Look up an operation by name.
    pub fn resolve(&self, name: &str) -> HandleResult<Arc<CustomOperation>> {
        self.ops
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| HandleError::UnknownOperation(name.to_string()))
    }

    /// Check if `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.ops
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .ops
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Number of registered operations.
    pub fn len(&self) -> usize {
        self.ops.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every operation.
    pub fn clear(&self) {
        self.ops.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Resolve `name` in the requested form and bind `params`.
    ///
    /// This is the only path from an attribute request to a matrix; it checks
    /// the operand counts against the definition before evaluating.
    pub fn dispatch(
        &self,
        name: &str,
        attribute: OperationAttribute,
        params: &[f64],
        num_controls: usize,
        num_targets: usize,
    ) -> HandleResult<Arc<Matrix>> {
        let op = self.resolve(name)?;
        if num_targets != op.num_qubits() {
            return Err(HandleError::InvalidOperation(format!(
                "'{name}' acts on {} qubit(s), got {num_targets} target(s)",
                op.num_qubits()
            )));
        }
        let source = match attribute {
            OperationAttribute::Base | OperationAttribute::Adjoint if num_controls > 0 => {
                return Err(HandleError::InvalidOperation(format!(
                    "control qubits given for '{}'",
                    attribute.label(name)
                )));
            }
            OperationAttribute::Base => op.source().clone(),
            OperationAttribute::Control if num_controls == 0 => {
                return Err(HandleError::InvalidOperation(format!(
                    "'{name}.ctrl' needs at least one control qubit"
                )));
            }
            OperationAttribute::Control => op.derive_controlled(num_controls)?,
            OperationAttribute::Adjoint => op.derive_adjoint(),
        };
        if !source.is_parameterized() && !params.is_empty() {
            return Err(HandleError::InvalidOperation(format!(
                "'{name}' takes no parameters, got {}",
                params.len()
            )));
        }
        source.evaluate(params)
    }
}
