//! QPU Handles: persistable, asynchronous handles to remote quantum jobs
//!
//! This crate lets a caller submit work to a queued quantum execution service,
//! walk away, and collect results later, possibly from another process:
//!
//! - [`JobHandle`] wraps one sampling job: submit, serialize, deserialize,
//!   and `get()` the measurement [`Counts`].
//! - [`AggregateHandle`] measures an [`Observable`] by submitting one job per
//!   distinct measurement basis and combining them into an
//!   [`AggregateResult`] (expectation value and standard error).
//! - [`OperationRegistry`] holds user-defined unitaries ([`CustomOperation`])
//!   whose controlled and adjoint forms are derived on demand.
//!
//! Any backend implements the [`ExecutionService`] trait. [`LocalService`] is
//! an in-process noiseless simulator with the same queued behavior.
//!
//! # Lifecycle
//!
//! ```text
//!   submit() ──→ serialize() ──→ (store, restart, ...) ──→ deserialize() ──→ get()
//!   (queued)     (text)                                    (no service call)  (poll + fetch)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use qpu_handles::{Circuit, JobHandle, LocalService, local::DEFAULT_TARGET};
//!
//! # async fn run() -> qpu_handles::HandleResult<()> {
//! let service = Arc::new(LocalService::new());
//! let mut circuit = Circuit::new(2);
//! circuit.h(0)?.cx(0, 1)?;
//!
//! let handle = JobHandle::submit(service.clone(), &circuit, 1000, DEFAULT_TARGET).await?;
//! let text = handle.serialize();
//!
//! let mut restored = JobHandle::deserialize(&text, service)?;
//! let counts = restored.get().await?;
//! assert_eq!(counts.total_shots(), 1000);
//! # Ok(())
//! # }
//! ```

pub mod aggregate;
pub mod circuit;
pub mod config;
pub mod error;
pub mod format;
pub mod handle;
pub mod job;
pub mod local;
pub mod observable;
pub mod registry;
pub mod result;
pub mod service;

pub use aggregate::{AggregateHandle, AggregateResult, TermEstimate, observe};
pub use circuit::{Circuit, Gate, Instruction};
pub use config::RetrievalConfig;
pub use error::{HandleError, HandleResult};
pub use handle::{HandleState, JobHandle, sample};
pub use job::{JobId, JobRecord, JobStatus};
pub use local::{LocalService, SamplingMode};
pub use observable::{MeasurementTerm, Observable, PauliOp, PauliWord};
pub use registry::{CustomOperation, Matrix, OperationAttribute, OperationRegistry, UnitarySource};
pub use result::{Counts, ExecutionResult};
pub use service::ExecutionService;
