//! Persisted handle format.
//!
//! A handle serializes to one line of JSON with a fixed field order:
//!
//! ```text
//! {"format":"qpu-handle/1","kind":"observe","target":"ionq","jobs":["a1","b2"],"bases":["X0X1","Z0"]}
//! ```
//!
//! `bases` only appears for observe handles and is parallel to `jobs`.
//! Coefficients are never written; the caller supplies the observable again
//! when restoring. JSON string escaping keeps any job id unambiguous.

use serde::{Deserialize, Serialize};

use crate::error::{HandleError, HandleResult};
use crate::job::JobId;
use crate::observable::PauliWord;

/// Version tag written into every handle.
pub const FORMAT_TAG: &str = "qpu-handle/1";

/// Which handle type produced the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandleKind {
    /// A single sampling job.
    Sample,
    /// One job per distinct measurement basis of an observable.
    Observe,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Envelope {
    format: String,
    kind: HandleKind,
    target: String,
    jobs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bases: Option<Vec<String>>,
}

/// Decoded contents of a persisted handle.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedHandle {
    /// Handle type.
    pub kind: HandleKind,
    /// Backend target name.
    pub target: String,
    /// Job identifiers, in submission order.
    pub jobs: Vec<JobId>,
    /// Basis of each job (observe handles only).
    pub bases: Vec<PauliWord>,
}

impl PersistedHandle {
    /// Encode to the persisted text.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let envelope = Envelope {
            format: FORMAT_TAG.to_string(),
            kind: self.kind,
            target: self.target.clone(),
            jobs: self.jobs.iter().map(|id| id.0.clone()).collect(),
            bases: match self.kind {
                HandleKind::Sample => None,
                HandleKind::Observe => Some(self.bases.iter().map(ToString::to_string).collect()),
            },
        };
        serde_json::to_string(&envelope)
    }

    /// Decode persisted text, expecting a handle of type `kind`.
    pub fn decode(text: &str, kind: HandleKind) -> HandleResult<Self> {
        let malformed = |why: String| HandleError::MalformedHandle(why);

        let envelope: Envelope =
            serde_json::from_str(text.trim()).map_err(|e| malformed(e.to_string()))?;
        if envelope.format != FORMAT_TAG {
            return Err(malformed(format!(
                "unsupported format '{}', expected '{FORMAT_TAG}'",
                envelope.format
            )));
        }
        if envelope.kind != kind {
            return Err(malformed(format!(
                "expected a {kind:?} handle, found {:?}",
                envelope.kind
            )));
        }
        if envelope.target.is_empty() {
            return Err(malformed("empty target".into()));
        }
        if envelope.jobs.iter().any(String::is_empty) {
            return Err(malformed("empty job id".into()));
        }

        let bases = match (kind, envelope.bases) {
            (HandleKind::Sample, None) => {
                if envelope.jobs.len() != 1 {
                    return Err(malformed(format!(
                        "sample handle must hold exactly one job, found {}",
                        envelope.jobs.len()
                    )));
                }
                Vec::new()
            }
            (HandleKind::Observe, Some(labels)) => {
                if labels.len() != envelope.jobs.len() {
                    return Err(malformed(format!(
                        "{} jobs but {} bases",
                        envelope.jobs.len(),
                        labels.len()
                    )));
                }
                let bases = labels
                    .iter()
                    .map(|l| l.parse::<PauliWord>().map_err(|e| malformed(e.to_string())))
                    .collect::<HandleResult<Vec<_>>>()?;
                if bases.iter().any(PauliWord::is_identity) {
                    return Err(malformed("identity basis has no job".into()));
                }
                if bases.iter().enumerate().any(|(i, b)| bases[..i].contains(b)) {
                    return Err(malformed("repeated basis".into()));
                }
                bases
            }
            (HandleKind::Sample, Some(_)) => {
                return Err(malformed("sample handle carries bases".into()));
            }
            (HandleKind::Observe, None) => {
                return Err(malformed("observe handle is missing bases".into()));
            }
        };

        Ok(Self {
            kind,
            target: envelope.target,
            jobs: envelope.jobs.into_iter().map(JobId).collect(),
            bases,
        })
    }
}
