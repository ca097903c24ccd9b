//! Measurement results.
//!
//! Bitstring ordering: the rightmost bit corresponds to qubit 0. For
//! example, the string `"01"` means qubit 0 measured `1` and qubit 1
//! measured `0`. Every bitstring covers the full register.

use std::fmt;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Decoded measurement counts (the CountsMap of a job).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Counts {
    outcomes: FxHashMap<String, u64>,
}

impl Counts {
    /// Empty counts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from (bitstring, frequency) pairs; repeated bitstrings add up.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (impl Into<String>, u64)>) -> Self {
        let mut counts = Self::new();
        counts.extend(pairs.into_iter().map(|(bits, n)| (bits.into(), n)));
        counts
    }

    /// Add `count` observations of `bitstring`.
    pub fn insert(&mut self, bitstring: impl Into<String>, count: u64) {
        *self.outcomes.entry(bitstring.into()).or_default() += count;
    }

    /// Frequency of `bitstring` (0 if never observed).
    pub fn get(&self, bitstring: &str) -> u64 {
        self.outcomes.get(bitstring).copied().unwrap_or_default()
    }

    /// Observed (bitstring, frequency) pairs in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &u64)> {
        self.outcomes.iter()
    }

    /// Sum of all frequencies.
    pub fn total_shots(&self) -> u64 {
        self.outcomes.values().sum()
    }

    /// The outcome observed most often.
    pub fn most_frequent(&self) -> Option<(&String, &u64)> {
        self.sorted().into_iter().next()
    }

    /// Relative frequency of each outcome.
    #[allow(clippy::cast_precision_loss)]
    pub fn probabilities(&self) -> FxHashMap<String, f64> {
        match self.total_shots() {
            0 => FxHashMap::default(),
            total => self
                .outcomes
                .iter()
                .map(|(bits, &n)| (bits.clone(), n as f64 / total as f64))
                .collect(),
        }
    }

    /// Outcomes by descending frequency, ties broken by bitstring.
    pub fn sorted(&self) -> Vec<(&String, &u64)> {
        let mut outcomes: Vec<_> = self.outcomes.iter().collect();
        outcomes.sort_by(|(a_bits, a_n), (b_bits, b_n)| b_n.cmp(a_n).then(a_bits.cmp(b_bits)));
        outcomes
    }

    /// Number of distinct outcomes.
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Check if nothing was observed.
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Expectation of Z⊗…⊗Z over every measured bit.
    pub fn expectation_z(&self) -> f64 {
        self.weighted_parity(|bits| bits.bytes().filter(|&b| b == b'1').count())
    }

    /// Expectation of the Z-parity over the given qubits.
    ///
    /// Each outcome contributes `+1` if an even number of the selected bits
    /// is set and `-1` otherwise. Qubits beyond the bitstring read as `0`.
    pub fn parity_expectation(&self, qubits: &[u32]) -> f64 {
        self.weighted_parity(|bits| {
            let bytes = bits.as_bytes();
            qubits
                .iter()
                .filter(|&&q| {
                    let q = q as usize;
                    q < bytes.len() && bytes[bytes.len() - 1 - q] == b'1'
                })
                .count()
        })
    }

    #[allow(clippy::cast_precision_loss)]
    fn weighted_parity(&self, ones: impl Fn(&str) -> usize) -> f64 {
        let total = self.total_shots();
        if total == 0 {
            return 0.0;
        }
        let signed: i128 = self
            .outcomes
            .iter()
            .map(|(bits, &n)| {
                let n = i128::from(n);
                if ones(bits) % 2 == 0 { n } else { -n }
            })
            .sum();
        signed as f64 / total as f64
    }
}

impl Extend<(String, u64)> for Counts {
    fn extend<I: IntoIterator<Item = (String, u64)>>(&mut self, pairs: I) {
        for (bits, n) in pairs {
            self.insert(bits, n);
        }
    }
}

impl FromIterator<(String, u64)> for Counts {
    fn from_iter<I: IntoIterator<Item = (String, u64)>>(pairs: I) -> Self {
        let mut counts = Self::new();
        counts.extend(pairs);
        counts
    }
}

impl fmt::Display for Counts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ ")?;
        for (bits, count) in self.sorted() {
            write!(f, "{bits}:{count} ")?;
        }
        write!(f, "}}")
    }
}

/// What `ExecutionService::fetch` returns for a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Decoded counts.
    pub counts: Counts,
    /// Shots the job ran.
    pub shots: u32,
    /// Wall time the service spent executing, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
}

impl ExecutionResult {
    /// Counts for a job of `shots` shots.
    pub fn new(counts: Counts, shots: u32) -> Self {
        Self {
            counts,
            shots,
            execution_time_ms: None,
        }
    }

    /// Attach the reported execution time.
    pub fn with_execution_time(mut self, time_ms: u64) -> Self {
        self.execution_time_ms = Some(time_ms);
        self
    }
}
