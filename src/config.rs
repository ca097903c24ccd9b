//! Retrieval configuration.
//!
//! [`RetrievalConfig`] controls how `get()` polls the execution service:
//! the initial poll interval, the exponential backoff applied after every
//! pending status, its ceiling, and an optional overall wait budget.
//!
//! ```
//! use qpu_handles::RetrievalConfig;
//!
//! let config = RetrievalConfig::from_json(r#"{"poll_interval_ms": 100, "timeout_ms": 2000}"#).unwrap();
//! assert_eq!(config.poll_interval_ms, 100);
//! assert_eq!(config.max_poll_interval_ms, 5000);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HandleError, HandleResult};

/// Polling policy used by blocking retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Delay before the second status poll, in milliseconds.
    pub poll_interval_ms: u64,
    /// Upper bound for the backoff delay, in milliseconds.
    pub max_poll_interval_ms: u64,
    /// Multiplier applied to the delay after each pending status.
    pub backoff_factor: f64,
    /// Overall wait budget. `None` waits until the job is terminal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            max_poll_interval_ms: 5_000,
            backoff_factor: 1.5,
            timeout_ms: None,
        }
    }
}

impl RetrievalConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> HandleResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| HandleError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Set the initial poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = duration_ms(interval);
        self
    }

    /// Set the backoff ceiling.
    pub fn with_max_poll_interval(mut self, interval: Duration) -> Self {
        self.max_poll_interval_ms = duration_ms(interval);
        self
    }

    /// Set the backoff multiplier.
    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Set the overall wait budget.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(duration_ms(timeout));
        self
    }

    /// Check that the settings describe a terminating, non-busy poll loop.
    pub fn validate(&self) -> HandleResult<()> {
        if self.poll_interval_ms == 0 {
            return Err(HandleError::InvalidConfig(
                "poll_interval_ms must be positive".into(),
            ));
        }
        if self.max_poll_interval_ms < self.poll_interval_ms {
            return Err(HandleError::InvalidConfig(format!(
                "max_poll_interval_ms ({}) is below poll_interval_ms ({})",
                self.max_poll_interval_ms, self.poll_interval_ms
            )));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(HandleError::InvalidConfig(format!(
                "backoff_factor must be >= 1.0, got {}",
                self.backoff_factor
            )));
        }
        Ok(())
    }

    /// The first poll delay.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// The wait budget, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// The delay following `current` in the backoff sequence.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn next_interval(&self, current: Duration) -> Duration {
        let next = (current.as_millis() as f64 * self.backoff_factor).round() as u64;
        Duration::from_millis(next.clamp(self.poll_interval_ms, self.max_poll_interval_ms))
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
