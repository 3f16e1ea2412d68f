//! Evaluation configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Threshold outside `[0, 100]` or not finite.
    #[error("threshold must be a percentage in [0, 100], got {0}")]
    InvalidThreshold(f64),
    /// Zero workers.
    #[error("worker count must be at least 1")]
    NoWorkers,
    /// IO failure reading a config file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Malformed config file.
    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration for one suite evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Per-run wall-clock budget in milliseconds; `0` disables the deadline.
    pub deadline_ms: u64,
    /// Minimum kill-rate percentage for a pass.
    pub threshold: f64,
    /// Mutation operators that produced the mutant set. Informational.
    pub mutators: Vec<String>,
    /// Upper bound on concurrently executing mutant runs.
    pub workers: usize,
    /// Slack after the deadline before an unresponsive context is abandoned.
    pub abandon_grace_ms: u64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            deadline_ms: 4_000,
            threshold: 100.0,
            mutators: Vec::new(),
            workers: 1,
            abandon_grace_ms: 500,
        }
    }
}

impl EvaluationConfig {
    /// Load from a JSON file; missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.threshold.is_finite() || !(0.0..=100.0).contains(&self.threshold) {
            return Err(ConfigError::InvalidThreshold(self.threshold));
        }
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        Ok(())
    }

    /// Per-run deadline.
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    /// Abandon grace.
    pub fn abandon_grace(&self) -> Duration {
        Duration::from_millis(self.abandon_grace_ms)
    }

    /// Set per-run deadline.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set pass threshold percentage.
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Record the mutation operators used.
    pub fn with_mutators<I, S>(mut self, mutators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mutators = mutators.into_iter().map(Into::into).collect();
        self
    }

    /// Set worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set abandon grace.
    pub fn with_abandon_grace(mut self, grace: Duration) -> Self {
        self.abandon_grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX);
        self
    }
}
