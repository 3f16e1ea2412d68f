//! Kill/survive verdicts and threshold scoring.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::outcome::{OutcomeKind, RunResult};

/// A test that behaved differently against a mutant than against the baseline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detection {
    /// Qualified test name.
    pub test_name: String,
    /// Outcome against the mutant.
    pub kind: OutcomeKind,
}

/// Verdict for one mutant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum MutationVerdict {
    /// At least one baseline-passing test failed, errored, or timed out.
    Killed {
        /// Detecting tests, in input order.
        detected_by: Vec<Detection>,
    },
    /// The suite did not notice the mutation.
    Survived,
}

impl MutationVerdict {
    /// True for [`MutationVerdict::Killed`].
    pub fn is_killed(&self) -> bool {
        matches!(self, Self::Killed { .. })
    }

    /// True if a timeout was among the detections.
    pub fn killed_by_timeout(&self) -> bool {
        match self {
            Self::Killed { detected_by } => {
                detected_by.iter().any(|d| d.kind == OutcomeKind::TimedOut)
            }
            Self::Survived => false,
        }
    }
}

impl fmt::Display for MutationVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Killed { .. } => f.write_str("killed"),
            Self::Survived => f.write_str("survived"),
        }
    }
}

/// Compare a mutant run against the baseline run of the same test units.
///
/// Records are matched by position; both runs come from the same ordered batch.
pub fn judge_mutant(baseline: &RunResult, mutant: &RunResult) -> MutationVerdict {
    let detected_by: Vec<Detection> = baseline
        .records
        .iter()
        .zip(&mutant.records)
        .filter(|(base, _)| base.outcome.kind() == OutcomeKind::Success)
        .filter(|(_, run)| run.outcome.kind().is_detection())
        .map(|(_, run)| Detection {
            test_name: run.test_name.clone(),
            kind: run.outcome.kind(),
        })
        .collect();

    if detected_by.is_empty() {
        MutationVerdict::Survived
    } else {
        MutationVerdict::Killed { detected_by }
    }
}

/// Why a suite could not be scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuiteSkipReason {
    /// Every test unit was excluded.
    NoExecutableTests,
    /// No mutants were supplied.
    NoMutants,
}

/// Aggregate verdict for a suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum SuiteVerdict {
    /// Kill rate reached the threshold.
    Pass,
    /// Kill rate fell short of the threshold.
    Fail,
    /// Nothing to score.
    Skipped {
        /// Why nothing was scored.
        reason: SuiteSkipReason,
    },
}

impl fmt::Display for SuiteVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => f.write_str("pass"),
            Self::Fail => f.write_str("fail"),
            Self::Skipped { .. } => f.write_str("skipped"),
        }
    }
}

/// Killed percentage, or `None` with no mutants.
pub fn kill_rate(killed: usize, total: usize) -> Option<f64> {
    (total > 0).then(|| (killed as f64) * 100.0 / (total as f64))
}

/// Pass iff `kill_rate >= threshold`; skipped with no mutants.
pub fn score_suite(killed: usize, total: usize, threshold: f64) -> SuiteVerdict {
    match kill_rate(killed, total) {
        None => SuiteVerdict::Skipped {
            reason: SuiteSkipReason::NoMutants,
        },
        Some(rate) if rate >= threshold => SuiteVerdict::Pass,
        Some(_) => SuiteVerdict::Fail,
    }
}
