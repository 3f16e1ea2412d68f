//! Per-test outcomes and per-run results.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::unit::CandidateId;

/// Why a test was recorded as skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Marked ignored; never executed.
    Excluded,
    /// Not reached because the run was aborted by timeout.
    NotRun,
}

/// Outcome of one test in one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TestOutcome {
    /// Completed without fault.
    Success,
    /// Assertion or expectation violated.
    Failure {
        /// Violation detail.
        message: String,
    },
    /// Unexpected fault.
    Error {
        /// Fault detail.
        message: String,
    },
    /// Not executed.
    Skipped {
        /// Why it was not executed.
        reason: SkipReason,
    },
    /// Deadline guard fired while this test was running.
    TimedOut {
        /// Timeout detail.
        message: String,
    },
}

/// Outcome discriminant without payload, for comparisons across runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// See [`TestOutcome::Success`].
    Success,
    /// See [`TestOutcome::Failure`].
    Failure,
    /// See [`TestOutcome::Error`].
    Error,
    /// See [`TestOutcome::Skipped`].
    Skipped,
    /// See [`TestOutcome::TimedOut`].
    TimedOut,
}

impl TestOutcome {
    /// Payload-free kind.
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Success => OutcomeKind::Success,
            Self::Failure { .. } => OutcomeKind::Failure,
            Self::Error { .. } => OutcomeKind::Error,
            Self::Skipped { .. } => OutcomeKind::Skipped,
            Self::TimedOut { .. } => OutcomeKind::TimedOut,
        }
    }

    /// Failure, error, or timeout message.
    pub fn cause(&self) -> Option<&str> {
        match self {
            Self::Failure { message } | Self::Error { message } | Self::TimedOut { message } => {
                Some(message)
            }
            Self::Success | Self::Skipped { .. } => None,
        }
    }
}

impl OutcomeKind {
    /// Failure, error, or timeout: the outcomes that can kill a mutant.
    pub fn is_detection(self) -> bool {
        matches!(self, Self::Failure | Self::Error | Self::TimedOut)
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Error => "error",
            Self::Skipped => "skipped",
            Self::TimedOut => "timed_out",
        };
        f.write_str(text)
    }
}

/// One test's recorded outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRecord {
    /// Qualified test name.
    pub test_name: String,
    /// Outcome.
    pub outcome: TestOutcome,
    /// Wall-clock time spent in the test body, if it ran.
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

/// Terminal status of one container run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every non-excluded test produced an outcome.
    Completed,
    /// A test timed out and the remaining tests were not run.
    AbortedByTimeout,
}

/// Outcomes of one container invocation, in input order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    /// Run id.
    pub run_id: String,
    /// Candidate that was executed.
    pub candidate: CandidateId,
    /// One record per input test unit, in input order.
    pub records: Vec<TestRecord>,
    /// Terminal status.
    pub status: RunStatus,
    /// Unix millis when the run started.
    pub started_at_ms: u64,
    /// Wall-clock run time.
    pub duration_ms: u64,
}

impl RunResult {
    /// Number of records of `kind`.
    pub fn count(&self, kind: OutcomeKind) -> usize {
        self.records
            .iter()
            .filter(|r| r.outcome.kind() == kind)
            .count()
    }

    /// Records that ran and did not succeed.
    pub fn detections(&self) -> impl Iterator<Item = &TestRecord> {
        self.records.iter().filter(|r| r.outcome.kind().is_detection())
    }

    /// True if every test that was not skipped succeeded.
    pub fn all_executed_succeeded(&self) -> bool {
        self.records
            .iter()
            .all(|r| matches!(r.outcome.kind(), OutcomeKind::Success | OutcomeKind::Skipped))
    }

    /// Outcome kinds in input order.
    pub fn kinds(&self) -> Vec<OutcomeKind> {
        self.records.iter().map(|r| r.outcome.kind()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, outcome: TestOutcome) -> TestRecord {
        TestRecord {
            test_name: name.to_string(),
            outcome,
            duration_ms: None,
        }
    }

    #[test]
    fn detection_kinds_are_failure_error_and_timeout() {
        assert!(!OutcomeKind::Success.is_detection());
        assert!(!OutcomeKind::Skipped.is_detection());
        assert!(OutcomeKind::Failure.is_detection());
        assert!(OutcomeKind::Error.is_detection());
        assert!(OutcomeKind::TimedOut.is_detection());
    }

    #[test]
    fn run_result_counts_and_success_check() {
        let run = RunResult {
            run_id: "run-1".to_string(),
            candidate: CandidateId::baseline("unit"),
            records: vec![
                record("a", TestOutcome::Success),
                record(
                    "b",
                    TestOutcome::Skipped {
                        reason: SkipReason::Excluded,
                    },
                ),
            ],
            status: RunStatus::Completed,
            started_at_ms: 0,
            duration_ms: 0,
        };
        assert!(run.all_executed_succeeded());
        assert_eq!(run.count(OutcomeKind::Skipped), 1);
        assert_eq!(run.detections().count(), 0);

        let mut broken = run.clone();
        broken.records[0].outcome = TestOutcome::Failure {
            message: "boom".to_string(),
        };
        assert!(!broken.all_executed_succeeded());
        assert_eq!(broken.detections().count(), 1);
        assert_eq!(broken.records[0].outcome.cause(), Some("boom"));
    }

    #[test]
    fn outcome_serializes_with_kind_tag() {
        let json = serde_json::to_string(&TestOutcome::Skipped {
            reason: SkipReason::NotRun,
        })
        .expect("outcome should serialize");
        assert_eq!(json, r#"{"kind":"skipped","reason":"not_run"}"#);
    }
}
