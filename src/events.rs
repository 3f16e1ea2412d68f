//! Event model shared by listeners and the JSONL journal.

use serde::{Deserialize, Serialize};

use crate::deadline::now_epoch_ms;
use crate::outcome::{RunResult, RunStatus, TestRecord};
use crate::unit::CandidateId;
use crate::verdict::{MutationVerdict, SuiteVerdict};

/// Event emitted while evaluating a suite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// A container run started.
    RunStarted {
        /// Run id.
        run_id: String,
        /// Unix timestamp millis.
        timestamp_ms: u64,
        /// Candidate under test.
        candidate: CandidateId,
        /// Number of test units in the batch.
        tests: usize,
    },
    /// One test produced its outcome.
    TestFinished {
        /// Run id.
        run_id: String,
        /// Unix timestamp millis.
        timestamp_ms: u64,
        /// Recorded outcome.
        record: TestRecord,
    },
    /// A container run reached its terminal status.
    RunCompleted {
        /// Run id.
        run_id: String,
        /// Unix timestamp millis.
        timestamp_ms: u64,
        /// Terminal status.
        status: RunStatus,
        /// Run wall-clock time.
        duration_ms: u64,
    },
    /// Verdict for one mutant.
    MutationVerdict {
        /// Unix timestamp millis.
        timestamp_ms: u64,
        /// Mutant identity, including the mutator that produced it.
        mutant: CandidateId,
        /// Verdict.
        verdict: MutationVerdict,
    },
    /// The baseline run did not pass; no mutant was evaluated.
    SuiteBroken {
        /// Unix timestamp millis.
        timestamp_ms: u64,
        /// Code unit under test.
        code_unit: String,
        /// Tests that did not succeed against the baseline.
        failing: Vec<String>,
    },
    /// Aggregate verdict for the suite.
    SuiteVerdict {
        /// Unix timestamp millis.
        timestamp_ms: u64,
        /// Code unit under test.
        code_unit: String,
        /// Verdict.
        verdict: SuiteVerdict,
        /// Killed percentage; absent with no mutants.
        #[serde(default)]
        kill_rate: Option<f64>,
        /// Killed mutants.
        killed: usize,
        /// Evaluated mutants.
        total: usize,
        /// Configured threshold percentage.
        threshold: f64,
        /// Mutation operators that produced the mutant set.
        #[serde(default)]
        mutators: Vec<String>,
    },
}

impl ExecutionEvent {
    /// Events describing one run, in emission order: start, one per test, completion.
    pub fn for_run(result: &RunResult) -> Vec<ExecutionEvent> {
        let finished_at_ms = result.started_at_ms.saturating_add(result.duration_ms);
        let mut events = Vec::with_capacity(result.records.len() + 2);
        events.push(ExecutionEvent::RunStarted {
            run_id: result.run_id.clone(),
            timestamp_ms: result.started_at_ms,
            candidate: result.candidate.clone(),
            tests: result.records.len(),
        });
        for record in &result.records {
            events.push(ExecutionEvent::TestFinished {
                run_id: result.run_id.clone(),
                timestamp_ms: finished_at_ms,
                record: record.clone(),
            });
        }
        events.push(ExecutionEvent::RunCompleted {
            run_id: result.run_id.clone(),
            timestamp_ms: finished_at_ms,
            status: result.status,
            duration_ms: result.duration_ms,
        });
        events
    }

    /// Verdict event stamped now.
    pub fn mutation_verdict(mutant: CandidateId, verdict: MutationVerdict) -> Self {
        Self::MutationVerdict {
            timestamp_ms: now_epoch_ms(),
            mutant,
            verdict,
        }
    }
}
