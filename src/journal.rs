//! Append-only JSONL event journal and replay.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use thiserror::Error;
use tracing::warn;

use crate::events::ExecutionEvent;
use crate::listener::TestListener;
use crate::outcome::{RunStatus, TestRecord};
use crate::unit::CandidateId;
use crate::verdict::{MutationVerdict, SuiteVerdict};

/// Journal errors.
#[derive(Debug, Error)]
pub enum JournalError {
    /// IO failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Event could not be serialized.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Append one event as a JSONL line.
pub fn append_event(path: &Path, event: &ExecutionEvent) -> Result<(), JournalError> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let json = serde_json::to_string(event)?;
    file.write_all(json.as_bytes())?;
    file.write_all(b"\n")?;
    file.flush()?;
    Ok(())
}

/// Listener that appends every event to a JSONL file.
///
/// Write failures are logged and counted, never propagated into the evaluation.
#[derive(Debug, Clone)]
pub struct JsonlJournal {
    path: PathBuf,
    failures: Arc<AtomicUsize>,
}

impl JsonlJournal {
    /// Append to `path`, creating it if needed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, JournalError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            failures: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Truncate `path` and start a fresh journal.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, JournalError> {
        let journal = Self::open(path)?;
        File::create(&journal.path)?;
        Ok(journal)
    }

    /// Journal file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Events that could not be written.
    pub fn write_failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }
}

impl TestListener for JsonlJournal {
    fn on_event(&mut self, event: &ExecutionEvent) {
        if let Err(err) = append_event(&self.path, event) {
            self.failures.fetch_add(1, Ordering::SeqCst);
            warn!(path = %self.path.display(), error = %err, "failed to append journal event");
        }
    }
}

/// One run as reconstructed from the journal.
#[derive(Debug, Clone, PartialEq)]
pub struct RunState {
    /// Candidate that was executed.
    pub candidate: CandidateId,
    /// Records seen so far, in journal order.
    pub records: Vec<TestRecord>,
    /// Terminal status; `None` if the run never completed.
    pub status: Option<RunStatus>,
    /// Run wall-clock time.
    pub duration_ms: Option<u64>,
}

/// Suite verdict as recorded in the journal.
#[derive(Debug, Clone, PartialEq)]
pub struct SuiteRecord {
    /// Code unit under test.
    pub code_unit: String,
    /// Verdict.
    pub verdict: SuiteVerdict,
    /// Killed percentage.
    pub kill_rate: Option<f64>,
    /// Killed mutants.
    pub killed: usize,
    /// Evaluated mutants.
    pub total: usize,
    /// Configured threshold.
    pub threshold: f64,
    /// Mutation operators.
    pub mutators: Vec<String>,
}

/// Materialized journal state.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JournalSnapshot {
    /// Runs by id.
    pub runs: BTreeMap<String, RunState>,
    /// Mutant verdicts in journal order.
    pub verdicts: Vec<(CandidateId, MutationVerdict)>,
    /// Failing baseline tests if the suite was broken.
    pub suite_broken: Option<Vec<String>>,
    /// Final suite verdict, if reached.
    pub suite: Option<SuiteRecord>,
    /// Number of malformed lines ignored.
    pub malformed_lines: usize,
}

impl JournalSnapshot {
    /// Runs that started but never reported a terminal status.
    pub fn incomplete_runs(&self) -> Vec<&str> {
        self.runs
            .iter()
            .filter(|(_, run)| run.status.is_none())
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Mutants judged as survivors.
    pub fn survivors(&self) -> Vec<&CandidateId> {
        self.verdicts
            .iter()
            .filter(|(_, verdict)| !verdict.is_killed())
            .map(|(id, _)| id)
            .collect()
    }
}

/// Replay a JSONL journal into a snapshot. Malformed lines are counted and skipped.
pub fn replay_journal(path: &Path) -> Result<JournalSnapshot, JournalError> {
    let reader = BufReader::new(File::open(path)?);
    let mut snapshot = JournalSnapshot::default();

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let event = match serde_json::from_str::<ExecutionEvent>(&line) {
            Ok(event) => event,
            Err(_) => {
                snapshot.malformed_lines += 1;
                continue;
            }
        };

        match event {
            ExecutionEvent::RunStarted {
                run_id, candidate, ..
            } => {
                snapshot.runs.insert(
                    run_id,
                    RunState {
                        candidate,
                        records: Vec::new(),
                        status: None,
                        duration_ms: None,
                    },
                );
            }
            ExecutionEvent::TestFinished { run_id, record, .. } => {
                if let Some(run) = snapshot.runs.get_mut(&run_id) {
                    run.records.push(record);
                }
            }
            ExecutionEvent::RunCompleted {
                run_id,
                status,
                duration_ms,
                ..
            } => {
                if let Some(run) = snapshot.runs.get_mut(&run_id) {
                    run.status = Some(status);
                    run.duration_ms = Some(duration_ms);
                }
            }
            ExecutionEvent::MutationVerdict {
                mutant, verdict, ..
            } => snapshot.verdicts.push((mutant, verdict)),
            ExecutionEvent::SuiteBroken { failing, .. } => snapshot.suite_broken = Some(failing),
            ExecutionEvent::SuiteVerdict {
                code_unit,
                verdict,
                kill_rate,
                killed,
                total,
                threshold,
                mutators,
                ..
            } => {
                snapshot.suite = Some(SuiteRecord {
                    code_unit,
                    verdict,
                    kill_rate,
                    killed,
                    total,
                    threshold,
                    mutators,
                });
            }
        }
    }

    Ok(snapshot)
}
