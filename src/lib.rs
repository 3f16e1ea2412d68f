//! # mutation-harness
//!
//! `mutation-harness` runs a test suite against a baseline and a set of mutated variants of a
//! code unit, and judges whether the suite detects each mutation. It is organized around:
//! - `deadline`: per-context wall-clock guards and cooperative checkpoints
//! - `container`: isolated execution of one candidate against a test batch
//! - `listener` / `events`: outcome reporting, delivered in order
//! - `verdict` / `orchestrator`: kill rule, kill rate, suite verdict
//! - `journal`: JSONL event journal and replay (feature `journal`)
//! - `report`: Markdown and JSON summaries
//!
//! Mutant generation and test discovery belong to the caller; this crate only executes and judges.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]

pub mod config;
pub mod container;
pub mod deadline;
pub mod events;
pub mod listener;
pub mod orchestrator;
pub mod outcome;
pub mod report;
pub mod unit;
pub mod verdict;

#[cfg(feature = "journal")]
#[cfg_attr(docsrs, doc(cfg(feature = "journal")))]
pub mod journal;

pub use config::{ConfigError, EvaluationConfig};
pub use container::{ContainerError, TestContainer};
pub use deadline::{DeadlineExceeded, DeadlineGuard, checkpoint, try_checkpoint};
pub use events::ExecutionEvent;
pub use listener::{EventCollector, ListenerSet, TestListener, TracingListener};
pub use orchestrator::{EvaluationError, EvaluationReport, MutantEvaluation, MutationOrchestrator};
pub use outcome::{OutcomeKind, RunResult, RunStatus, SkipReason, TestOutcome, TestRecord};
pub use unit::{
    Candidate, CandidateId, MutationDescriptor, TestContext, TestFault, TestUnit, expect_eq,
    expect_true,
};
pub use verdict::{Detection, MutationVerdict, SuiteSkipReason, SuiteVerdict};
