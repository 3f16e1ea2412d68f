//! Outcome reporting: the listener callback contract and stock listeners.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, error, info, warn};

use crate::events::ExecutionEvent;
use crate::outcome::{RunStatus, TestOutcome, TestRecord};
use crate::unit::CandidateId;
use crate::verdict::{MutationVerdict, SuiteVerdict};

/// Receives outcome callbacks during an evaluation.
///
/// All callbacks default to no-ops. Within one run, every test callback precedes
/// `on_run_complete`; baseline callbacks precede any mutant callbacks.
///
/// A run's callbacks are delivered together once that run has finished, never while
/// its tests are still executing. Test events carry the run's completion timestamp.
pub trait TestListener: Send {
    /// A run is about to report its outcomes.
    fn on_run_start(&mut self, _run_id: &str, _candidate: &CandidateId) {}

    /// A test succeeded.
    fn on_test_success(&mut self, _record: &TestRecord) {}

    /// A test violated an assertion.
    fn on_test_failure(&mut self, _record: &TestRecord, _cause: &str) {}

    /// A test raised an unexpected fault.
    fn on_test_error(&mut self, _record: &TestRecord, _cause: &str) {}

    /// A test hit the deadline. Reported as an error unless overridden.
    fn on_test_timed_out(&mut self, record: &TestRecord, cause: &str) {
        self.on_test_error(record, cause);
    }

    /// A test was excluded or not reached.
    fn on_test_skipped(&mut self, _record: &TestRecord) {}

    /// A run reached its terminal status.
    fn on_run_complete(&mut self, _run_id: &str, _status: RunStatus) {}

    /// A mutant was judged.
    fn on_mutation_verdict(&mut self, _mutant: &CandidateId, _verdict: &MutationVerdict) {}

    /// The baseline run did not pass.
    fn on_suite_error(&mut self, _code_unit: &str, _failing: &[String]) {}

    /// The suite was judged.
    fn on_suite_verdict(&mut self, _verdict: SuiteVerdict, _kill_rate: Option<f64>) {}

    /// Raw event hook; routes to the callbacks above unless overridden.
    fn on_event(&mut self, event: &ExecutionEvent) {
        dispatch(self, event);
    }
}

/// Route one event to the matching callback of `listener`.
pub fn dispatch<L: TestListener + ?Sized>(listener: &mut L, event: &ExecutionEvent) {
    match event {
        ExecutionEvent::RunStarted {
            run_id, candidate, ..
        } => listener.on_run_start(run_id, candidate),
        ExecutionEvent::TestFinished { record, .. } => match &record.outcome {
            TestOutcome::Success => listener.on_test_success(record),
            TestOutcome::Failure { message } => listener.on_test_failure(record, message),
            TestOutcome::Error { message } => listener.on_test_error(record, message),
            TestOutcome::TimedOut { message } => listener.on_test_timed_out(record, message),
            TestOutcome::Skipped { .. } => listener.on_test_skipped(record),
        },
        ExecutionEvent::RunCompleted { run_id, status, .. } => {
            listener.on_run_complete(run_id, *status)
        }
        ExecutionEvent::MutationVerdict {
            mutant, verdict, ..
        } => listener.on_mutation_verdict(mutant, verdict),
        ExecutionEvent::SuiteBroken {
            code_unit, failing, ..
        } => listener.on_suite_error(code_unit, failing),
        ExecutionEvent::SuiteVerdict {
            verdict, kill_rate, ..
        } => listener.on_suite_verdict(*verdict, *kill_rate),
    }
}

/// Ordered set of listeners receiving every event in the same order.
#[derive(Default)]
pub struct ListenerSet {
    listeners: Vec<Box<dyn TestListener>>,
}

impl ListenerSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a listener.
    pub fn push(&mut self, listener: Box<dyn TestListener>) {
        self.listeners.push(listener);
    }

    /// Number of listeners.
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// True with no listeners.
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Deliver one event to every listener.
    pub fn emit(&mut self, event: &ExecutionEvent) {
        for listener in &mut self.listeners {
            listener.on_event(event);
        }
    }

    /// Deliver a batch of events, preserving order.
    pub fn emit_all(&mut self, events: &[ExecutionEvent]) {
        for event in events {
            self.emit(event);
        }
    }
}

impl std::fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSet")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Collects raw events; clones share one buffer.
#[derive(Debug, Clone, Default)]
pub struct EventCollector {
    events: Arc<Mutex<Vec<ExecutionEvent>>>,
}

impl EventCollector {
    /// Empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of collected events.
    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl TestListener for EventCollector {
    fn on_event(&mut self, event: &ExecutionEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

/// Logs every callback through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingListener;

impl TestListener for TracingListener {
    fn on_run_start(&mut self, run_id: &str, candidate: &CandidateId) {
        debug!(run_id, candidate = %candidate, "run started");
    }

    fn on_test_success(&mut self, record: &TestRecord) {
        debug!(test = %record.test_name, "test passed");
    }

    fn on_test_failure(&mut self, record: &TestRecord, cause: &str) {
        info!(test = %record.test_name, cause, "test failed");
    }

    fn on_test_error(&mut self, record: &TestRecord, cause: &str) {
        info!(test = %record.test_name, cause, "test errored");
    }

    fn on_test_timed_out(&mut self, record: &TestRecord, cause: &str) {
        info!(test = %record.test_name, cause, "test timed out");
    }

    fn on_test_skipped(&mut self, record: &TestRecord) {
        debug!(test = %record.test_name, "test skipped");
    }

    fn on_run_complete(&mut self, run_id: &str, status: RunStatus) {
        debug!(run_id, ?status, "run complete");
    }

    fn on_mutation_verdict(&mut self, mutant: &CandidateId, verdict: &MutationVerdict) {
        info!(mutant = %mutant, %verdict, "mutant judged");
    }

    fn on_suite_error(&mut self, code_unit: &str, failing: &[String]) {
        error!(code_unit, ?failing, "test suite fails without mutation");
    }

    fn on_suite_verdict(&mut self, verdict: SuiteVerdict, kill_rate: Option<f64>) {
        match verdict {
            SuiteVerdict::Fail => warn!(%verdict, ?kill_rate, "suite verdict"),
            _ => info!(%verdict, ?kill_rate, "suite verdict"),
        }
    }
}
