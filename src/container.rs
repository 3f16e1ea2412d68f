//! Test execution container: one candidate, one ordered batch, one isolated context.
//!
//! Each run gets a fresh [`ExecutionContext`]: its own deadline guard and its own
//! thread. The calling thread only does bookkeeping: it collects per-test records
//! over a channel and, if the context stops responding past `deadline + grace`,
//! abandons it. Teardown happens in `Drop`, so it runs on every exit path.

use std::any::Any;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe, PanicHookInfo, catch_unwind};
use std::sync::{Arc, Once};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::deadline::{self, DeadlineExceeded, DeadlineGuard, now_epoch_ms};
use crate::events::ExecutionEvent;
use crate::listener::ListenerSet;
use crate::outcome::{RunResult, RunStatus, SkipReason, TestOutcome, TestRecord};
use crate::unit::{Candidate, TestContext, TestFault, TestUnit};

/// Default slack after the deadline before an unresponsive context is abandoned.
pub const DEFAULT_ABANDON_GRACE: Duration = Duration::from_millis(500);

static RUN_SEQUENCE: AtomicU64 = AtomicU64::new(0);
static QUIET_HOOK: Once = Once::new();

thread_local! {
    static QUIET_PANICS: Cell<bool> = const { Cell::new(false) };
}

/// Wrap the process panic hook so panics on context threads print nothing.
/// Other threads keep the previous hook.
fn install_quiet_hook() {
    QUIET_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info: &PanicHookInfo<'_>| {
            if !QUIET_PANICS.with(Cell::get) {
                previous(info);
            }
        }));
    });
}

/// Container-level errors. Test faults never surface here.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// The execution context thread could not be started.
    #[error("failed to spawn execution context: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Runs test batches against candidates.
#[derive(Debug, Clone)]
pub struct TestContainer {
    abandon_grace: Duration,
}

impl Default for TestContainer {
    fn default() -> Self {
        Self {
            abandon_grace: DEFAULT_ABANDON_GRACE,
        }
    }
}

impl TestContainer {
    /// Container with the default abandon grace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the backstop slack applied after the deadline.
    pub fn with_abandon_grace(mut self, grace: Duration) -> Self {
        self.abandon_grace = grace;
        self
    }

    /// Backstop slack applied after the deadline.
    pub fn abandon_grace(&self) -> Duration {
        self.abandon_grace
    }

    /// Run `units` against `candidate` within `deadline` (zero means unlimited).
    pub fn run<C>(
        &self,
        candidate: &Candidate<C>,
        units: &[TestUnit<C>],
        deadline: Duration,
    ) -> Result<RunResult, ContainerError>
    where
        C: Send + Sync + 'static,
    {
        let run_id = generate_run_id();
        let started_at_ms = now_epoch_ms();
        let started = Instant::now();
        debug!(
            run_id = %run_id,
            candidate = %candidate.id(),
            tests = units.len(),
            deadline_ms = deadline.as_millis() as u64,
            "starting run"
        );

        let (tx, rx) = mpsc::channel::<(usize, TestRecord)>();
        let mut context = ExecutionContext::new(run_id.clone());
        context.guard.arm_after(deadline);
        context.load(candidate, units, tx)?;

        let hard_limit = (!deadline.is_zero()).then(|| started + deadline + self.abandon_grace);
        let mut slots: Vec<Option<TestRecord>> = vec![None; units.len()];
        loop {
            let received = match hard_limit {
                Some(limit) => rx.recv_timeout(limit.saturating_duration_since(Instant::now())),
                None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match received {
                Ok((index, record)) => slots[index] = Some(record),
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    context.abandoned = true;
                    break;
                }
            }
        }

        let abandoned = context.abandoned;
        drop(context);

        let records = finalize_records(units, slots, abandoned);
        let status = if records
            .iter()
            .any(|r| matches!(r.outcome, TestOutcome::TimedOut { .. }))
        {
            RunStatus::AbortedByTimeout
        } else {
            RunStatus::Completed
        };

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        if status == RunStatus::AbortedByTimeout {
            info!(run_id = %run_id, candidate = %candidate.id(), duration_ms, "run aborted by timeout");
        } else {
            debug!(run_id = %run_id, duration_ms, "run completed");
        }

        Ok(RunResult {
            run_id,
            candidate: candidate.id().clone(),
            records,
            status,
            started_at_ms,
            duration_ms,
        })
    }

    /// [`run`](Self::run), then emit the run's events to `listeners`.
    ///
    /// Events are emitted in one batch after the run reaches its terminal status.
    pub fn run_reported<C>(
        &self,
        candidate: &Candidate<C>,
        units: &[TestUnit<C>],
        deadline: Duration,
        listeners: &mut ListenerSet,
    ) -> Result<RunResult, ContainerError>
    where
        C: Send + Sync + 'static,
    {
        let result = self.run(candidate, units, deadline)?;
        listeners.emit_all(&ExecutionEvent::for_run(&result));
        Ok(result)
    }
}

fn generate_run_id() -> String {
    let seq = RUN_SEQUENCE.fetch_add(1, Ordering::SeqCst);
    format!("run-{}-{}-{}", now_epoch_ms(), std::process::id(), seq)
}

/// Isolation boundary for one run: a private guard and a private thread.
struct ExecutionContext {
    run_id: String,
    guard: Arc<DeadlineGuard>,
    worker: Option<JoinHandle<()>>,
    abandoned: bool,
}

impl ExecutionContext {
    fn new(run_id: String) -> Self {
        Self {
            run_id,
            guard: Arc::new(DeadlineGuard::new()),
            worker: None,
            abandoned: false,
        }
    }

    fn load<C>(
        &mut self,
        candidate: &Candidate<C>,
        units: &[TestUnit<C>],
        tx: mpsc::Sender<(usize, TestRecord)>,
    ) -> Result<(), ContainerError>
    where
        C: Send + Sync + 'static,
    {
        install_quiet_hook();
        let code = candidate.shared_code();
        let units = units.to_vec();
        let guard = Arc::clone(&self.guard);
        let handle = thread::Builder::new()
            .name(format!("mutation-context-{}", self.run_id))
            .spawn(move || execute_batch(code.as_ref(), &units, guard, &tx))?;
        self.worker = Some(handle);
        Ok(())
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        let Some(handle) = self.worker.take() else {
            self.guard.disarm();
            return;
        };
        if self.abandoned {
            // The thread keeps running; poisoning makes its next checkpoint unwind.
            self.guard.poison();
            warn!(run_id = %self.run_id, "abandoning unresponsive execution context");
            return;
        }
        self.guard.disarm();
        if handle.join().is_err() {
            warn!(run_id = %self.run_id, "execution context thread panicked outside a test");
        }
    }
}

fn execute_batch<C>(
    code: &C,
    units: &[TestUnit<C>],
    guard: Arc<DeadlineGuard>,
    tx: &mpsc::Sender<(usize, TestRecord)>,
) {
    let _ambient = deadline::install(Arc::clone(&guard));
    QUIET_PANICS.with(|quiet| quiet.set(true));

    for (index, unit) in units.iter().enumerate() {
        if unit.is_excluded() {
            let record = TestRecord {
                test_name: unit.name().to_string(),
                outcome: TestOutcome::Skipped {
                    reason: SkipReason::Excluded,
                },
                duration_ms: None,
            };
            if tx.send((index, record)).is_err() {
                return;
            }
            continue;
        }

        let started = Instant::now();
        let ctx = TestContext::new(code, &guard, unit.name());
        let outcome = match catch_unwind(AssertUnwindSafe(|| unit.execute(&ctx))) {
            Ok(Ok(())) => TestOutcome::Success,
            Ok(Err(fault)) => classify_fault(fault),
            Err(payload) => classify_panic(payload),
        };
        let timed_out = matches!(outcome, TestOutcome::TimedOut { .. });
        let record = TestRecord {
            test_name: unit.name().to_string(),
            outcome,
            duration_ms: Some(u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)),
        };
        if tx.send((index, record)).is_err() || timed_out {
            return;
        }
    }
}

fn classify_fault(fault: TestFault) -> TestOutcome {
    match fault {
        TestFault::Assertion(message) => TestOutcome::Failure { message },
        TestFault::Unexpected(message) => TestOutcome::Error { message },
        TestFault::Deadline(exceeded) => TestOutcome::TimedOut {
            message: exceeded.to_string(),
        },
    }
}

fn classify_panic(payload: Box<dyn Any + Send>) -> TestOutcome {
    if let Some(exceeded) = payload.downcast_ref::<DeadlineExceeded>() {
        return TestOutcome::TimedOut {
            message: exceeded.to_string(),
        };
    }
    if let Some(fault) = payload.downcast_ref::<TestFault>() {
        return classify_fault(fault.clone());
    }

    // Like libtest: any panic with a message is a failed expectation.
    match panic_message(payload.as_ref()) {
        Some(message) => TestOutcome::Failure { message },
        None => TestOutcome::Error {
            message: "panicked with a non-string payload".to_string(),
        },
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> Option<String> {
    if let Some(s) = payload.downcast_ref::<&str>() {
        Some((*s).to_string())
    } else {
        payload.downcast_ref::<String>().cloned()
    }
}

/// Fill slots the context never reported: the in-flight test of an abandoned
/// context timed out, everything after a timeout was not run.
fn finalize_records<C>(
    units: &[TestUnit<C>],
    slots: Vec<Option<TestRecord>>,
    abandoned: bool,
) -> Vec<TestRecord> {
    let mut in_flight_pending = abandoned;
    let mut aborted = false;

    units
        .iter()
        .zip(slots)
        .map(|(unit, slot)| {
            if let Some(record) = slot {
                aborted |= matches!(record.outcome, TestOutcome::TimedOut { .. });
                return record;
            }
            let outcome = if unit.is_excluded() {
                TestOutcome::Skipped {
                    reason: SkipReason::Excluded,
                }
            } else if in_flight_pending {
                in_flight_pending = false;
                aborted = true;
                TestOutcome::TimedOut {
                    message: "test did not reach a deadline checkpoint; execution context abandoned"
                        .to_string(),
                }
            } else if aborted {
                TestOutcome::Skipped {
                    reason: SkipReason::NotRun,
                }
            } else {
                TestOutcome::Error {
                    message: "execution context terminated before reporting".to_string(),
                }
            };
            TestRecord {
                test_name: unit.name().to_string(),
                outcome,
                duration_ms: None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::EventCollector;
    use crate::outcome::OutcomeKind;
    use crate::unit::expect_eq;

    fn spin_until_deadline(ctx: &TestContext<'_, u32>) -> Result<(), TestFault> {
        loop {
            ctx.checkpoint()?;
            std::hint::spin_loop();
        }
    }

    fn units() -> Vec<TestUnit<u32>> {
        vec![
            TestUnit::new("passes", |ctx| expect_eq(1, *ctx.code())),
            TestUnit::new("asserts", |ctx| {
                assert_eq!(*ctx.code(), 2, "code should be two");
                Ok(())
            }),
            TestUnit::new("errors", |_ctx| Err(TestFault::unexpected("disk on fire"))),
            TestUnit::new("ignored", |_ctx| Ok(())).excluded(),
            TestUnit::new("panics", |_ctx| panic!("index out of bounds")),
        ]
    }

    #[test]
    fn classifies_each_outcome_and_continues_after_faults() {
        let container = TestContainer::new();
        let candidate = Candidate::baseline("unit", 1_u32);
        let result = container
            .run(&candidate, &units(), Duration::from_secs(5))
            .expect("run should start");

        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(
            result.kinds(),
            vec![
                OutcomeKind::Success,
                OutcomeKind::Failure,
                OutcomeKind::Error,
                OutcomeKind::Skipped,
                OutcomeKind::Failure,
            ]
        );
        assert_eq!(result.records[1].test_name, "asserts");
        assert!(
            result.records[4]
                .outcome
                .cause()
                .is_some_and(|c| c.contains("index out of bounds"))
        );
    }

    #[test]
    fn custom_message_assert_is_a_failure() {
        let container = TestContainer::new();
        let candidate = Candidate::baseline("unit", 1_u32);
        let batch = vec![TestUnit::new("custom_assert", |ctx| {
            assert!(*ctx.code() == 2, "code should be two");
            Ok(())
        })];

        let result = container
            .run(&candidate, &batch, Duration::from_secs(5))
            .expect("run should start");
        assert_eq!(
            result.records[0].outcome,
            TestOutcome::Failure {
                message: "code should be two".to_string()
            }
        );
    }

    #[test]
    fn context_thread_sees_its_own_guard_name_and_quiet_hook() {
        let container = TestContainer::new();
        assert_eq!(container.abandon_grace(), DEFAULT_ABANDON_GRACE);
        let candidate = Candidate::baseline("unit", 0_u32);
        let batch = vec![TestUnit::new("introspects", |ctx| {
            expect_eq("introspects", ctx.test_name())?;
            expect_eq(true, ctx.guard().deadline_ms().is_some())?;
            expect_eq(true, QUIET_PANICS.with(Cell::get))
        })];

        let result = container
            .run(&candidate, &batch, Duration::from_secs(5))
            .expect("run should start");
        assert_eq!(result.kinds(), vec![OutcomeKind::Success]);
        assert!(!QUIET_PANICS.with(Cell::get));

        let unlimited = container
            .run(
                &candidate,
                &[TestUnit::new("unlimited", |ctx| {
                    expect_eq(None, ctx.guard().deadline_ms())
                })],
                Duration::ZERO,
            )
            .expect("run should start");
        assert_eq!(unlimited.kinds(), vec![OutcomeKind::Success]);
    }

    #[test]
    fn checkpoint_timeout_aborts_remaining_tests() {
        let container = TestContainer::new();
        let candidate = Candidate::baseline("unit", 0_u32);
        let batch = vec![
            TestUnit::new("first", |_ctx| Ok(())),
            TestUnit::new("loops", spin_until_deadline),
            TestUnit::new("never", |_ctx| Ok(())),
        ];

        let started = Instant::now();
        let result = container
            .run(&candidate, &batch, Duration::from_millis(50))
            .expect("run should start");

        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(result.status, RunStatus::AbortedByTimeout);
        assert_eq!(
            result.kinds(),
            vec![OutcomeKind::Success, OutcomeKind::TimedOut, OutcomeKind::Skipped]
        );
        assert_eq!(
            result.records[2].outcome,
            TestOutcome::Skipped {
                reason: SkipReason::NotRun
            }
        );
    }

    #[test]
    fn ambient_checkpoint_unwinds_to_container() {
        let container = TestContainer::new();
        let candidate = Candidate::baseline("unit", 0_u32);
        let batch = vec![TestUnit::new("ambient", |_ctx| loop {
            deadline::checkpoint();
        })];

        let result = container
            .run(&candidate, &batch, Duration::from_millis(30))
            .expect("run should start");
        assert_eq!(result.kinds(), vec![OutcomeKind::TimedOut]);
    }

    #[test]
    fn unresponsive_context_is_abandoned_after_grace() {
        let container = TestContainer::new().with_abandon_grace(Duration::from_millis(50));
        let candidate = Candidate::baseline("unit", 0_u32);
        let batch = vec![
            TestUnit::new("sleeps", |ctx| {
                // Never checkpoints while the container waits.
                std::thread::sleep(Duration::from_millis(400));
                ctx.checkpoint()?;
                Ok(())
            }),
            TestUnit::new("after", |_ctx| Ok(())),
        ];

        let started = Instant::now();
        let result = container
            .run(&candidate, &batch, Duration::from_millis(30))
            .expect("run should start");

        assert!(started.elapsed() < Duration::from_millis(350));
        assert_eq!(result.status, RunStatus::AbortedByTimeout);
        assert_eq!(
            result.kinds(),
            vec![OutcomeKind::TimedOut, OutcomeKind::Skipped]
        );
    }

    #[test]
    fn zero_deadline_means_unlimited() {
        let container = TestContainer::new();
        let candidate = Candidate::baseline("unit", 0_u32);
        let batch = vec![TestUnit::new("checks", |ctx| {
            std::thread::sleep(Duration::from_millis(20));
            ctx.checkpoint()?;
            Ok(())
        })];
        let result = container
            .run(&candidate, &batch, Duration::ZERO)
            .expect("run should start");
        assert_eq!(result.kinds(), vec![OutcomeKind::Success]);
    }

    #[test]
    fn empty_batch_completes() {
        let container = TestContainer::new();
        let candidate = Candidate::baseline("unit", 0_u32);
        let result = container
            .run(&candidate, &[], Duration::from_secs(1))
            .expect("run should start");
        assert_eq!(result.status, RunStatus::Completed);
        assert!(result.records.is_empty());
    }

    #[test]
    fn concurrent_runs_do_not_share_deadlines() {
        let container = TestContainer::new();
        let slow = Candidate::baseline("slow", 0_u32);
        let fast = Candidate::baseline("fast", 0_u32);
        let looping = vec![TestUnit::new("loops", spin_until_deadline)];
        let sleeping: Vec<TestUnit<u32>> = vec![TestUnit::new("sleeps", |ctx| {
            std::thread::sleep(Duration::from_millis(80));
            ctx.checkpoint()?;
            Ok(())
        })];

        let (a, b) = std::thread::scope(|s| {
            let a = s.spawn(|| container.run(&fast, &looping, Duration::from_millis(20)));
            let b = s.spawn(|| container.run(&slow, &sleeping, Duration::from_secs(5)));
            (
                a.join().expect("thread should join"),
                b.join().expect("thread should join"),
            )
        });

        let a = a.expect("run should start");
        let b = b.expect("run should start");
        assert_eq!(a.kinds(), vec![OutcomeKind::TimedOut]);
        assert_eq!(b.kinds(), vec![OutcomeKind::Success]);
        assert_ne!(a.run_id, b.run_id);
    }

    #[test]
    fn run_reported_emits_tests_before_completion() {
        let container = TestContainer::new();
        let candidate = Candidate::baseline("unit", 1_u32);
        let collector = EventCollector::new();
        let mut listeners = ListenerSet::new();
        listeners.push(Box::new(collector.clone()));

        container
            .run_reported(&candidate, &units(), Duration::from_secs(5), &mut listeners)
            .expect("run should start");

        let events = collector.events();
        assert_eq!(events.len(), units().len() + 2);
        assert!(matches!(events.first(), Some(ExecutionEvent::RunStarted { .. })));
        let Some(ExecutionEvent::RunCompleted {
            timestamp_ms: completed_at,
            ..
        }) = events.last()
        else {
            panic!("run should end with a completion event");
        };
        // Test events are delivered once the run has finished, stamped with its end.
        for event in &events[1..events.len() - 1] {
            match event {
                ExecutionEvent::TestFinished { timestamp_ms, .. } => {
                    assert_eq!(timestamp_ms, completed_at)
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[test]
    fn panic_classification_distinguishes_assertions() {
        assert_eq!(
            classify_panic(Box::new("assertion failed: x")).kind(),
            OutcomeKind::Failure
        );
        assert_eq!(
            classify_panic(Box::new(String::from("attempt to divide by zero"))).kind(),
            OutcomeKind::Failure
        );
        assert_eq!(classify_panic(Box::new(42_u32)).kind(), OutcomeKind::Error);
        assert_eq!(
            classify_panic(Box::new(TestFault::assertion("nope"))).kind(),
            OutcomeKind::Failure
        );
        assert_eq!(
            classify_panic(Box::new(DeadlineExceeded { deadline_ms: 1 })).kind(),
            OutcomeKind::TimedOut
        );
    }
}
