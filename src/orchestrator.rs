//! Mutation orchestration: baseline run, mutant sweep, verdicts.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;

use thiserror::Error;
use tracing::{error, info};

use crate::config::{ConfigError, EvaluationConfig};
use crate::container::{ContainerError, TestContainer};
use crate::deadline::now_epoch_ms;
use crate::events::ExecutionEvent;
use crate::listener::{ListenerSet, TestListener};
use crate::outcome::RunResult;
use crate::unit::{Candidate, CandidateId, TestUnit};
use crate::verdict::{
    MutationVerdict, SuiteSkipReason, SuiteVerdict, judge_mutant, kill_rate, score_suite,
};

/// Evaluation errors.
#[derive(Debug, Error)]
pub enum EvaluationError {
    /// The baseline run did not pass, so mutants cannot be scored.
    #[error("test suite for {code_unit} fails without mutation: {failing:?}")]
    SuiteAlreadyBroken {
        /// Code unit under test.
        code_unit: String,
        /// Tests that did not succeed against the baseline.
        failing: Vec<String>,
        /// The baseline run.
        baseline: Box<RunResult>,
    },
    /// A run could not be started.
    #[error("container error: {0}")]
    Container(#[from] ContainerError),
    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

/// One mutant's run and verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct MutantEvaluation {
    /// Mutant identity.
    pub mutant: CandidateId,
    /// Verdict against the baseline.
    pub verdict: MutationVerdict,
    /// The mutant's run.
    pub run: RunResult,
}

/// Result of a suite evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationReport {
    /// Code unit under test.
    pub code_unit: String,
    /// Baseline run.
    pub baseline: RunResult,
    /// Per-mutant evaluations, in input order.
    pub mutants: Vec<MutantEvaluation>,
    /// Suite verdict.
    pub verdict: SuiteVerdict,
    /// Killed percentage; `None` when nothing was scored.
    pub kill_rate: Option<f64>,
    /// Configured threshold.
    pub threshold: f64,
    /// Mutation operators, passed through from config.
    pub mutators: Vec<String>,
}

impl EvaluationReport {
    /// Killed mutant count.
    pub fn killed(&self) -> usize {
        self.mutants.iter().filter(|m| m.verdict.is_killed()).count()
    }

    /// Surviving mutants.
    pub fn survivors(&self) -> impl Iterator<Item = &MutantEvaluation> {
        self.mutants.iter().filter(|m| !m.verdict.is_killed())
    }
}

/// Drives baseline and mutant runs for one suite and judges them.
#[derive(Debug)]
pub struct MutationOrchestrator {
    config: EvaluationConfig,
    container: TestContainer,
    listeners: ListenerSet,
}

impl MutationOrchestrator {
    /// Orchestrator for a validated config.
    pub fn new(config: EvaluationConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let container = TestContainer::new().with_abandon_grace(config.abandon_grace());
        Ok(Self {
            config,
            container,
            listeners: ListenerSet::new(),
        })
    }

    /// Register a listener; listeners receive events in registration order.
    pub fn add_listener(&mut self, listener: impl TestListener + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Active configuration.
    pub fn config(&self) -> &EvaluationConfig {
        &self.config
    }

    /// Evaluate `mutants` against the suite `units`, using `baseline` as reference.
    pub fn evaluate<C>(
        &mut self,
        units: &[TestUnit<C>],
        baseline: &Candidate<C>,
        mutants: &[Candidate<C>],
    ) -> Result<EvaluationReport, EvaluationError>
    where
        C: Send + Sync + 'static,
    {
        let code_unit = baseline.id().code_unit.clone();
        info!(
            code_unit = %code_unit,
            tests = units.len(),
            mutants = mutants.len(),
            threshold = self.config.threshold,
            "evaluating suite"
        );

        let baseline_run = self
            .container
            .run_reported(baseline, units, self.config.deadline(), &mut self.listeners)?;

        if units.iter().all(TestUnit::is_excluded) {
            info!(code_unit = %code_unit, "no executable tests, skipping suite");
            return Ok(self.finish(
                code_unit,
                baseline_run,
                Vec::new(),
                Some(SuiteSkipReason::NoExecutableTests),
            ));
        }

        if !baseline_run.all_executed_succeeded() {
            let failing: Vec<String> = baseline_run
                .detections()
                .map(|r| r.test_name.clone())
                .collect();
            error!(code_unit = %code_unit, ?failing, "test suite fails without mutation");
            self.listeners.emit(&ExecutionEvent::SuiteBroken {
                timestamp_ms: now_epoch_ms(),
                code_unit: code_unit.clone(),
                failing: failing.clone(),
            });
            return Err(EvaluationError::SuiteAlreadyBroken {
                code_unit,
                failing,
                baseline: Box::new(baseline_run),
            });
        }

        let evaluations = self.sweep(units, &baseline_run, mutants)?;
        Ok(self.finish(code_unit, baseline_run, evaluations, None))
    }

    fn sweep<C>(
        &mut self,
        units: &[TestUnit<C>],
        baseline: &RunResult,
        mutants: &[Candidate<C>],
    ) -> Result<Vec<MutantEvaluation>, EvaluationError>
    where
        C: Send + Sync + 'static,
    {
        let deadline = self.config.deadline();
        let workers = self.config.workers.min(mutants.len()).max(1);
        let mut slots: Vec<Option<MutantEvaluation>> = mutants.iter().map(|_| None).collect();

        if workers == 1 {
            for (index, mutant) in mutants.iter().enumerate() {
                let run = self.container.run(mutant, units, deadline)?;
                slots[index] = Some(record_mutant(&mut self.listeners, baseline, run));
            }
        } else {
            let container = &self.container;
            let listeners = &mut self.listeners;
            let next = AtomicUsize::new(0);

            thread::scope(|scope| -> Result<(), EvaluationError> {
                let (tx, rx) = mpsc::channel::<(usize, Result<RunResult, ContainerError>)>();
                for worker in 0..workers {
                    let tx = tx.clone();
                    let next = &next;
                    thread::Builder::new()
                        .name(format!("mutation-worker-{worker}"))
                        .spawn_scoped(scope, move || {
                            loop {
                                let index = next.fetch_add(1, Ordering::SeqCst);
                                let Some(mutant) = mutants.get(index) else {
                                    break;
                                };
                                let result = container.run(mutant, units, deadline);
                                let failed = result.is_err();
                                if tx.send((index, result)).is_err() || failed {
                                    break;
                                }
                            }
                        })
                        .map_err(ContainerError::from)?;
                }
                drop(tx);

                for (index, result) in rx {
                    slots[index] = Some(record_mutant(listeners, baseline, result?));
                }
                Ok(())
            })?;
        }

        Ok(slots.into_iter().flatten().collect())
    }

    fn finish(
        &mut self,
        code_unit: String,
        baseline: RunResult,
        mutants: Vec<MutantEvaluation>,
        skipped: Option<SuiteSkipReason>,
    ) -> EvaluationReport {
        let total = mutants.len();
        let killed = mutants.iter().filter(|m| m.verdict.is_killed()).count();
        let (verdict, rate) = match skipped {
            Some(reason) => (SuiteVerdict::Skipped { reason }, None),
            None => (
                score_suite(killed, total, self.config.threshold),
                kill_rate(killed, total),
            ),
        };

        info!(code_unit = %code_unit, %verdict, killed, total, kill_rate = ?rate, "suite judged");
        self.listeners.emit(&ExecutionEvent::SuiteVerdict {
            timestamp_ms: now_epoch_ms(),
            code_unit: code_unit.clone(),
            verdict,
            kill_rate: rate,
            killed,
            total,
            threshold: self.config.threshold,
            mutators: self.config.mutators.clone(),
        });

        EvaluationReport {
            code_unit,
            baseline,
            mutants,
            verdict,
            kill_rate: rate,
            threshold: self.config.threshold,
            mutators: self.config.mutators.clone(),
        }
    }
}

fn record_mutant(
    listeners: &mut ListenerSet,
    baseline: &RunResult,
    run: RunResult,
) -> MutantEvaluation {
    listeners.emit_all(&ExecutionEvent::for_run(&run));
    let verdict = judge_mutant(baseline, &run);
    listeners.emit(&ExecutionEvent::mutation_verdict(
        run.candidate.clone(),
        verdict.clone(),
    ));
    MutantEvaluation {
        mutant: run.candidate.clone(),
        verdict,
        run,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::listener::EventCollector;
    use crate::unit::{MutationDescriptor, TestFault, expect_eq};

    type Code = fn(u32) -> u32;

    fn identity(x: u32) -> u32 {
        x
    }

    fn plus_one(x: u32) -> u32 {
        x + 1
    }

    fn suite() -> Vec<TestUnit<Code>> {
        vec![TestUnit::<Code>::new("identity_of_one", |ctx| {
            expect_eq(1, (ctx.code())(1))
        })]
    }

    fn mutant(id: &str, code: Code) -> Candidate<Code> {
        Candidate::mutant("identity", MutationDescriptor::new(id, "return_vals", id), code)
    }

    fn orchestrator(config: EvaluationConfig) -> (MutationOrchestrator, EventCollector) {
        let collector = EventCollector::new();
        let mut orchestrator = MutationOrchestrator::new(config).expect("config should be valid");
        orchestrator.add_listener(collector.clone());
        (orchestrator, collector)
    }

    #[test]
    fn all_mutants_killed_passes_full_threshold() {
        let (mut orch, _) = orchestrator(EvaluationConfig::default());
        let report = orch
            .evaluate(
                &suite(),
                &Candidate::baseline("identity", identity as Code),
                &[mutant("m1", plus_one)],
            )
            .expect("evaluation should run");
        assert_eq!(report.verdict, SuiteVerdict::Pass);
        assert_eq!(report.kill_rate, Some(100.0));
        assert_eq!(report.killed(), 1);
    }

    #[test]
    fn survivor_below_threshold_fails() {
        let (mut orch, _) = orchestrator(EvaluationConfig::default().with_threshold(60.0));
        let report = orch
            .evaluate(
                &suite(),
                &Candidate::baseline("identity", identity as Code),
                &[mutant("killed", plus_one), mutant("equivalent", identity)],
            )
            .expect("evaluation should run");
        assert_eq!(report.verdict, SuiteVerdict::Fail);
        assert_eq!(report.survivors().count(), 1);
        assert_eq!(report.mutants[1].verdict, MutationVerdict::Survived);
    }

    #[test]
    fn broken_baseline_stops_before_mutants() {
        let (mut orch, collector) = orchestrator(EvaluationConfig::default());
        let err = orch
            .evaluate(
                &suite(),
                &Candidate::baseline("identity", plus_one as Code),
                &[mutant("m1", identity)],
            )
            .expect_err("broken suite should be reported");

        match err {
            EvaluationError::SuiteAlreadyBroken { failing, .. } => {
                assert_eq!(failing, vec!["identity_of_one".to_string()])
            }
            other => panic!("expected SuiteAlreadyBroken, got {other:?}"),
        }
        let events = collector.events();
        assert!(
            !events
                .iter()
                .any(|e| matches!(e, ExecutionEvent::MutationVerdict { .. }))
        );
        assert!(matches!(events.last(), Some(ExecutionEvent::SuiteBroken { .. })));
    }

    #[test]
    fn no_mutants_is_skipped_after_baseline() {
        let (mut orch, collector) = orchestrator(EvaluationConfig::default());
        let report = orch
            .evaluate(&suite(), &Candidate::baseline("identity", identity as Code), &[])
            .expect("evaluation should run");
        assert_eq!(
            report.verdict,
            SuiteVerdict::Skipped {
                reason: SuiteSkipReason::NoMutants
            }
        );
        assert!(matches!(
            collector.events().first(),
            Some(ExecutionEvent::RunStarted { .. })
        ));
    }

    #[test]
    fn all_excluded_tests_is_skipped_not_broken() {
        let (mut orch, _) = orchestrator(EvaluationConfig::default());
        let units: Vec<TestUnit<Code>> = vec![
            TestUnit::new("ignored_failure", |_ctx| Err(TestFault::assertion("1 != 2")))
                .excluded(),
        ];
        let report = orch
            .evaluate(
                &units,
                &Candidate::baseline("identity", identity as Code),
                &[mutant("m1", plus_one)],
            )
            .expect("evaluation should run");
        assert_eq!(
            report.verdict,
            SuiteVerdict::Skipped {
                reason: SuiteSkipReason::NoExecutableTests
            }
        );
        assert!(report.mutants.is_empty());
    }

    #[test]
    fn parallel_sweep_keeps_input_order_and_contiguous_run_events() {
        let config = EvaluationConfig::default()
            .with_workers(3)
            .with_deadline(Duration::from_secs(5));
        let (mut orch, collector) = orchestrator(config);
        let mutants: Vec<Candidate<Code>> = (0..6)
            .map(|i| {
                if i % 2 == 0 {
                    mutant(&format!("m{i}"), plus_one)
                } else {
                    mutant(&format!("m{i}"), identity)
                }
            })
            .collect();

        let report = orch
            .evaluate(
                &suite(),
                &Candidate::baseline("identity", identity as Code),
                &mutants,
            )
            .expect("evaluation should run");

        let ids: Vec<&str> = report.mutants.iter().map(|m| m.mutant.mutant_id()).collect();
        assert_eq!(ids, vec!["m0", "m1", "m2", "m3", "m4", "m5"]);
        assert_eq!(report.killed(), 3);
        assert_eq!(report.verdict, SuiteVerdict::Fail);

        // Every run's events are contiguous: start, tests, completion, then verdict.
        let events = collector.events();
        let mut open_run: Option<String> = None;
        for event in &events {
            match event {
                ExecutionEvent::RunStarted { run_id, .. } => {
                    assert!(open_run.is_none(), "runs must not interleave");
                    open_run = Some(run_id.clone());
                }
                ExecutionEvent::TestFinished { run_id, .. } => {
                    assert_eq!(open_run.as_ref(), Some(run_id));
                }
                ExecutionEvent::RunCompleted { run_id, .. } => {
                    assert_eq!(open_run.take().as_ref(), Some(run_id));
                }
                _ => assert!(open_run.is_none()),
            }
        }
    }
}
