//! Snapshot-isolated verification of trace batches.

use serde::Serialize;
use stepverify_authority::{Authority, StepShape};
use stepverify_core::{LoadedFile, Trace};
use tracing::{info, warn};

use crate::error::{ReplayError, Result};
use crate::observer::ReplayObserver;
use crate::replayer::{StepResult, TraceReplayer};
use crate::report::{FailureContext, ParseFailure, Report, UnitOutcome, UnitResult};
use crate::session::RemoteSession;
use crate::step::{invoker_for, negotiate, ShapeChoice};

/// What one snapshot boundary encloses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Isolation {
    /// One unit per trace; a reverted step ends the trace.
    #[default]
    PerTrace,
    /// One unit per step.
    PerStep,
}

#[derive(Debug, Clone)]
pub struct VerifyConfig {
    pub isolation: Isolation,
    /// Steps to skip at the start of every trace.
    pub skip: usize,
    pub shape: ShapeChoice,
    /// With per-step isolation, keep replaying a trace after a step reverted.
    pub keep_going: bool,
    /// Bracket entries kept for each failure.
    pub bracket_tail: usize,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            isolation: Isolation::default(),
            skip: 0,
            shape: ShapeChoice::Auto,
            keep_going: false,
            bracket_tail: 2,
        }
    }
}

/// Replays traces inside snapshot boundaries and aggregates the outcomes.
///
/// Failures inside a unit are recorded against it and the authority is
/// rolled back before the next unit. Only failures to snapshot or roll back
/// stop the batch.
pub struct Verifier<'a, A> {
    session: &'a RemoteSession<A>,
    config: VerifyConfig,
    shape: StepShape,
    observer: &'a dyn ReplayObserver,
}

impl<'a, A: Authority> Verifier<'a, A> {
    pub fn new(
        session: &'a RemoteSession<A>,
        config: VerifyConfig,
        observer: &'a dyn ReplayObserver,
    ) -> Result<Self> {
        let shape = negotiate(session.protocol(), config.shape)?;
        info!(%shape, isolation = ?config.isolation, skip = config.skip, "verifier ready");
        Ok(Self {
            session,
            config,
            shape,
            observer,
        })
    }

    pub fn shape(&self) -> StepShape {
        self.shape
    }

    pub fn verify(&self, files: &[LoadedFile]) -> Result<Report> {
        let invoker = invoker_for(self.session, self.shape);
        let replayer = TraceReplayer::new(self.session, invoker.as_ref());
        let mut report = Report::default();

        for file in files {
            match &file.traces {
                Err(e) => {
                    warn!(path = %file.path.display(), "skipping unparsable file: {e}");
                    report.parse_failures.push(ParseFailure {
                        path: file.path.clone(),
                        message: e.to_string(),
                    });
                }
                Ok(traces) => {
                    for trace in traces {
                        match self.config.isolation {
                            Isolation::PerTrace => self.verify_trace(&replayer, trace, &mut report)?,
                            Isolation::PerStep => self.verify_steps(&replayer, trace, &mut report)?,
                        }
                    }
                }
            }
        }

        info!(
            succeeded = report.success_count(),
            reverted = report.reverted_count(),
            aborted = report.aborted_count(),
            "verification finished"
        );
        self.observer.on_complete(&report);
        Ok(report)
    }

    /// Run `unit` between a snapshot and a rollback.
    fn isolated<T>(&self, unit: impl FnOnce() -> T) -> Result<T> {
        let authority = self.session.authority();
        let snapshot = authority.snapshot()?;
        let value = unit();
        authority.revert(&snapshot)?;
        Ok(value)
    }

    fn verify_trace(
        &self,
        replayer: &TraceReplayer<'_, A>,
        trace: &Trace,
        report: &mut Report,
    ) -> Result<()> {
        let index = report.units.len();
        self.observer.on_unit_start(index, &trace.name);

        let mut next_step = self.config.skip;
        let replayed = self.isolated(|| {
            replayer.replay_all(trace, self.config.skip, |result| {
                next_step = result.index + 1;
                self.observer.on_step(index, result);
            })
        })?;

        let unit = match replayed {
            Ok(results) => self.unit_from_steps(index, trace, None, &results),
            Err(e) => self.aborted_unit(index, trace, None, next_step, e),
        };
        self.finish_unit(unit, report);
        Ok(())
    }

    fn verify_steps(
        &self,
        replayer: &TraceReplayer<'_, A>,
        trace: &Trace,
        report: &mut Report,
    ) -> Result<()> {
        for step_index in self.config.skip..trace.steps.len() {
            let index = report.units.len();
            self.observer
                .on_unit_start(index, &format!("{} step {step_index}", trace.name));

            let replayed = self.isolated(|| replayer.replay_isolated(trace, step_index))?;
            let unit = match replayed {
                Ok(result) => {
                    self.observer.on_step(index, &result);
                    self.unit_from_steps(index, trace, Some(step_index), &[result])
                }
                Err(e) => self.aborted_unit(index, trace, Some(step_index), step_index, e),
            };
            let stop = !unit.is_success() && !self.config.keep_going;
            self.finish_unit(unit, report);
            if stop {
                info!(trace = %trace.name, step = step_index, "stopping trace after failed step");
                break;
            }
        }
        Ok(())
    }

    fn finish_unit(&self, unit: UnitResult, report: &mut Report) {
        match &unit.outcome {
            UnitOutcome::Success => info!(unit = unit.index, name = %unit.name, "unit succeeded"),
            outcome => warn!(unit = unit.index, name = %unit.name, %outcome, "unit failed"),
        }
        self.observer.on_unit_complete(&unit);
        report.units.push(unit);
    }

    fn unit_from_steps(
        &self,
        index: usize,
        trace: &Trace,
        step: Option<usize>,
        results: &[StepResult],
    ) -> UnitResult {
        let failed = results.last().filter(|last| last.outcome.is_reverted());
        let outcome = match failed {
            Some(last) => UnitOutcome::from(last.outcome.clone()),
            None => UnitOutcome::Success,
        };
        let failure = failed.map(|last| FailureContext {
            rejected_accesses: last.rejected_accesses(),
            ..self.failure_context(trace, last.index)
        });
        UnitResult {
            index,
            name: trace.name.clone(),
            source: trace.source.clone(),
            step,
            steps_replayed: results.len(),
            outcome,
            failure,
        }
    }

    fn aborted_unit(
        &self,
        index: usize,
        trace: &Trace,
        step: Option<usize>,
        failing_step: usize,
        error: ReplayError,
    ) -> UnitResult {
        UnitResult {
            index,
            name: trace.name.clone(),
            source: trace.source.clone(),
            step,
            steps_replayed: failing_step.saturating_sub(step.unwrap_or(self.config.skip)),
            outcome: UnitOutcome::Aborted {
                error: error.to_string(),
            },
            failure: (failing_step < trace.steps.len())
                .then(|| self.failure_context(trace, failing_step)),
        }
    }

    fn failure_context(&self, trace: &Trace, step_index: usize) -> FailureContext {
        let step = &trace.steps[step_index];
        FailureContext {
            step: step_index,
            brackets: step.bracket_tail(self.config.bracket_tail).to_vec(),
            cycles: step.cycles,
            rejected_accesses: 0,
        }
    }
}
