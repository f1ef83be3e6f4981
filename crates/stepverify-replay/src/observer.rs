//! Progress callbacks.

use crate::replayer::StepResult;
use crate::report::{Report, RunReport, RunResult, UnitResult};

/// Receives progress while traces and programs are replayed.
///
/// Every method defaults to doing nothing.
pub trait ReplayObserver {
    fn on_unit_start(&self, _index: usize, _name: &str) {}

    fn on_step(&self, _unit: usize, _result: &StepResult) {}

    fn on_unit_complete(&self, _result: &UnitResult) {}

    /// A non-halting step of a continuous run reported `cycle`.
    fn on_cycle(&self, _cycle: u64) {}

    fn on_load_progress(&self, _position: u64, _loaded: u64, _total: u64) {}

    fn on_run_complete(&self, _result: &RunResult) {}

    fn on_complete(&self, _report: &Report) {}

    fn on_runs_complete(&self, _report: &RunReport) {}
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ReplayObserver for NoopObserver {}
