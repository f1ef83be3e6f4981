//! Aggregated results of a verification or continuous-run session.

use itertools::Itertools;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::PathBuf;

use stepverify_core::trace::CycleSpan;
use stepverify_core::Outcome;

/// Final state of one isolated unit (a trace, a step, or a program run).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UnitOutcome {
    Success,
    Halted { exit_code: u64 },
    Reverted { reason: String },
    /// The unit could not be completed (transport failure, missing event).
    Aborted { error: String },
}

impl From<Outcome> for UnitOutcome {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Success => UnitOutcome::Success,
            Outcome::Reverted { reason } => UnitOutcome::Reverted { reason },
            Outcome::Halted { exit_code } => UnitOutcome::Halted { exit_code },
        }
    }
}

impl std::fmt::Display for UnitOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnitOutcome::Success => write!(f, "SUCCESS"),
            UnitOutcome::Halted { exit_code } => write!(f, "HALTED with exit code {exit_code}"),
            UnitOutcome::Reverted { reason } => write!(f, "REVERTED ({reason})"),
            UnitOutcome::Aborted { error } => write!(f, "ABORTED ({error})"),
        }
    }
}

/// Where a unit failed, for debugging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureContext {
    /// Index of the failing step within its trace.
    pub step: usize,
    /// Trailing bracket entries of the failing step.
    pub brackets: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycles: Option<CycleSpan>,
    pub rejected_accesses: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitResult {
    pub index: usize,
    pub name: String,
    pub source: PathBuf,
    /// Step index, when the unit is a single step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<usize>,
    pub steps_replayed: usize,
    #[serde(flatten)]
    pub outcome: UnitOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureContext>,
}

impl UnitResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, UnitOutcome::Success)
    }

    pub fn is_reverted(&self) -> bool {
        matches!(self.outcome, UnitOutcome::Reverted { .. })
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self.outcome, UnitOutcome::Aborted { .. })
    }
}

/// A trace file that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParseFailure {
    pub path: PathBuf,
    pub message: String,
}

/// Counts, derived from the unit list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub attempted: usize,
    pub succeeded: usize,
    pub reverted: usize,
    pub aborted: usize,
    pub parse_failures: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Report {
    pub units: Vec<UnitResult>,
    pub parse_failures: Vec<ParseFailure>,
}

impl Report {
    pub fn summary(&self) -> Summary {
        Summary {
            attempted: self.units.len(),
            succeeded: self.success_count(),
            reverted: self.reverted_count(),
            aborted: self.aborted_count(),
            parse_failures: self.parse_failures.len(),
        }
    }

    pub fn success_count(&self) -> usize {
        self.units.iter().filter(|u| u.is_success()).count()
    }

    pub fn reverted_count(&self) -> usize {
        self.units.iter().filter(|u| u.is_reverted()).count()
    }

    pub fn aborted_count(&self) -> usize {
        self.units.iter().filter(|u| u.is_aborted()).count()
    }

    /// Indices of units that did not succeed, in replay order.
    pub fn failing_indices(&self) -> Vec<usize> {
        self.units
            .iter()
            .filter(|u| !u.is_success())
            .map(|u| u.index)
            .collect()
    }

    /// All-or-nothing verdict: every unit succeeded and every file parsed.
    pub fn passed(&self) -> bool {
        self.reverted_count() == 0 && self.aborted_count() == 0 && self.parse_failures.is_empty()
    }

    pub fn to_text(&self) -> String {
        let summary = self.summary();
        let mut out = String::new();
        let _ = writeln!(out, "Number of units attempted: {}", summary.attempted);
        let _ = writeln!(out, "Number of successful units: {}", summary.succeeded);
        let _ = writeln!(out, "Number of reverted units: {}", summary.reverted);
        if summary.aborted > 0 {
            let _ = writeln!(out, "Number of aborted units: {}", summary.aborted);
        }

        let failing = self.failing_indices();
        if !failing.is_empty() {
            let _ = writeln!(out, "List of failing units: [{}]", failing.iter().join(", "));
            for unit in self.units.iter().filter(|u| !u.is_success()) {
                let _ = write!(out, "  #{} {}", unit.index, unit.name);
                if let Some(failure) = &unit.failure {
                    let _ = write!(out, " step {}", failure.step);
                }
                let _ = writeln!(out, ": {}", unit.outcome);
                if let Some(failure) = &unit.failure {
                    if !failure.brackets.is_empty() {
                        let _ = writeln!(out, "      brackets: {}", failure.brackets.iter().join(" > "));
                    }
                    if let Some(cycles) = failure.cycles {
                        let _ = writeln!(out, "      cycles: {}..{}", cycles.start, cycles.end);
                    }
                }
            }
        }

        if !self.parse_failures.is_empty() {
            let _ = writeln!(out, "Number of unparsable files: {}", self.parse_failures.len());
            for failure in &self.parse_failures {
                let _ = writeln!(out, "  {}: {}", failure.path.display(), failure.message);
            }
        }
        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        #[derive(Serialize)]
        struct Json<'a> {
            passed: bool,
            summary: Summary,
            failing: Vec<usize>,
            units: &'a [UnitResult],
            parse_failures: &'a [ParseFailure],
        }
        serde_json::to_string_pretty(&Json {
            passed: self.passed(),
            summary: self.summary(),
            failing: self.failing_indices(),
            units: &self.units,
            parse_failures: &self.parse_failures,
        })
    }
}

/// Result of running one program until it halted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunResult {
    pub index: usize,
    pub name: String,
    #[serde(flatten)]
    pub outcome: UnitOutcome,
    /// Cycle reported by the last status event.
    pub cycles: u64,
    pub expected_exit_code: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_mcycle: Option<u64>,
}

impl RunResult {
    /// Halted with the expected exit code, and the expected cycle count when
    /// one was given.
    pub fn passed(&self) -> bool {
        match self.outcome {
            UnitOutcome::Halted { exit_code } => {
                exit_code == self.expected_exit_code
                    && self.expected_mcycle.map_or(true, |mcycle| mcycle == self.cycles)
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub runs: Vec<RunResult>,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.runs.iter().all(RunResult::passed)
    }

    pub fn failing_indices(&self) -> Vec<usize> {
        self.runs
            .iter()
            .filter(|run| !run.passed())
            .map(|run| run.index)
            .collect()
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for run in &self.runs {
            let verdict = if run.passed() { "PASS" } else { "FAIL" };
            let _ = writeln!(
                out,
                "{verdict} #{} {}: {} after {} cycles",
                run.index, run.name, run.outcome, run.cycles
            );
            if !run.passed() {
                let _ = write!(out, "      expected exit code {}", run.expected_exit_code);
                if let Some(mcycle) = run.expected_mcycle {
                    let _ = write!(out, " at cycle {mcycle}");
                }
                let _ = writeln!(out);
            }
        }
        let failing = self.failing_indices();
        let _ = writeln!(
            out,
            "Number of passing runs: {}/{}",
            self.runs.len() - failing.len(),
            self.runs.len()
        );
        if !failing.is_empty() {
            let _ = writeln!(out, "List of failing runs: [{}]", failing.iter().join(", "));
        }
        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(index: usize, outcome: UnitOutcome) -> UnitResult {
        UnitResult {
            index,
            name: format!("trace{index}.json"),
            source: PathBuf::from(format!("trace{index}.json")),
            step: None,
            steps_replayed: 1,
            outcome,
            failure: None,
        }
    }

    #[test]
    fn counts_and_verdict() {
        let mut report = Report::default();
        report.units.push(unit(0, UnitOutcome::Success));
        report.units.push(unit(
            1,
            UnitOutcome::Reverted {
                reason: "bad proof".into(),
            },
        ));
        assert_eq!(report.success_count(), 1);
        assert_eq!(report.reverted_count(), 1);
        assert_eq!(report.failing_indices(), vec![1]);
        assert!(!report.passed());

        let text = report.to_text();
        assert!(text.contains("Number of successful units: 1"));
        assert!(text.contains("List of failing units: [1]"));
    }

    #[test]
    fn parse_failures_fail_the_run() {
        let mut report = Report::default();
        report.units.push(unit(0, UnitOutcome::Success));
        assert!(report.passed());
        report.parse_failures.push(ParseFailure {
            path: "broken.json".into(),
            message: "expected `[`".into(),
        });
        assert!(!report.passed());
    }

    #[test]
    fn json_report_flattens_outcomes() {
        let mut report = Report::default();
        report.units.push(unit(
            0,
            UnitOutcome::Aborted {
                error: "timeout".into(),
            },
        ));
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["passed"], false);
        assert_eq!(json["summary"]["aborted"], 1);
        assert_eq!(json["units"][0]["outcome"], "aborted");
        assert_eq!(json["units"][0]["error"], "timeout");
    }

    #[test]
    fn run_passes_on_expected_exit_code_and_cycles() {
        let mut run = RunResult {
            index: 0,
            name: "prog.bin".into(),
            outcome: UnitOutcome::Halted { exit_code: 0 },
            cycles: 12,
            expected_exit_code: 0,
            expected_mcycle: Some(12),
        };
        assert!(run.passed());
        run.expected_mcycle = Some(13);
        assert!(!run.passed());
    }
}
