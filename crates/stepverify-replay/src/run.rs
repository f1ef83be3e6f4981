//! Continuous runs: bulk-load a program and step it until it halts.

use std::path::PathBuf;

use alloy_primitives::Address;
use stepverify_authority::{Authority, InstanceHandle, StepShape};
use stepverify_core::manifest::{LoadEntry, RunManifest, RAM_START};
use stepverify_core::{Hash, Outcome};
use tracing::{debug, info, warn};

use crate::bulk::BulkLoader;
use crate::error::{ReplayError, Result};
use crate::instance::{finish_proof_phase, open_instance, Opened};
use crate::observer::ReplayObserver;
use crate::report::{RunReport, RunResult, UnitOutcome};
use crate::retry::RetryPolicy;
use crate::session::RemoteSession;

#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    /// Give up after this many step invocations.
    pub max_cycles: Option<u64>,
    /// Applied to step invocations and bulk writes.
    pub retry: RetryPolicy,
}

/// A program to load at the RAM base and run to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    pub name: String,
    pub image: PathBuf,
    /// Images loaded before the program, in order.
    pub loads: Vec<LoadEntry>,
    pub expected_exit_code: u64,
    pub expected_mcycle: Option<u64>,
}

impl Program {
    pub fn new(image: impl Into<PathBuf>) -> Self {
        let image = image.into();
        Self {
            name: display_name(&image),
            image,
            loads: Vec::new(),
            expected_exit_code: 0,
            expected_mcycle: None,
        }
    }

    /// One program per manifest test, each preceded by the manifest's loads.
    pub fn from_manifest(manifest: &RunManifest) -> Vec<Program> {
        manifest
            .tests
            .iter()
            .map(|test| Program {
                name: display_name(&test.file),
                image: test.file.clone(),
                loads: manifest.loads.clone(),
                expected_exit_code: test.exit_code.unwrap_or(0),
                expected_mcycle: test.mcycle,
            })
            .collect()
    }
}

fn display_name(path: &std::path::Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Owner of instances opened for continuous runs.
pub fn run_owner() -> Address {
    Address::with_last_byte(1)
}

/// How a run ended, before expectations are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Halt {
    pub outcome: Outcome,
    /// Cycle reported by the last status event.
    pub cycles: u64,
}

pub struct ContinuousRunner<'a, A> {
    session: &'a RemoteSession<A>,
    config: RunConfig,
    observer: &'a dyn ReplayObserver,
}

impl<'a, A: Authority> ContinuousRunner<'a, A> {
    /// Continuous runs step by handle; other call shapes are refused.
    pub fn new(
        session: &'a RemoteSession<A>,
        config: RunConfig,
        observer: &'a dyn ReplayObserver,
    ) -> Result<Self> {
        let shape = session.protocol().step_shape;
        if shape != StepShape::HandleAddressed {
            return Err(ReplayError::Configuration(format!(
                "continuous runs need handle-addressed stepping, the authority declares {shape}"
            )));
        }
        Ok(Self {
            session,
            config,
            observer,
        })
    }

    /// Invoke `Step(handle)` until a status event reports a halt, then read
    /// the exit code.
    ///
    /// Transport failures retry the same cycle under the retry policy. A
    /// reverted step ends the run.
    pub fn run_until_halt(&self, handle: InstanceHandle) -> Result<Halt> {
        let authority = self.session.authority();
        let mut cycles = 0;
        let mut invocations = 0u64;
        loop {
            let receipt = self.config.retry.run("step", || authority.step(handle))?;
            invocations += 1;
            if let Some(reason) = receipt.revert_reason() {
                warn!(%handle, cycles, %reason, "step reverted");
                return Ok(Halt {
                    outcome: Outcome::reverted(reason),
                    cycles,
                });
            }

            let status = receipt.step_status()?;
            cycles = status.cycle;
            if status.halt {
                debug!(%handle, cycles, "machine halted");
                break;
            }
            self.observer.on_cycle(cycles);

            if let Some(limit) = self.config.max_cycles {
                if invocations >= limit {
                    return Err(ReplayError::CycleLimit { limit });
                }
            }
        }

        let receipt = authority.htif_exit(handle)?;
        if let Some(reason) = receipt.revert_reason() {
            return Ok(Halt {
                outcome: Outcome::reverted(format!("htifExit: {reason}")),
                cycles,
            });
        }
        let exit_code = receipt.exit_code()?;
        info!(%handle, cycles, exit_code, "run finished");
        Ok(Halt {
            outcome: Outcome::Halted { exit_code },
            cycles,
        })
    }

    /// Run one program inside its own snapshot boundary.
    pub fn run_program(&self, index: usize, program: &Program) -> Result<RunResult> {
        self.observer.on_unit_start(index, &program.name);
        let authority = self.session.authority();
        let snapshot = authority.snapshot()?;
        let executed = self.execute(program);
        authority.revert(&snapshot)?;

        let (outcome, cycles) = match executed {
            Ok(halt) => (UnitOutcome::from(halt.outcome), halt.cycles),
            Err(e) => {
                warn!(program = %program.name, "run aborted: {e}");
                (
                    UnitOutcome::Aborted {
                        error: e.to_string(),
                    },
                    0,
                )
            }
        };
        let result = RunResult {
            index,
            name: program.name.clone(),
            outcome,
            cycles,
            expected_exit_code: program.expected_exit_code,
            expected_mcycle: program.expected_mcycle,
        };
        self.observer.on_run_complete(&result);
        Ok(result)
    }

    pub fn run_all(&self, programs: &[Program]) -> Result<RunReport> {
        let mut report = RunReport::default();
        for (index, program) in programs.iter().enumerate() {
            report.runs.push(self.run_program(index, program)?);
        }
        self.observer.on_runs_complete(&report);
        Ok(report)
    }

    fn execute(&self, program: &Program) -> Result<Halt> {
        let accounts = self.session.accounts();
        let handle = match open_instance(self.session, run_owner(), accounts.provider, Hash::ZERO)? {
            Opened::Ready(handle) => handle,
            Opened::Reverted(reason) => {
                return Ok(Halt {
                    outcome: Outcome::reverted(format!("instantiate: {reason}")),
                    cycles: 0,
                })
            }
        };
        if self.session.protocol().finish_phase {
            if let Some(reason) = finish_proof_phase(self.session, handle)? {
                return Ok(Halt {
                    outcome: Outcome::reverted(format!("finishProofPhase: {reason}")),
                    cycles: 0,
                });
            }
        }

        let loader = BulkLoader::new(self.session, self.config.retry);
        for load in &program.loads {
            loader.load_file(handle, load.position, &load.file, self.observer)?;
        }
        loader.load_file(handle, RAM_START, &program.image, self.observer)?;

        self.run_until_halt(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::NoopObserver;
    use stepverify_authority::{MemoryAuthority, ProtocolDescriptor};
    use stepverify_core::manifest::RunTest;

    #[test]
    fn explicit_array_authority_is_refused() {
        let session =
            RemoteSession::open(MemoryAuthority::new(ProtocolDescriptor::explicit_array())).unwrap();
        assert!(matches!(
            ContinuousRunner::new(&session, RunConfig::default(), &NoopObserver),
            Err(ReplayError::Configuration(_))
        ));
    }

    #[test]
    fn manifest_tests_share_loads() {
        let manifest = RunManifest {
            loads: vec![LoadEntry {
                file: "shadow.bin".into(),
                position: 0,
            }],
            tests: vec![
                RunTest {
                    file: "dir/add.bin".into(),
                    mcycle: Some(10),
                    exit_code: None,
                },
                RunTest {
                    file: "dir/sub.bin".into(),
                    mcycle: None,
                    exit_code: Some(3),
                },
            ],
        };
        let programs = Program::from_manifest(&manifest);
        assert_eq!(programs.len(), 2);
        assert_eq!(programs[0].name, "add.bin");
        assert_eq!(programs[0].expected_exit_code, 0);
        assert_eq!(programs[1].expected_exit_code, 3);
        assert_eq!(programs[1].loads, manifest.loads);
    }
}
