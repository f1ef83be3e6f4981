//! Command implementations for the stepverify CLI.

pub mod inspect;
pub mod run;
pub mod verify;

use std::time::Duration;

use anyhow::{Context, Result};
use stepverify_authority::{
    AddressResolver, DeploymentsDir, EvmAuthority, EvmConfig, NetworkArtifacts,
};
use stepverify_replay::{
    RemoteSession, Report, ReplayObserver, RunReport, RunResult, StepResult, UnitResult,
};
use tracing::info;

use crate::AuthorityArgs;

/// Pick the address resolver the flags describe.
fn resolver(args: &AuthorityArgs) -> Box<dyn AddressResolver> {
    match (&args.artifacts, &args.network_id) {
        (Some(dir), Some(network_id)) => Box::new(NetworkArtifacts::new(dir, network_id.clone())),
        _ => Box::new(DeploymentsDir::new(&args.deployments)),
    }
}

/// Connect to the node and open a session against the deployed contracts.
fn connect(args: &AuthorityArgs, memory_contract: &str) -> Result<RemoteSession<EvmAuthority>> {
    let config = EvmConfig {
        timeout: Duration::from_secs(args.timeout_secs),
        poll_interval: Duration::from_millis(args.poll_ms),
        gas: args.gas,
        memory_contract: args
            .memory_contract
            .clone()
            .unwrap_or_else(|| memory_contract.to_string()),
        step_contract: args.step_contract.clone(),
        ..EvmConfig::new(args.node.clone())
    };
    info!(
        node = %config.url,
        memory = %config.memory_contract,
        step = %config.step_contract,
        "connecting to authority"
    );

    let authority = EvmAuthority::connect(config, resolver(args).as_ref())
        .with_context(|| format!("Failed to connect to the authority at {}", args.node))?;
    let session = RemoteSession::open(authority).context("Failed to open a session")?;
    info!(protocol = ?session.protocol(), "session open");
    Ok(session)
}

/// Progress lines on stdout. Silent when the report is printed as JSON.
pub struct ConsoleObserver {
    quiet: bool,
}

/// Cycles between progress lines of a continuous run.
const CYCLE_PROGRESS_INTERVAL: u64 = 10_000;

impl ConsoleObserver {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

impl ReplayObserver for ConsoleObserver {
    fn on_unit_start(&self, index: usize, name: &str) {
        if !self.quiet {
            println!("[{index}] {name}");
        }
    }

    fn on_step(&self, _unit: usize, result: &StepResult) {
        if self.quiet || result.outcome.is_success() {
            return;
        }
        println!(
            "    step {}: {} ({} rejected accesses)",
            result.index,
            result.outcome,
            result.rejected_accesses()
        );
    }

    fn on_unit_complete(&self, result: &UnitResult) {
        if !self.quiet {
            println!("[{}] {}", result.index, result.outcome);
        }
    }

    fn on_cycle(&self, cycle: u64) {
        if !self.quiet && cycle % CYCLE_PROGRESS_INTERVAL == 0 {
            println!("    cycle {cycle}");
        }
    }

    fn on_load_progress(&self, position: u64, loaded: u64, total: u64) {
        if !self.quiet && loaded == total {
            println!("    loaded {total} bytes at {position:#x}");
        }
    }

    fn on_run_complete(&self, result: &RunResult) {
        if !self.quiet {
            println!(
                "[{}] {} after {} cycles",
                result.index, result.outcome, result.cycles
            );
        }
    }
}

/// Print a verification report in the requested format.
fn print_report(report: &Report, json: bool) -> Result<()> {
    if json {
        println!("{}", report.to_json().context("Failed to render the report")?);
    } else {
        println!();
        print!("{}", report.to_text());
    }
    Ok(())
}

fn print_run_report(report: &RunReport, json: bool) -> Result<()> {
    if json {
        println!("{}", report.to_json().context("Failed to render the report")?);
    } else {
        println!();
        print!("{}", report.to_text());
    }
    Ok(())
}
