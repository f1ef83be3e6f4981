//! CLI tool for the stepverify toolchain.
//!
//! Replays memory-access traces against a memory manager and step contract
//! deployed on an EVM node, runs bulk-loaded programs to completion, and
//! inspects trace files offline.

mod commands;
mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use url::Url;

use crate::logging::{LogFormat, LogLevel};

#[derive(Parser)]
#[command(name = "stepverify")]
#[command(about = "Replay memory-access traces against a step authority", long_about = None)]
#[command(version)]
struct Cli {
    /// Log level for the stepverify crates (RUST_LOG takes precedence)
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Plaintext)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay trace files and report which units the authority accepts
    Verify {
        /// Trace file, or a directory of trace files
        path: PathBuf,

        /// Number of leading steps to skip in every trace
        #[arg(default_value_t = 0)]
        skip: usize,

        /// What one snapshot boundary encloses
        #[arg(long, value_enum, default_value = "trace")]
        isolation: IsolationArg,

        /// Step call shape (auto follows the deployed contracts)
        #[arg(long, value_enum, default_value = "auto")]
        step_shape: StepShapeArg,

        /// With per-step isolation, keep replaying a trace after a failed step
        #[arg(long)]
        keep_going: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        authority: AuthorityArgs,
    },

    /// Bulk-load programs and step them until they halt
    Run {
        /// Run manifest listing loads and programs
        #[arg(long, conflicts_with = "program")]
        manifest: Option<PathBuf>,

        /// Program image loaded at the RAM base
        #[arg(long, required_unless_present = "manifest")]
        program: Option<PathBuf>,

        /// Extra image to load first, as <address>=<file>
        #[arg(long = "load", value_parser = commands::run::parse_load)]
        loads: Vec<(u64, PathBuf)>,

        /// Expected exit code of --program
        #[arg(long, default_value_t = 0)]
        exit_code: u64,

        /// Expected final cycle count of --program
        #[arg(long)]
        mcycle: Option<u64>,

        /// Give up on a program after this many steps
        #[arg(long)]
        max_cycles: Option<u64>,

        /// Attempts per step or bulk write before a transport failure aborts the run
        #[arg(long, default_value_t = 5)]
        retries: u32,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        authority: AuthorityArgs,
    },

    /// Load trace files without contacting an authority
    Inspect {
        /// Trace file, or a directory of trace files
        path: PathBuf,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Where the authority lives and how to talk to it.
#[derive(Args, Clone, Debug)]
pub struct AuthorityArgs {
    /// JSON-RPC endpoint of the node
    #[arg(long, default_value = "http://127.0.0.1:8545")]
    pub node: Url,

    /// Deployment manifests, one <Contract>.json per contract
    #[arg(long, default_value = "deployments/localhost")]
    pub deployments: PathBuf,

    /// Build artifacts with per-network addresses, used instead of --deployments
    #[arg(long, requires = "network_id")]
    pub artifacts: Option<PathBuf>,

    /// Network id to read from --artifacts
    #[arg(long)]
    pub network_id: Option<String>,

    /// Memory manager contract name (defaults depend on the command)
    #[arg(long)]
    pub memory_contract: Option<String>,

    /// Step contract name
    #[arg(long, default_value = "Step")]
    pub step_contract: String,

    /// Bound on each request and on waiting for a receipt
    #[arg(long, default_value_t = 60)]
    pub timeout_secs: u64,

    /// Receipt polling interval
    #[arg(long, default_value_t = 100)]
    pub poll_ms: u64,

    /// Gas limit for every transaction
    #[arg(long, default_value_t = 6_283_185)]
    pub gas: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum IsolationArg {
    /// One snapshot per trace
    Trace,
    /// One snapshot per step
    Step,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StepShapeArg {
    Auto,
    /// Step(handle)
    Handle,
    /// Step(positions, values, was_read)
    Arrays,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    logging::init(cli.log_level, cli.log_format);

    let passed = match cli.command {
        Commands::Verify {
            path,
            skip,
            isolation,
            step_shape,
            keep_going,
            json,
            authority,
        } => commands::verify::verify(
            &path,
            commands::verify::VerifyOptions {
                skip,
                isolation,
                step_shape,
                keep_going,
                json,
            },
            &authority,
        )?,
        Commands::Run {
            manifest,
            program,
            loads,
            exit_code,
            mcycle,
            max_cycles,
            retries,
            json,
            authority,
        } => commands::run::run(
            commands::run::RunOptions {
                manifest,
                program,
                loads,
                exit_code,
                mcycle,
                max_cycles,
                retries,
                json,
            },
            &authority,
        )?,
        Commands::Inspect { path, json } => commands::inspect::inspect(&path, json)?,
    };

    Ok(if passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
