//! Run command: bulk-load programs and step them until they halt.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use stepverify_core::manifest::{LoadEntry, RunManifest};
use stepverify_replay::{ContinuousRunner, Program, RetryPolicy, RunConfig};

use super::{connect, print_run_report, ConsoleObserver};
use crate::AuthorityArgs;

/// Contract that instantiates memories writable word by word.
const MEMORY_CONTRACT: &str = "TestRamMMInstantiator";

pub struct RunOptions {
    pub manifest: Option<PathBuf>,
    pub program: Option<PathBuf>,
    pub loads: Vec<(u64, PathBuf)>,
    pub exit_code: u64,
    pub mcycle: Option<u64>,
    pub max_cycles: Option<u64>,
    pub retries: u32,
    pub json: bool,
}

impl RunOptions {
    fn programs(&self) -> Result<Vec<Program>> {
        if let Some(path) = &self.manifest {
            let manifest = RunManifest::from_file(path)
                .with_context(|| format!("Failed to read run manifest {}", path.display()))?;
            if manifest.tests.is_empty() {
                bail!("Run manifest {} lists no tests", path.display());
            }
            return Ok(Program::from_manifest(&manifest));
        }

        let Some(image) = &self.program else {
            bail!("Either --manifest or --program is required");
        };
        let mut program = Program::new(image);
        program.loads = self
            .loads
            .iter()
            .map(|(position, file)| LoadEntry {
                file: file.clone(),
                position: *position,
            })
            .collect();
        program.expected_exit_code = self.exit_code;
        program.expected_mcycle = self.mcycle;
        Ok(vec![program])
    }

    fn config(&self) -> RunConfig {
        RunConfig {
            max_cycles: self.max_cycles,
            retry: RetryPolicy {
                max_attempts: self.retries,
                ..RetryPolicy::default()
            },
        }
    }
}

/// Parse `<address>=<file>`; the address is decimal or `0x` hex.
pub fn parse_load(value: &str) -> Result<(u64, PathBuf), String> {
    let (address, file) = value
        .split_once('=')
        .ok_or_else(|| format!("expected <address>=<file>, got `{value}`"))?;
    let address = address.trim();
    let position = match address.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => address.parse(),
    }
    .map_err(|e| format!("invalid load address `{address}`: {e}"))?;
    if file.is_empty() {
        return Err(format!("missing file in `{value}`"));
    }
    Ok((position, PathBuf::from(file)))
}

/// Returns whether every program halted as expected.
pub fn run(options: RunOptions, authority: &AuthorityArgs) -> Result<bool> {
    let programs = options.programs()?;
    let session = connect(authority, MEMORY_CONTRACT)?;
    let observer = ConsoleObserver::new(options.json);
    let runner = ContinuousRunner::new(&session, options.config(), &observer)?;

    let report = runner.run_all(&programs).context("Run stopped")?;
    print_run_report(&report, options.json)?;
    Ok(report.passed())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> RunOptions {
        RunOptions {
            manifest: None,
            program: Some("prog.bin".into()),
            loads: vec![(0x1000, "rom.bin".into())],
            exit_code: 3,
            mcycle: Some(120),
            max_cycles: Some(1_000),
            retries: 2,
            json: false,
        }
    }

    #[test]
    fn parses_hex_and_decimal_loads() {
        assert_eq!(
            parse_load("0x1000=rom.bin").unwrap(),
            (0x1000, PathBuf::from("rom.bin"))
        );
        assert_eq!(parse_load("0=shadow.bin").unwrap(), (0, PathBuf::from("shadow.bin")));
        assert!(parse_load("rom.bin").is_err());
        assert!(parse_load("0xzz=rom.bin").is_err());
        assert!(parse_load("0x10=").is_err());
    }

    #[test]
    fn single_program_carries_flags() {
        let programs = options().programs().unwrap();
        assert_eq!(programs.len(), 1);
        let program = &programs[0];
        assert_eq!(program.name, "prog.bin");
        assert_eq!(program.expected_exit_code, 3);
        assert_eq!(program.expected_mcycle, Some(120));
        assert_eq!(
            program.loads,
            vec![LoadEntry {
                file: "rom.bin".into(),
                position: 0x1000
            }]
        );

        let config = options().config();
        assert_eq!(config.max_cycles, Some(1_000));
        assert_eq!(config.retry.max_attempts, 2);
    }

    #[test]
    fn manifest_paths_resolve_next_to_the_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        std::fs::write(
            &path,
            r#"{"loads": [{"file": "shadow.bin", "position": 0}],
                "tests": [{"file": "add.bin", "exit_code": 0}, {"file": "sub.bin", "mcycle": 9}]}"#,
        )
        .unwrap();

        let options = RunOptions {
            manifest: Some(path),
            program: None,
            ..options()
        };
        let programs = options.programs().unwrap();
        assert_eq!(programs.len(), 2);
        assert_eq!(programs[0].image, dir.path().join("add.bin"));
        assert_eq!(programs[1].expected_mcycle, Some(9));
        assert_eq!(programs[1].loads[0].file, dir.path().join("shadow.bin"));
    }
}
