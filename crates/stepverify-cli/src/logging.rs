use std::fmt;
use std::io::IsTerminal;

use clap::ValueEnum;
use itertools::Itertools;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{filter::EnvFilter, util::SubscriberInitExt, FmtSubscriber};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(level)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Plaintext,
    Json,
}

/// Crates whose events the `--log-level` directive applies to.
const TARGET_CRATES: &[&str] = &[
    "stepverify_core",
    "stepverify_authority",
    "stepverify_replay",
    "stepverify",
];

/// Install the global subscriber. Logs go to stderr; stdout carries the
/// progress lines and the report.
pub fn init(log_level: LogLevel, log_format: LogFormat) {
    let builder = FmtSubscriber::builder()
        .with_target(false)
        .with_env_filter(build_filter(log_level))
        .with_writer(std::io::stderr)
        .with_ansi(enable_ansi());

    match log_format {
        LogFormat::Plaintext => builder.finish().init(),
        LogFormat::Json => builder.json().finish().init(),
    }
}

/// Colored output only when both stdout and stderr are terminals.
pub fn enable_ansi() -> bool {
    std::io::stdout().is_terminal() && std::io::stderr().is_terminal()
}

pub fn default_directive(log_level: LogLevel) -> String {
    TARGET_CRATES
        .iter()
        .map(|&c| format!("{c}={log_level}"))
        .join(",")
}

/// `RUST_LOG` wins over `--log-level` when it is set.
fn build_filter(log_level: LogLevel) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .parse_lossy(default_directive(log_level))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directive_covers_every_crate() {
        assert_eq!(
            default_directive(LogLevel::Debug),
            "stepverify_core=debug,stepverify_authority=debug,stepverify_replay=debug,stepverify=debug"
        );
    }
}
