//! Verify command: replay trace files against the deployed authority.

use std::path::Path;

use anyhow::{Context, Result};
use stepverify_authority::StepShape;
use stepverify_core::TraceLoader;
use stepverify_replay::{Isolation, ShapeChoice, Verifier, VerifyConfig};
use tracing::info;

use super::{connect, print_report, ConsoleObserver};
use crate::{AuthorityArgs, IsolationArg, StepShapeArg};

/// Contract that instantiates memories for trace replay.
const MEMORY_CONTRACT: &str = "MMInstantiator";

pub struct VerifyOptions {
    pub skip: usize,
    pub isolation: IsolationArg,
    pub step_shape: StepShapeArg,
    pub keep_going: bool,
    pub json: bool,
}

impl VerifyOptions {
    fn config(&self) -> VerifyConfig {
        VerifyConfig {
            isolation: match self.isolation {
                IsolationArg::Trace => Isolation::PerTrace,
                IsolationArg::Step => Isolation::PerStep,
            },
            skip: self.skip,
            shape: shape_choice(self.step_shape),
            keep_going: self.keep_going,
            ..VerifyConfig::default()
        }
    }
}

fn shape_choice(arg: StepShapeArg) -> ShapeChoice {
    match arg {
        StepShapeArg::Auto => ShapeChoice::Auto,
        StepShapeArg::Handle => ShapeChoice::Forced(StepShape::HandleAddressed),
        StepShapeArg::Arrays => ShapeChoice::Forced(StepShape::ExplicitArray),
    }
}

/// Returns whether every unit succeeded.
pub fn verify(path: &Path, options: VerifyOptions, authority: &AuthorityArgs) -> Result<bool> {
    let files = TraceLoader::new()
        .load(path)
        .with_context(|| format!("Failed to read traces from {}", path.display()))?;
    info!(path = %path.display(), files = files.len(), "loaded trace files");

    let session = connect(authority, MEMORY_CONTRACT)?;
    let observer = ConsoleObserver::new(options.json);
    let verifier = Verifier::new(&session, options.config(), &observer)?;
    if !options.json {
        println!(
            "Verifying {} file(s) with {} stepping against {}",
            files.len(),
            verifier.shape(),
            authority.node
        );
    }

    let report = verifier.verify(&files).context("Verification stopped")?;
    print_report(&report, options.json)?;
    Ok(report.passed())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_map_onto_verify_config() {
        let options = VerifyOptions {
            skip: 3,
            isolation: IsolationArg::Step,
            step_shape: StepShapeArg::Arrays,
            keep_going: true,
            json: false,
        };
        let config = options.config();
        assert_eq!(config.isolation, Isolation::PerStep);
        assert_eq!(config.skip, 3);
        assert_eq!(config.shape, ShapeChoice::Forced(StepShape::ExplicitArray));
        assert!(config.keep_going);
        assert_eq!(config.bracket_tail, 2);
    }

    #[test]
    fn auto_shape_defers_to_the_authority() {
        assert_eq!(shape_choice(StepShapeArg::Auto), ShapeChoice::Auto);
    }
}
