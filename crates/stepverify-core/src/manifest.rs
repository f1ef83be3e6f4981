//! Run manifest: what to bulk-load and which programs to run to completion.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Physical address the machine starts executing programs from.
pub const RAM_START: u64 = 0x8000_0000;

/// A file to copy into memory before a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadEntry {
    pub file: PathBuf,
    pub position: u64,
}

/// A program to run until it halts, with optional expectations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTest {
    pub file: PathBuf,
    /// Expected final cycle counter.
    #[serde(default)]
    pub mcycle: Option<u64>,
    #[serde(default)]
    pub exit_code: Option<u64>,
}

/// Description of a continuous-run session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunManifest {
    /// Images loaded before every test, in order.
    #[serde(default)]
    pub loads: Vec<LoadEntry>,
    pub tests: Vec<RunTest>,
}

impl RunManifest {
    /// Read a manifest and resolve relative file paths against its directory.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let mut manifest: RunManifest = serde_json::from_str(&contents).map_err(|e| {
            Error::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            }
        })?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        manifest.resolve_paths(base);
        Ok(manifest)
    }

    fn resolve_paths(&mut self, base: &Path) {
        for load in &mut self.loads {
            if load.file.is_relative() {
                load.file = base.join(&load.file);
            }
        }
        for test in &mut self.tests {
            if test.file.is_relative() {
                test.file = base.join(&test.file);
            }
        }
    }
}
