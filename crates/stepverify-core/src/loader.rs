//! Loading traces from files and directories.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::format::{RawSequence, RawStep};
use crate::trace::{Step, Trace};
use crate::{Error, Result};

/// Default extension of trace files inside a directory.
pub const TRACE_EXTENSION: &str = "json";

/// Outcome of loading a single file.
///
/// A malformed file only poisons its own entry, so callers can keep going
/// with the rest of a directory.
#[derive(Debug)]
pub struct LoadedFile {
    pub path: PathBuf,
    pub traces: Result<Vec<Trace>>,
}

/// Reads trace files into [`Trace`]s.
#[derive(Debug, Clone)]
pub struct TraceLoader {
    extension: String,
}

impl TraceLoader {
    pub fn new() -> Self {
        Self {
            extension: TRACE_EXTENSION.to_string(),
        }
    }

    /// Only pick up files with this extension when scanning directories.
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Load a single file, or every matching file directly inside a
    /// directory, in directory-listing order.
    ///
    /// Fails only if `path` itself cannot be read; per-file problems are
    /// reported through [`LoadedFile::traces`].
    pub fn load(&self, path: impl AsRef<Path>) -> Result<Vec<LoadedFile>> {
        let path = path.as_ref();
        let metadata = fs::metadata(path)?;

        if !metadata.is_dir() {
            return Ok(vec![LoadedFile {
                path: path.to_path_buf(),
                traces: self.load_file(path),
            }]);
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry_path = entry?.path();
            if !entry_path.is_file() || !self.matches_extension(&entry_path) {
                continue;
            }
            tracing::debug!(path = %entry_path.display(), "loading trace file");
            let traces = self.load_file(&entry_path);
            files.push(LoadedFile {
                path: entry_path,
                traces,
            });
        }
        Ok(files)
    }

    /// Load every trace contained in one file.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Vec<Trace>> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        parse_traces(path, &contents)
    }

    fn matches_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(&self.extension))
    }
}

impl Default for TraceLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse the contents of a trace file.
///
/// Two layouts are accepted: a bare array of steps (one trace named after
/// the file), or an array of `{test, steps}` sequences (one trace each).
pub fn parse_traces(path: &Path, contents: &str) -> Result<Vec<Trace>> {
    let document: Value =
        serde_json::from_str(contents).map_err(|e| Error::parse(path, e.to_string()))?;
    let Value::Array(entries) = document else {
        return Err(Error::parse(path, "expected a JSON array at the top level"));
    };

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let is_sequence_file = entries
        .first()
        .and_then(Value::as_object)
        .is_some_and(|first| first.contains_key("test") && first.contains_key("steps"));

    if is_sequence_file {
        let sequences: Vec<RawSequence> = serde_json::from_value(Value::Array(entries))
            .map_err(|e| Error::parse(path, e.to_string()))?;
        sequences
            .into_iter()
            .map(|sequence| {
                let steps = convert_steps(path, sequence.steps)?;
                Ok(Trace::new(format!("{}#{}", file_name, sequence.test), path, steps))
            })
            .collect()
    } else {
        let raw: Vec<RawStep> = serde_json::from_value(Value::Array(entries))
            .map_err(|e| Error::parse(path, e.to_string()))?;
        let steps = convert_steps(path, raw)?;
        Ok(vec![Trace::new(file_name, path, steps)])
    }
}

fn convert_steps(path: &Path, raw: Vec<RawStep>) -> Result<Vec<Step>> {
    raw.into_iter()
        .enumerate()
        .map(|(index, step)| {
            step.into_step()
                .map_err(|message| Error::parse(path, format!("step {index}, {message}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::AccessKind;
    use hex_literal::hex;

    const ONE_STEP: &str = r#"[
        {
            "accesses": [
                {
                    "operation": "WRITE",
                    "read": "0x0000000000000000",
                    "written": "0x0101010101010101",
                    "proof": {
                        "address": 16,
                        "root_hash": "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
                        "sibling_hashes": [
                            "0x0000000000000000000000000000000000000000000000000000000000000001",
                            "0x0000000000000000000000000000000000000000000000000000000000000002"
                        ]
                    }
                }
            ],
            "brackets": ["begin step", "fetch", "execute"]
        }
    ]"#;

    #[test]
    fn parses_step_array() {
        let traces = parse_traces(Path::new("dir/one.json"), ONE_STEP).unwrap();
        assert_eq!(traces.len(), 1);

        let trace = &traces[0];
        assert_eq!(trace.name, "one.json");
        assert_eq!(trace.initial_root().unwrap().0, [0xaa; 32]);

        let access = &trace.steps[0].accesses[0];
        assert_eq!(access.kind, AccessKind::Write);
        assert_eq!(
            access.proof.siblings.leaf_to_root()[0].0,
            hex!("0000000000000000000000000000000000000000000000000000000000000001")
        );
        assert_eq!(trace.steps[0].bracket_tail(2).len(), 2);
    }

    #[test]
    fn parses_sequence_files() {
        let contents = r#"[
            {"test": "add", "period": 1, "start": 0,
             "steps": [{"accesses": [], "init_cycles": 0, "final_cycles": 1}]},
            {"test": "sub", "steps": []}
        ]"#;
        let traces = parse_traces(Path::new("seq.json"), contents).unwrap();
        let names: Vec<_> = traces.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["seq.json#add", "seq.json#sub"]);
        assert_eq!(traces[0].steps[0].cycles.unwrap().end, 1);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let err = parse_traces(Path::new("bad.json"), r#"{"accesses": []}"#).unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));

        let err = parse_traces(
            Path::new("bad.json"),
            r#"[{"accesses": [{"operation": "READ", "proof": {"address": 0}}]}]"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("step 0, access 0"));
    }

    #[test]
    fn directory_load_isolates_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.json"), ONE_STEP).unwrap();
        fs::write(dir.path().join("b.json"), ONE_STEP).unwrap();
        fs::write(dir.path().join("broken.json"), "[{").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let loaded = TraceLoader::new().load(dir.path()).unwrap();
        assert_eq!(loaded.len(), 3);

        let ok = loaded.iter().filter(|file| file.traces.is_ok()).count();
        assert_eq!(ok, 2);

        let broken = loaded
            .iter()
            .find(|file| file.path.ends_with("broken.json"))
            .unwrap();
        assert!(matches!(broken.traces, Err(Error::Parse { .. })));
    }

    #[test]
    fn missing_path_fails_the_whole_load() {
        let dir = tempfile::tempdir().unwrap();
        let result = TraceLoader::new().load(dir.path().join("nope"));
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
