//! Inspect command: summarize trace files without contacting an authority.

use std::path::Path;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use stepverify_core::{LoadedFile, Trace, TraceLoader};

fn root_hex(trace: &Trace) -> Option<String> {
    trace
        .initial_root()
        .map(|root| format!("0x{}", hex::encode(root)))
}

fn trace_line(trace: &Trace) -> String {
    let writes = trace
        .steps
        .iter()
        .flat_map(|step| &step.accesses)
        .filter(|access| !access.kind.is_read())
        .count();
    format!(
        "{}: {} steps, {} accesses ({} writes), initial root {}",
        trace.name,
        trace.steps.len(),
        trace.access_count(),
        writes,
        root_hex(trace).unwrap_or_else(|| "-".to_string())
    )
}

fn trace_json(trace: &Trace) -> Value {
    json!({
        "name": trace.name,
        "steps": trace.steps.len(),
        "accesses": trace.access_count(),
        "initial_root": root_hex(trace),
    })
}

fn to_json(files: &[LoadedFile]) -> Value {
    let files: Vec<Value> = files
        .iter()
        .map(|file| match &file.traces {
            Ok(traces) => {
                let traces: Vec<Value> = traces.iter().map(trace_json).collect();
                json!({ "path": file.path, "traces": traces })
            }
            Err(e) => json!({
                "path": file.path,
                "error": e.to_string(),
            }),
        })
        .collect();
    json!({ "files": files })
}

/// Returns whether every file parsed.
pub fn inspect(path: &Path, json: bool) -> Result<bool> {
    let files = TraceLoader::new()
        .load(path)
        .with_context(|| format!("Failed to read traces from {}", path.display()))?;

    if json {
        let rendered =
            serde_json::to_string_pretty(&to_json(&files)).context("Failed to render summary")?;
        println!("{rendered}");
    } else {
        for file in &files {
            match &file.traces {
                Ok(traces) => traces.iter().for_each(|trace| println!("{}", trace_line(trace))),
                Err(e) => println!("{}: unparsable: {e}", file.path.display()),
            }
        }
    }
    Ok(files.iter().all(|file| file.traces.is_ok()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRACE: &str = r#"[
        {"accesses": [
            {"operation": "READ", "read": "0x0000000000000000",
             "proof": {"address": 8, "root_hash": "0x1111111111111111111111111111111111111111111111111111111111111111", "sibling_hashes": []}},
            {"operation": "WRITE", "read": "0x0000000000000000", "written": "0x0000000000000001",
             "proof": {"address": 8, "sibling_hashes": []}}
        ]}
    ]"#;

    #[test]
    fn summarizes_traces_and_failures() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.json"), TRACE).unwrap();
        std::fs::write(dir.path().join("b.json"), "{").unwrap();

        let mut files = TraceLoader::new().load(dir.path()).unwrap();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        let trace = &files[0].traces.as_ref().unwrap()[0];
        assert_eq!(
            trace_line(trace),
            "a.json: 1 steps, 2 accesses (1 writes), initial root 0x1111111111111111111111111111111111111111111111111111111111111111"
        );

        let summary = to_json(&files);
        assert_eq!(summary["files"][0]["traces"][0]["accesses"], 2);
        assert!(summary["files"][1]["error"].is_string());
    }
}
