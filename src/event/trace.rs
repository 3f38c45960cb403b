//! NDJSON Trace Writer
//!
//! Writes run events to newline-delimited JSON files for audit and replay.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{CadenceError, Result};
use crate::event::{Event, EventLog};
use crate::util::TRACE_DIR;

/// NDJSON trace writer, one file per run
pub struct TraceWriter {
    writer: Arc<Mutex<BufWriter<File>>>,
    path: PathBuf,
}

impl TraceWriter {
    /// Create `.cadence/traces/<run_id>.ndjson` under the working directory
    pub fn new(run_id: &str) -> Result<Self> {
        Self::in_dir(TRACE_DIR, run_id)
    }

    /// Create `<dir>/<run_id>.ndjson`
    ///
    /// # Security
    ///
    /// The run id becomes a file name: only ASCII alphanumerics, `-` and `_`
    /// are accepted, which rules out path traversal.
    pub fn in_dir(dir: impl AsRef<Path>, run_id: &str) -> Result<Self> {
        validate_run_id(run_id)?;

        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let path = dir.join(format!("{}.ndjson", run_id));
        let file = File::create(&path)?;

        tracing::info!(path = %path.display(), "Created trace file");

        Ok(Self {
            writer: Arc::new(Mutex::new(BufWriter::new(file))),
            path,
        })
    }

    pub fn write_event(&self, event: &Event) -> Result<()> {
        let json = serde_json::to_string(event)?;

        let mut writer = self.writer.lock();
        writeln!(writer, "{}", json)?;
        writer.flush()?;

        Ok(())
    }

    /// Write every event of a log, in order
    pub fn write_all(&self, event_log: &EventLog) -> Result<()> {
        for event in event_log.events() {
            self.write_event(&event)?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn close(&self) -> Result<()> {
        self.writer.lock().flush()?;
        Ok(())
    }
}

fn validate_run_id(run_id: &str) -> Result<()> {
    if run_id.is_empty()
        || !run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(CadenceError::InvalidArgument {
            reason: format!(
                "invalid run id for trace file: must be alphanumeric with hyphens/underscores only, got: {}",
                run_id
            ),
        });
    }
    Ok(())
}

/// Read back the events of one run's trace
pub fn read_trace(dir: impl AsRef<Path>, run_id: &str) -> Result<Vec<Event>> {
    validate_run_id(run_id)?;
    let path = dir.as_ref().join(format!("{}.ndjson", run_id));
    if !path.exists() {
        return Err(CadenceError::RunNotFound {
            run_id: run_id.to_string(),
        });
    }

    let reader = BufReader::new(File::open(&path)?);
    let mut events = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        events.push(serde_json::from_str(&line)?);
    }
    Ok(events)
}

/// List the trace files in `dir`, newest first
pub fn list_traces(dir: impl AsRef<Path>) -> Result<Vec<TraceInfo>> {
    let trace_dir = dir.as_ref();

    if !trace_dir.exists() {
        return Ok(vec![]);
    }

    let mut traces = Vec::new();

    for entry in fs::read_dir(trace_dir)? {
        let entry = entry?;
        let path = entry.path();

        if path.extension().map(|e| e == "ndjson").unwrap_or(false) {
            let metadata = entry.metadata()?;
            let run_id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("unknown")
                .to_string();

            traces.push(TraceInfo {
                run_id,
                path,
                size_bytes: metadata.len(),
                modified: metadata.modified().ok(),
            });
        }
    }

    traces.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.run_id.cmp(&b.run_id)));

    Ok(traces)
}

/// Information about a trace file
#[derive(Debug)]
pub struct TraceInfo {
    pub run_id: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: Option<std::time::SystemTime>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use tempfile::TempDir;

    #[test]
    fn test_trace_writer_round_trips_log() {
        let temp_dir = TempDir::new().unwrap();
        let log = EventLog::new();
        log.emit(EventKind::NodeSkipped {
            node: "render".into(),
            condition: "flags.render".into(),
        });
        log.emit(EventKind::RunCompleted {
            run_id: "run-1".into(),
            total_duration_ms: 5,
            fix_iterations: 0,
        });

        let writer = TraceWriter::in_dir(temp_dir.path(), "run-1").unwrap();
        writer.write_all(&log).unwrap();
        writer.close().unwrap();

        let content = fs::read_to_string(writer.path()).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.contains("node_skipped"));

        let events = read_trace(temp_dir.path(), "run-1").unwrap();
        assert_eq!(events.len(), 2);
        assert!(events[1].kind.is_run_event());
    }

    #[test]
    fn test_list_traces_missing_dir_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let traces = list_traces(temp_dir.path().join("nope")).unwrap();
        assert!(traces.is_empty());
    }

    #[test]
    fn test_list_traces_finds_ndjson_only() {
        let temp_dir = TempDir::new().unwrap();
        TraceWriter::in_dir(temp_dir.path(), "a").unwrap();
        TraceWriter::in_dir(temp_dir.path(), "b").unwrap();
        fs::write(temp_dir.path().join("notes.txt"), "x").unwrap();

        let mut ids: Vec<String> = list_traces(temp_dir.path())
            .unwrap()
            .into_iter()
            .map(|t| t.run_id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_read_trace_unknown_run() {
        let temp_dir = TempDir::new().unwrap();
        let err = read_trace(temp_dir.path(), "ghost").unwrap_err();
        assert!(matches!(err, CadenceError::RunNotFound { .. }));
    }

    #[test]
    fn test_trace_writer_rejects_path_traversal() {
        let temp_dir = TempDir::new().unwrap();
        for bad in ["../evil", "foo/bar", "foo\\bar", "", "a.b"] {
            assert!(TraceWriter::in_dir(temp_dir.path(), bad).is_err(), "{}", bad);
        }
    }
}
