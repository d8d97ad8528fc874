//! Append-only JSONL trace sink.
//!
//! One line per lifecycle event:
//!
//! ```text
//! {"ts":"2026-01-02T03:04:05.678Z","ev":"step-ok","id":"s1","ms":12,"attempts":1}
//! {"ts":"2026-01-02T03:04:05.690Z","ev":"step-fail","id":"s2","ms":0,"attempts":0,"reason":"budget-exceeded"}
//! ```
//!
//! Write failures are logged and otherwise ignored; tracing never affects a run.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use plotrun_types::event::RunEvent;
use serde_json::{Map, Value, json};

/// Writes trace lines to one file.
#[derive(Debug)]
pub struct TraceWriter {
    path: PathBuf,
    file: Mutex<File>,
}

impl TraceWriter {
    /// Create `trace-<timestamp>.jsonl` inside `dir`, creating the directory.
    pub fn create_in(dir: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let stamp = Utc::now()
            .to_rfc3339_opts(SecondsFormat::Millis, true)
            .replace([':', '.'], "-");
        Self::open(dir.join(format!("trace-{stamp}.jsonl")))
    }

    /// Open (or create) `path` in append mode.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_event(&self, event: &RunEvent) {
        let mut line = trace_line(event);
        line.insert(
            "ts".to_string(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        let text = Value::Object(line).to_string();

        let mut file = self.file.lock().expect("trace file lock poisoned");
        if let Err(e) = writeln!(file, "{text}") {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to append trace line");
        }
    }
}

/// The trace fields for `event`, without the timestamp.
pub fn trace_line(event: &RunEvent) -> Map<String, Value> {
    let mut line = Map::new();
    line.insert("ev".to_string(), json!(event.name()));
    line.insert("id".to_string(), json!(event.step_id()));

    match event {
        RunEvent::StepStart { .. } | RunEvent::Fork { .. } => {}
        RunEvent::StepOk {
            duration_ms,
            attempts,
            ..
        } => {
            line.insert("ms".to_string(), json!(duration_ms));
            line.insert("attempts".to_string(), json!(attempts));
        }
        RunEvent::StepFail {
            duration_ms,
            attempts,
            reason,
            ..
        } => {
            line.insert("ms".to_string(), json!(duration_ms));
            line.insert("attempts".to_string(), json!(attempts));
            line.insert("reason".to_string(), json!(reason.to_string()));
        }
        RunEvent::Retry {
            attempt,
            cause,
            delay_ms,
            ..
        } => {
            line.insert("ms".to_string(), json!(delay_ms));
            line.insert("attempts".to_string(), json!(attempt));
            line.insert("reason".to_string(), json!(cause));
        }
        RunEvent::Done { total_ms } => {
            line.insert("ms".to_string(), json!(total_ms));
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use plotrun_types::record::FailureReason;
    use tempfile::TempDir;

    #[test]
    fn line_fields_per_event() {
        let ok = trace_line(&RunEvent::StepOk {
            id: "s1".to_string(),
            step_type: "transform".to_string(),
            duration_ms: 12,
            attempts: 1,
        });
        assert_eq!(Value::Object(ok), json!({ "ev": "step-ok", "id": "s1", "ms": 12, "attempts": 1 }));

        let fail = trace_line(&RunEvent::StepFail {
            id: "s2".to_string(),
            step_type: "transform".to_string(),
            duration_ms: 0,
            attempts: 0,
            reason: FailureReason::BudgetExceeded,
            error: None,
        });
        assert_eq!(fail["reason"], json!("budget-exceeded"));

        let done = trace_line(&RunEvent::Done { total_ms: 40 });
        assert_eq!(Value::Object(done), json!({ "ev": "done", "id": null, "ms": 40 }));
    }

    #[test]
    fn appends_one_line_per_event() {
        let tmp = TempDir::new().unwrap();
        let writer = TraceWriter::create_in(&tmp.path().join("traces")).unwrap();
        writer.write_event(&RunEvent::StepStart {
            id: "a".to_string(),
            step_type: "gate".to_string(),
        });
        writer.write_event(&RunEvent::Done { total_ms: 1 });

        let content = std::fs::read_to_string(writer.path()).unwrap();
        let lines: Vec<Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["ev"], "step-start");
        assert_eq!(lines[0]["id"], "a");
        assert!(lines[0]["ts"].is_string());
        assert_eq!(lines[1]["ev"], "done");

        let name = writer.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("trace-") && name.ends_with(".jsonl"));
    }

    #[test]
    fn reopen_appends() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("t.jsonl");
        TraceWriter::open(&path)
            .unwrap()
            .write_event(&RunEvent::Done { total_ms: 1 });
        TraceWriter::open(&path)
            .unwrap()
            .write_event(&RunEvent::Done { total_ms: 2 });
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 2);
    }
}
