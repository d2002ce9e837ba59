use crate::errors::RecorderError;
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const DEFAULT_DISK_BUDGET_BYTES: u64 = 50 * 1024 * 1024;
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 4096;

/// Appends one JSON event per line to `path`.
#[derive(Debug, Clone)]
pub struct JsonlLogger {
    pub path: PathBuf,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEvent<'a> {
    pub level: &'a str,
    pub event_type: &'a str,
    pub payload: Value,
}

impl JsonlLogger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            budget_bytes: DEFAULT_DISK_BUDGET_BYTES,
        }
    }

    pub fn append(&self, event: &LogEvent<'_>) -> Result<(), RecorderError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| RecorderError::Io(e.to_string()))?;
        }
        let truncated = truncate_json(event.payload.clone(), self.max_payload_bytes);
        let line = serde_json::to_string(&LogEvent {
            level: event.level,
            event_type: event.event_type,
            payload: truncated,
        })
        .map_err(|e| RecorderError::Io(e.to_string()))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| RecorderError::Io(e.to_string()))?;
        file.write_all(line.as_bytes())
            .map_err(|e| RecorderError::Io(e.to_string()))?;
        file.write_all(b"\n")
            .map_err(|e| RecorderError::Io(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            prune_old_logs(parent, &self.path, self.budget_bytes)?;
        }

        Ok(())
    }
}

/// Appends `event_type` when a logger is configured. Failures are dropped so
/// that logging never changes the outcome of the operation being logged.
pub fn log_event(logger: Option<&JsonlLogger>, level: &str, event_type: &str, payload: Value) {
    if let Some(logger) = logger {
        let _ = logger.append(&LogEvent {
            level,
            event_type,
            payload,
        });
    }
}

fn truncate_json(value: Value, max_bytes: usize) -> Value {
    let rendered = serde_json::to_string(&value).unwrap_or_default();
    if rendered.len() <= max_bytes {
        return value;
    }
    let mut cut = max_bytes.saturating_sub(3);
    while cut > 0 && !rendered.is_char_boundary(cut) {
        cut -= 1;
    }
    Value::String(format!("{}...", &rendered[..cut]))
}

/// Deletes the oldest `.jsonl` files next to `active` until the directory's
/// log total fits in `budget_bytes`. The active file is never removed.
fn prune_old_logs(
    dir: &Path,
    active: &Path,
    budget_bytes: u64,
) -> Result<Vec<PathBuf>, RecorderError> {
    let mut logs = fs::read_dir(dir)
        .map_err(|e| RecorderError::Io(e.to_string()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| path.extension().is_some_and(|ext| ext == "jsonl"))
        .collect::<Vec<_>>();

    logs.sort_by_key(|path| fs::metadata(path).ok().and_then(|m| m.modified().ok()));

    let mut total = logs
        .iter()
        .filter_map(|path| fs::metadata(path).ok().map(|meta| meta.len()))
        .sum::<u64>();

    let mut deleted = Vec::new();
    for path in logs {
        if total <= budget_bytes {
            break;
        }
        if path == active {
            continue;
        }
        let len = fs::metadata(&path)
            .map_err(|e| RecorderError::Io(e.to_string()))?
            .len();
        fs::remove_file(&path).map_err(|e| RecorderError::Io(e.to_string()))?;
        total = total.saturating_sub(len);
        deleted.push(path);
    }

    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::{log_event, prune_old_logs, truncate_json, JsonlLogger, LogEvent};
    use serde_json::json;
    use std::fs;

    #[test]
    fn logger_truncates_large_payloads_and_writes_jsonl() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run.jsonl");
        let mut logger = JsonlLogger::new(&path);
        logger.max_payload_bytes = 20;
        logger.budget_bytes = 1024;

        logger
            .append(&LogEvent {
                level: "info",
                event_type: "session_saved",
                payload: json!({"path": "abcdefghijklmnopqrstuvwxyz"}),
            })
            .expect("append");

        let text = fs::read_to_string(&path).expect("read");
        assert!(text.contains("\"event_type\":\"session_saved\""));
        assert!(text.contains("..."));
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn prune_removes_oldest_logs_but_not_active_or_other_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("old.jsonl"), vec![b'x'; 40]).expect("old");
        fs::write(dir.path().join("session.json"), vec![b'x'; 400]).expect("session");
        std::thread::sleep(std::time::Duration::from_millis(5));
        let active = dir.path().join("active.jsonl");
        fs::write(&active, vec![b'x'; 40]).expect("active");

        let deleted = prune_old_logs(dir.path(), &active, 50).expect("pruned");

        assert_eq!(deleted.len(), 1);
        assert!(deleted[0].ends_with("old.jsonl"));
        assert!(active.exists());
        assert!(dir.path().join("session.json").exists());
    }

    #[test]
    fn truncation_never_splits_a_multibyte_character() {
        let truncated = truncate_json(json!({"k": "ééééé"}), 12);
        assert_eq!(truncated, json!("{\"k\":\"éé..."));
    }

    #[test]
    fn oversized_active_log_is_kept() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("httprecorder.jsonl");
        let mut logger = JsonlLogger::new(&path);
        logger.budget_bytes = 1;

        log_event(Some(&logger), "info", "session_loaded", json!({"records": 3}));
        log_event(Some(&logger), "info", "records_drained", json!({"records": 3}));

        let text = fs::read_to_string(&path).expect("read");
        assert_eq!(text.lines().count(), 2);
    }
}
