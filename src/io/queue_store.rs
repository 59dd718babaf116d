//! Queue load/save helpers with schema + invariant validation.
//!
//! The queue file is a single JSON document per project, read-modify-written
//! wholesale on every mutating operation. There is no cross-process locking;
//! the design assumes cooperative, non-overlapping invocations per project
//! and relies on `clear_running_tasks`/reconciliation to recover from
//! violations of that assumption rather than preventing them.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde_json::Value;
use tracing::debug;

use crate::core::queue::TaskQueue;

const QUEUE_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/queue/v1.schema.json"
));

/// Load and validate the queue from disk (schema + invariants).
pub fn load_queue(path: &Path) -> Result<TaskQueue> {
    debug!(path = %path.display(), "loading queue");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read queue {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse queue {}", path.display()))?;
    validate_schema(&value)?;
    let queue: TaskQueue = serde_json::from_value(value)
        .with_context(|| format!("deserialize queue {}", path.display()))?;
    let errors = queue.validate_invariants();
    if !errors.is_empty() {
        return Err(anyhow!("queue invariants failed: {}", errors.join("; ")));
    }
    debug!(entries = queue.queue.len(), "queue loaded");
    Ok(queue)
}

/// Atomically write the queue to disk (temp file + rename).
pub fn write_queue(path: &Path, queue: &TaskQueue) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(queue)?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Create an empty, versioned queue file, only if none exists yet.
///
/// Returns true when a file was created.
pub fn initialize_queue(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    write_queue(path, &TaskQueue::default())?;
    Ok(true)
}

fn validate_schema(value: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(QUEUE_SCHEMA).context("parse embedded schema")?;
    let compiled = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    if !compiled.is_valid(value) {
        let messages = compiled
            .iter_errors(value)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(anyhow!(
            "queue schema validation failed: {}",
            messages.join("; ")
        ));
    }
    Ok(())
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("queue path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp queue {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace queue {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn now() -> DateTime<Utc> {
        "2024-01-21T10:00:00Z".parse().expect("timestamp")
    }

    /// Verifies write → load round-trip preserves the queue, including
    /// timestamps.
    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("queue.json");

        let mut queue = TaskQueue::default();
        queue.enqueue(vec![
            ("spec-1".to_string(), "a".to_string()),
            ("spec-1".to_string(), "b".to_string()),
        ]);
        queue
            .mark_running("spec-1", "a", true, now())
            .expect("mark running");

        write_queue(&path, &queue).expect("write");
        let loaded = load_queue(&path).expect("load");
        assert_eq!(loaded, queue);
    }

    #[test]
    fn initialize_is_idempotent_only_when_absent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("queue.json");

        assert!(initialize_queue(&path).expect("first init"));
        let queue = load_queue(&path).expect("load");
        assert!(queue.queue.is_empty());

        // Existing file is left alone.
        let mut populated = TaskQueue::default();
        populated.enqueue(vec![("spec-1".to_string(), "a".to_string())]);
        write_queue(&path, &populated).expect("write");
        assert!(!initialize_queue(&path).expect("second init"));
        assert_eq!(load_queue(&path).expect("reload"), populated);
    }

    #[test]
    fn load_rejects_schema_violations() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("queue.json");
        fs::write(
            &path,
            r#"{"version": 1, "queue": [{"specId": "s", "taskId": "t", "status": "sleeping"}]}"#,
        )
        .expect("write");

        let err = load_queue(&path).unwrap_err();
        assert!(err.to_string().contains("schema validation failed"));
    }

    #[test]
    fn load_rejects_invariant_violations() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("queue.json");
        fs::write(
            &path,
            r#"{"version": 1, "queue": [
                {"specId": "s", "taskId": "t", "status": "running", "startedAt": "2024-01-21T10:00:00Z"},
                {"specId": "s", "taskId": "u", "status": "running", "startedAt": "2024-01-21T10:00:00Z"}
            ]}"#,
        )
        .expect("write");

        let err = load_queue(&path).unwrap_err();
        assert!(err.to_string().contains("invariants failed"));
    }
}
