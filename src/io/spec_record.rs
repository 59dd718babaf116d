//! Read-only access to per-spec completion records.
//!
//! Each specification keeps an ordered task list at
//! `specs/<spec_id>/tasks.json`; `passes` is the authoritative per-task
//! completion flag. The conductor reads this record, never writes it.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// One task as declared by its specification.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SpecTask {
    pub id: String,
    #[serde(default)]
    pub passes: bool,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// A specification's authoritative completion record.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SpecRecord {
    pub tasks: Vec<SpecTask>,
}

impl SpecRecord {
    /// Ids of tasks the spec marks as passing.
    pub fn passing_task_ids(&self) -> HashSet<String> {
        self.tasks
            .iter()
            .filter(|task| task.passes)
            .map(|task| task.id.clone())
            .collect()
    }

    pub fn task(&self, task_id: &str) -> Option<&SpecTask> {
        self.tasks.iter().find(|task| task.id == task_id)
    }
}

/// Load a spec's completion record from disk.
pub fn load_spec_record(path: &Path) -> Result<SpecRecord> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read spec record {}", path.display()))?;
    let record: SpecRecord = serde_json::from_str(&contents)
        .with_context(|| format!("parse spec record {}", path.display()))?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_record_and_extracts_passing_ids() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tasks.json");
        fs::write(
            &path,
            r#"{"tasks": [
                {"id": "a", "passes": true, "title": "First"},
                {"id": "b", "passes": false},
                {"id": "c"}
            ]}"#,
        )
        .expect("write");

        let record = load_spec_record(&path).expect("load");
        assert_eq!(record.tasks.len(), 3);
        assert_eq!(record.passing_task_ids(), HashSet::from(["a".to_string()]));
        assert_eq!(record.task("a").and_then(|t| t.title.as_deref()), Some("First"));
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tasks.json");
        fs::write(
            &path,
            r#"{"tasks": [{"id": "a", "passes": true, "estimate": 3}], "version": 2}"#,
        )
        .expect("write");
        let record = load_spec_record(&path).expect("load");
        assert!(record.tasks[0].passes);
    }

    #[test]
    fn missing_record_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = load_spec_record(&temp.path().join("missing.json")).unwrap_err();
        assert!(err.to_string().contains("read spec record"));
    }
}
