//! Reconcile the persisted queue against spec completion records.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use crate::core::queue::TaskStatus;
use crate::core::reconcile::{ReconcileReport, reconcile_queue};
use crate::io::init::ProjectPaths;
use crate::io::queue_store::{load_queue, write_queue};
use crate::io::spec_record::load_spec_record;

/// Load the queue, repair drift, and persist only when something changed.
///
/// Spec records that cannot be read produce an advisory issue and leave
/// their entries alone, except for stall demotion which needs no record.
#[instrument(skip_all, fields(root = %paths.root.display()))]
pub fn reconcile_project(
    paths: &ProjectPaths,
    now: DateTime<Utc>,
    stall_threshold: Duration,
) -> Result<ReconcileReport> {
    let mut queue = load_queue(&paths.queue_path)?;

    let spec_ids: HashSet<String> = queue
        .queue
        .iter()
        .filter(|entry| entry.status != TaskStatus::Completed)
        .map(|entry| entry.spec_id.clone())
        .collect();

    let mut passing: HashMap<String, HashSet<String>> = HashMap::new();
    let mut advisories = Vec::new();
    for spec_id in spec_ids {
        let record_path = paths.spec_record_path(&spec_id);
        match load_spec_record(&record_path) {
            Ok(record) => {
                passing.insert(spec_id, record.passing_task_ids());
            }
            Err(err) => {
                warn!(spec_id = %spec_id, err = %err, "spec record unreadable");
                advisories.push(format!(
                    "spec record for '{spec_id}' could not be read: {err}"
                ));
            }
        }
    }

    let mut report = reconcile_queue(&mut queue, &passing, now, stall_threshold);
    if report.fixed_count > 0 {
        write_queue(&paths.queue_path, &queue)?;
        info!(fixed = report.fixed_count, "queue repaired");
    }
    report.issues.extend(advisories);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use crate::core::queue::TaskQueue;
    use crate::io::init::{InitOptions, init_project};

    fn now() -> DateTime<Utc> {
        "2024-01-21T10:00:00Z".parse().expect("timestamp")
    }

    const STALL: Duration = Duration::from_secs(2 * 60 * 60);

    fn write_record(paths: &ProjectPaths, spec_id: &str, contents: &str) {
        let path = paths.spec_record_path(spec_id);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, contents).expect("write record");
    }

    #[test]
    fn repairs_completed_but_running_and_persists() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_project(temp.path(), &InitOptions { force: false }).expect("init");

        let mut queue = TaskQueue::default();
        queue.enqueue(vec![("spec-1".to_string(), "a".to_string())]);
        queue
            .mark_running("spec-1", "a", true, now())
            .expect("mark running");
        write_queue(&paths.queue_path, &queue).expect("write queue");
        write_record(
            &paths,
            "spec-1",
            r#"{"tasks": [{"id": "a", "passes": true}]}"#,
        );

        let report = reconcile_project(&paths, now(), STALL).expect("reconcile");
        assert_eq!(report.fixed_count, 1);

        let reloaded = load_queue(&paths.queue_path).expect("reload");
        assert_eq!(
            reloaded.find("spec-1", "a").expect("entry").status,
            TaskStatus::Completed
        );
    }

    #[test]
    fn unreadable_record_is_advisory_only() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_project(temp.path(), &InitOptions { force: false }).expect("init");

        let mut queue = TaskQueue::default();
        queue.enqueue(vec![("spec-1".to_string(), "a".to_string())]);
        write_queue(&paths.queue_path, &queue).expect("write queue");

        let report = reconcile_project(&paths, now(), STALL).expect("reconcile");
        assert_eq!(report.fixed_count, 0);
        assert_eq!(report.issues.len(), 1);
        assert!(report.issues[0].contains("spec-1"));

        let reloaded = load_queue(&paths.queue_path).expect("reload");
        assert_eq!(
            reloaded.find("spec-1", "a").expect("entry").status,
            TaskStatus::Queued
        );
    }

    #[test]
    fn clean_queue_is_untouched_on_disk() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_project(temp.path(), &InitOptions { force: false }).expect("init");

        let mut queue = TaskQueue::default();
        queue.enqueue(vec![("spec-1".to_string(), "a".to_string())]);
        write_queue(&paths.queue_path, &queue).expect("write queue");
        write_record(&paths, "spec-1", r#"{"tasks": [{"id": "a"}]}"#);
        let before = fs::metadata(&paths.queue_path).expect("meta").modified();

        let report = reconcile_project(&paths, now(), STALL).expect("reconcile");
        assert_eq!(report.fixed_count, 0);
        assert!(report.issues.is_empty());
        let after = fs::metadata(&paths.queue_path).expect("meta").modified();
        assert_eq!(before.ok(), after.ok());
    }
}
