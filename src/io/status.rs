//! Per-project status file and one-shot shutdown cleanup.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::io::init::ProjectPaths;
use crate::io::queue_store::{load_queue, write_queue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectState {
    Idle,
    Running,
}

/// Persisted status for the project (`.conductor/state/status.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectStatus {
    pub state: ProjectState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ProjectStatus {
    pub fn idle() -> Self {
        Self {
            state: ProjectState::Idle,
            spec_id: None,
            task_id: None,
            updated_at: Utc::now(),
        }
    }

    pub fn running(spec_id: &str, task_id: &str) -> Self {
        Self {
            state: ProjectState::Running,
            spec_id: Some(spec_id.to_string()),
            task_id: Some(task_id.to_string()),
            updated_at: Utc::now(),
        }
    }
}

/// Load status from disk. A missing file reads as idle.
pub fn load_status(path: &Path) -> Result<ProjectStatus> {
    if !path.exists() {
        return Ok(ProjectStatus::idle());
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read status {}", path.display()))?;
    let status: ProjectStatus = serde_json::from_str(&contents)
        .with_context(|| format!("parse status {}", path.display()))?;
    Ok(status)
}

/// Atomically write status to disk (temp file + rename).
pub fn write_status(path: &Path, status: &ProjectStatus) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(status)?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("status path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, &buf)
        .with_context(|| format!("write temp status {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace status {}", path.display()))?;
    Ok(())
}

/// One-shot cleanup that releases the single-running-task slot.
///
/// Runs at most once no matter how many times it is triggered (interrupt
/// handler, drop at loop exit, both). Before exiting it persists an idle
/// status and demotes any running entry so the next invocation never sees a
/// stuck `running` task. Errors during cleanup are logged, not propagated:
/// there is nowhere left to propagate them to.
#[derive(Debug)]
pub struct CleanupGuard {
    root: PathBuf,
    done: AtomicBool,
}

impl CleanupGuard {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            done: AtomicBool::new(false),
        }
    }

    /// Execute the cleanup if it has not run yet.
    pub fn run(&self) {
        if self.done.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(root = %self.root.display(), "releasing run slot");
        let paths = ProjectPaths::new(&self.root);
        match load_queue(&paths.queue_path) {
            Ok(mut queue) => {
                let cleared = queue.clear_running_tasks();
                if cleared > 0 {
                    if let Err(err) = write_queue(&paths.queue_path, &queue) {
                        warn!(err = %err, "cleanup could not write queue");
                    }
                }
            }
            Err(err) => warn!(err = %err, "cleanup could not load queue"),
        }
        if let Err(err) = write_status(&paths.status_path, &ProjectStatus::idle()) {
            warn!(err = %err, "cleanup could not write status");
        }
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        self.run();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::queue::{TaskQueue, TaskStatus};
    use crate::io::init::{InitOptions, init_project};

    #[test]
    fn status_round_trips_and_defaults_to_idle() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("status.json");

        let missing = load_status(&path).expect("load missing");
        assert_eq!(missing.state, ProjectState::Idle);

        let status = ProjectStatus::running("spec-1", "a");
        write_status(&path, &status).expect("write");
        let loaded = load_status(&path).expect("load");
        assert_eq!(loaded, status);
    }

    /// Cleanup demotes the running entry, writes idle, and is a no-op the
    /// second time even when triggered from both a call and the drop.
    #[test]
    fn cleanup_runs_at_most_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_project(temp.path(), &InitOptions { force: false }).expect("init");

        let mut queue = TaskQueue::default();
        queue.enqueue(vec![("spec-1".to_string(), "a".to_string())]);
        queue
            .mark_running("spec-1", "a", true, Utc::now())
            .expect("mark running");
        write_queue(&paths.queue_path, &queue).expect("write queue");
        write_status(&paths.status_path, &ProjectStatus::running("spec-1", "a"))
            .expect("write status");

        {
            let guard = CleanupGuard::new(temp.path());
            guard.run();

            // Re-running must not disturb state mutated in between.
            let mut queue = load_queue(&paths.queue_path).expect("reload");
            queue
                .mark_running("spec-1", "a", true, Utc::now())
                .expect("mark running again");
            write_queue(&paths.queue_path, &queue).expect("write again");
            // Drop fires here but the guard already ran.
        }

        let queue = load_queue(&paths.queue_path).expect("final load");
        assert_eq!(queue.count(TaskStatus::Running), 1);
        let status = load_status(&paths.status_path).expect("status");
        assert_eq!(status.state, ProjectState::Idle);
    }

    #[test]
    fn cleanup_releases_running_slot() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_project(temp.path(), &InitOptions { force: false }).expect("init");

        let mut queue = TaskQueue::default();
        queue.enqueue(vec![("spec-1".to_string(), "a".to_string())]);
        queue
            .mark_running("spec-1", "a", true, Utc::now())
            .expect("mark running");
        write_queue(&paths.queue_path, &queue).expect("write queue");

        CleanupGuard::new(temp.path()).run();

        let queue = load_queue(&paths.queue_path).expect("reload");
        assert_eq!(queue.count(TaskStatus::Running), 0);
        assert_eq!(queue.count(TaskStatus::Queued), 1);
    }
}
