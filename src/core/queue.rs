//! Task queue state machine: entries, statuses, transitions.
//!
//! The queue is the concurrency-control surface for a project: at most one
//! entry may be `running` at any time, because only one agent process may be
//! active against a project at once. Entries are never deleted, only
//! transitioned, so the queue file doubles as a permanent audit trail.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current queue file format version.
pub const QUEUE_VERSION: u32 = 1;

/// Lifecycle status of a queued task.
///
/// Transitions: `queued → running → completed`, plus `running → queued`
/// (cancellation and reconciliation resets). Nothing leaves `completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
}

/// One task tracked in the queue, associated with exactly one spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskQueueEntry {
    pub spec_id: String,
    pub task_id: String,
    pub status: TaskStatus,
    /// Set while `running`; cleared on regression to `queued`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Set when `completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskQueueEntry {
    fn matches(&self, spec_id: &str, task_id: &str) -> bool {
        self.spec_id == spec_id && self.task_id == task_id
    }
}

/// Versioned, insertion-ordered task queue for one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskQueue {
    pub version: u32,
    pub queue: Vec<TaskQueueEntry>,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self {
            version: QUEUE_VERSION,
            queue: Vec::new(),
        }
    }
}

impl TaskQueue {
    /// Append new `queued` entries, ignoring duplicate `(spec_id, task_id)`
    /// pairs. Returns the number actually added.
    pub fn enqueue(&mut self, entries: impl IntoIterator<Item = (String, String)>) -> usize {
        let mut added = 0;
        for (spec_id, task_id) in entries {
            if self.find(&spec_id, &task_id).is_some() {
                continue;
            }
            self.queue.push(TaskQueueEntry {
                spec_id,
                task_id,
                status: TaskStatus::Queued,
                started_at: None,
                completed_at: None,
            });
            added += 1;
        }
        added
    }

    /// Promote a task to `running` with a fresh `started_at`.
    ///
    /// With `clear_others` the demotion of every currently running entry
    /// happens FIRST, then the promotion; that ordering is what enforces the
    /// single-running invariant. Callers that manage concurrency externally
    /// (reconciliation tests, mainly) may pass `false`.
    pub fn mark_running(
        &mut self,
        spec_id: &str,
        task_id: &str,
        clear_others: bool,
        now: DateTime<Utc>,
    ) -> Result<(), String> {
        if clear_others {
            for entry in &mut self.queue {
                if entry.status == TaskStatus::Running && !entry.matches(spec_id, task_id) {
                    entry.status = TaskStatus::Queued;
                    entry.started_at = None;
                    entry.completed_at = None;
                }
            }
        }
        let entry = self.find_mut(spec_id, task_id)?;
        if entry.status == TaskStatus::Completed {
            return Err(format!("task {spec_id}/{task_id} is already completed"));
        }
        entry.status = TaskStatus::Running;
        entry.started_at = Some(now);
        entry.completed_at = None;
        Ok(())
    }

    /// Demote a task back to `queued`, clearing both timestamps.
    pub fn mark_queued(&mut self, spec_id: &str, task_id: &str) -> Result<(), String> {
        let entry = self.find_mut(spec_id, task_id)?;
        if entry.status == TaskStatus::Completed {
            return Err(format!("task {spec_id}/{task_id} is already completed"));
        }
        entry.status = TaskStatus::Queued;
        entry.started_at = None;
        entry.completed_at = None;
        Ok(())
    }

    /// Promote a task to `completed` with `completed_at` set.
    pub fn mark_completed(
        &mut self,
        spec_id: &str,
        task_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), String> {
        let entry = self.find_mut(spec_id, task_id)?;
        if entry.status == TaskStatus::Completed {
            return Ok(());
        }
        entry.status = TaskStatus::Completed;
        entry.completed_at = Some(now);
        Ok(())
    }

    /// Demote all `running` entries to `queued`, returning the count changed.
    ///
    /// Run at process startup, before any new task starts, to recover from an
    /// unclean shutdown.
    pub fn clear_running_tasks(&mut self) -> usize {
        let mut cleared = 0;
        for entry in &mut self.queue {
            if entry.status == TaskStatus::Running {
                entry.status = TaskStatus::Queued;
                entry.started_at = None;
                entry.completed_at = None;
                cleared += 1;
            }
        }
        cleared
    }

    /// First `queued` entry in insertion order (the next task to run).
    pub fn next_queued(&self) -> Option<&TaskQueueEntry> {
        self.queue
            .iter()
            .find(|entry| entry.status == TaskStatus::Queued)
    }

    /// The single `running` entry, if any.
    pub fn running(&self) -> Option<&TaskQueueEntry> {
        self.queue
            .iter()
            .find(|entry| entry.status == TaskStatus::Running)
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.queue
            .iter()
            .filter(|entry| entry.status == status)
            .count()
    }

    pub fn find(&self, spec_id: &str, task_id: &str) -> Option<&TaskQueueEntry> {
        self.queue
            .iter()
            .find(|entry| entry.matches(spec_id, task_id))
    }

    fn find_mut(&mut self, spec_id: &str, task_id: &str) -> Result<&mut TaskQueueEntry, String> {
        self.queue
            .iter_mut()
            .find(|entry| entry.matches(spec_id, task_id))
            .ok_or_else(|| format!("unknown task {spec_id}/{task_id}"))
    }

    /// Check semantic invariants not expressible in JSON Schema:
    /// - no duplicate `(spec_id, task_id)` pairs
    /// - at most one `running` entry
    /// - timestamps coherent with status
    pub fn validate_invariants(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let mut seen = HashSet::new();
        let mut running = 0;
        for entry in &self.queue {
            let key = (entry.spec_id.as_str(), entry.task_id.as_str());
            if !seen.insert(key) {
                errors.push(format!(
                    "duplicate task {}/{}",
                    entry.spec_id, entry.task_id
                ));
            }
            match entry.status {
                TaskStatus::Queued => {
                    if entry.started_at.is_some() || entry.completed_at.is_some() {
                        errors.push(format!(
                            "{}/{}: queued entry must have no timestamps",
                            entry.spec_id, entry.task_id
                        ));
                    }
                }
                TaskStatus::Running => {
                    running += 1;
                    if entry.started_at.is_none() {
                        errors.push(format!(
                            "{}/{}: running entry missing startedAt",
                            entry.spec_id, entry.task_id
                        ));
                    }
                    if entry.completed_at.is_some() {
                        errors.push(format!(
                            "{}/{}: running entry must not have completedAt",
                            entry.spec_id, entry.task_id
                        ));
                    }
                }
                TaskStatus::Completed => {
                    if entry.completed_at.is_none() {
                        errors.push(format!(
                            "{}/{}: completed entry missing completedAt",
                            entry.spec_id, entry.task_id
                        ));
                    }
                }
            }
        }
        if running > 1 {
            errors.push(format!("{running} running entries (at most one allowed)"));
        }
        errors
    }
}
