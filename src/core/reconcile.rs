//! Reconciliation decisions between queue state and spec completion records.
//!
//! The queue file and the per-spec completion records are independently
//! persisted views of the same work, and they drift after crashes. These
//! decisions are pure and idempotent: running them twice with no new activity
//! produces zero further fixes.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::core::queue::{TaskQueue, TaskStatus};

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub fixed_count: usize,
    /// Advisory strings describing each repair; never errors.
    pub issues: Vec<String>,
}

/// Repair drift between the queue and the authoritative completion records.
///
/// For each `running` entry:
/// 1. spec record marks it passing → transition to `completed`;
/// 2. `started_at` older than `stall_threshold` → reset to `queued`
///    (recovers from agent processes that died without updating the queue);
/// 3. otherwise left untouched.
pub fn reconcile_queue(
    queue: &mut TaskQueue,
    passing: &HashMap<String, HashSet<String>>,
    now: DateTime<Utc>,
    stall_threshold: Duration,
) -> ReconcileReport {
    let mut report = ReconcileReport::default();
    let stall = TimeDelta::from_std(stall_threshold).unwrap_or(TimeDelta::MAX);

    for entry in &mut queue.queue {
        if entry.status != TaskStatus::Running {
            continue;
        }

        let spec_says_done = passing
            .get(&entry.spec_id)
            .is_some_and(|ids| ids.contains(&entry.task_id));
        if spec_says_done {
            entry.status = TaskStatus::Completed;
            entry.completed_at = Some(now);
            report.issues.push(format!(
                "task {}/{} was running but its spec record marks it complete; marked completed",
                entry.spec_id, entry.task_id
            ));
            report.fixed_count += 1;
            continue;
        }

        let stalled = entry
            .started_at
            .is_some_and(|started| now.signed_duration_since(started) > stall);
        if stalled {
            entry.status = TaskStatus::Queued;
            entry.started_at = None;
            entry.completed_at = None;
            report.issues.push(format!(
                "task {}/{} stalled (running past the {}s threshold); reset to queued",
                entry.spec_id,
                entry.task_id,
                stall_threshold.as_secs()
            ));
            report.fixed_count += 1;
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    const STALL: Duration = Duration::from_secs(2 * 60 * 60);

    fn now() -> DateTime<Utc> {
        "2024-01-21T10:00:00Z".parse().expect("timestamp")
    }

    fn running_queue(ids: &[&str]) -> TaskQueue {
        let mut queue = TaskQueue::default();
        queue.enqueue(
            ids.iter()
                .map(|id| ("spec-1".to_string(), (*id).to_string())),
        );
        for id in ids {
            queue
                .mark_running("spec-1", id, false, now())
                .expect("mark running");
        }
        queue
    }

    fn passing(ids: &[&str]) -> HashMap<String, HashSet<String>> {
        let mut map = HashMap::new();
        map.insert(
            "spec-1".to_string(),
            ids.iter().map(|id| (*id).to_string()).collect(),
        );
        map
    }

    /// X passes in the spec record while the queue shows it running; Y does
    /// not. Only X is repaired.
    #[test]
    fn fixes_completed_but_running() {
        let mut queue = running_queue(&["x", "y"]);
        let report = reconcile_queue(&mut queue, &passing(&["x"]), now(), STALL);

        assert_eq!(report.fixed_count, 1);
        assert!(report.issues[0].contains("x"));
        let x = queue.find("spec-1", "x").expect("x");
        let y = queue.find("spec-1", "y").expect("y");
        assert_eq!(x.status, TaskStatus::Completed);
        assert_eq!(y.status, TaskStatus::Running);
    }

    #[test]
    fn fixes_stale_running_entry() {
        let mut queue = running_queue(&["x"]);
        queue.queue[0].started_at = Some(now() - TimeDelta::hours(3));

        let report = reconcile_queue(&mut queue, &passing(&[]), now(), STALL);

        assert_eq!(report.fixed_count, 1);
        assert!(report.issues[0].contains("stalled"));
        assert!(report.issues[0].contains("x"));
        let x = queue.find("spec-1", "x").expect("x");
        assert_eq!(x.status, TaskStatus::Queued);
        assert!(x.started_at.is_none());
        assert!(x.completed_at.is_none());
    }

    #[test]
    fn fresh_running_entry_is_left_alone() {
        let mut queue = running_queue(&["x"]);
        let report = reconcile_queue(&mut queue, &passing(&[]), now(), STALL);
        assert_eq!(report.fixed_count, 0);
        assert!(report.issues.is_empty());
        assert_eq!(
            queue.find("spec-1", "x").expect("x").status,
            TaskStatus::Running
        );
    }

    /// Reconciliation is eventually consistent: a second pass with no new
    /// activity fixes nothing.
    #[test]
    fn second_pass_is_a_no_op() {
        let mut queue = running_queue(&["x", "y"]);
        queue.queue[1].started_at = Some(now() - TimeDelta::hours(3));

        let first = reconcile_queue(&mut queue, &passing(&["x"]), now(), STALL);
        assert_eq!(first.fixed_count, 2);

        let second = reconcile_queue(&mut queue, &passing(&["x"]), now(), STALL);
        assert_eq!(second.fixed_count, 0);
        assert!(second.issues.is_empty());
    }

    #[test]
    fn missing_spec_record_only_triggers_stall_check() {
        let mut queue = running_queue(&["x"]);
        queue.queue[0].started_at = Some(now() - TimeDelta::hours(3));
        let report = reconcile_queue(&mut queue, &HashMap::new(), now(), STALL);
        assert_eq!(report.fixed_count, 1);
        assert!(report.issues[0].contains("stalled"));
    }
}
