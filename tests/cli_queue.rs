//! CLI tests for queue-facing conductor commands.
//!
//! Spawns the conductor binary and verifies exit codes and queue state for
//! init, enqueue, status, and an empty-queue step.

use std::fs;
use std::process::Command;

use conductor::core::queue::TaskStatus;
use conductor::exit_codes;
use conductor::io::init::ProjectPaths;
use conductor::io::queue_store::load_queue;

fn conductor(root: &std::path::Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_conductor"))
        .current_dir(root)
        .args(args)
        .output()
        .expect("run conductor")
}

#[test]
fn init_then_enqueue_populates_the_queue() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path();

    let init = conductor(root, &["init"]);
    assert_eq!(init.status.code(), Some(exit_codes::OK));

    let paths = ProjectPaths::new(root);
    let record_path = paths.spec_record_path("spec-1");
    fs::create_dir_all(record_path.parent().expect("parent")).expect("mkdir");
    fs::write(
        &record_path,
        r#"{"tasks": [
            {"id": "a", "passes": false},
            {"id": "b", "passes": true},
            {"id": "c", "passes": false}
        ]}"#,
    )
    .expect("write record");

    let enqueue = conductor(root, &["enqueue", "spec-1"]);
    assert_eq!(enqueue.status.code(), Some(exit_codes::OK));

    // Only the non-passing tasks were queued.
    let queue = load_queue(&paths.queue_path).expect("load queue");
    assert_eq!(queue.count(TaskStatus::Queued), 2);
    assert!(queue.find("spec-1", "a").is_some());
    assert!(queue.find("spec-1", "b").is_none());

    // Enqueueing again adds nothing.
    let again = conductor(root, &["enqueue", "spec-1"]);
    assert_eq!(again.status.code(), Some(exit_codes::OK));
    let queue = load_queue(&paths.queue_path).expect("reload");
    assert_eq!(queue.count(TaskStatus::Queued), 2);
}

#[test]
fn step_with_empty_queue_exits_with_complete_code() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path();
    assert_eq!(conductor(root, &["init"]).status.code(), Some(exit_codes::OK));

    let step = conductor(root, &["step"]);
    assert_eq!(step.status.code(), Some(exit_codes::COMPLETE));
}

#[test]
fn status_reports_counts() {
    let temp = tempfile::tempdir().expect("tempdir");
    let root = temp.path();
    assert_eq!(conductor(root, &["init"]).status.code(), Some(exit_codes::OK));

    let status = conductor(root, &["status"]);
    assert_eq!(status.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&status.stdout);
    assert!(stdout.contains("queued: 0"));
}

#[test]
fn enqueue_without_init_fails() {
    let temp = tempfile::tempdir().expect("tempdir");
    let enqueue = conductor(temp.path(), &["enqueue", "spec-1"]);
    assert_eq!(enqueue.status.code(), Some(exit_codes::INVALID));
}
