//! Orchestration for a single `conductor step`.
//!
//! One step claims the head of the queue, runs one agent session for it,
//! and settles the task back into the queue: completed when the session
//! succeeded and the completion marker terminated the transcript, requeued
//! otherwise. Any error after the task was claimed requeues it before
//! propagating, so a crash never leaves a phantom `running` entry behind.

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::mpsc::Sender;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::core::event::AgentEvent;
use crate::io::config::{ProjectConfig, load_config};
use crate::io::init::ProjectPaths;
use crate::io::queue_store::{load_queue, write_queue};
use crate::io::runner::{AgentRunner, SessionRequest};
use crate::io::spec_record::{SpecTask, load_spec_record};
use crate::io::status::{ProjectStatus, write_status};

/// Result of a single step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Nothing left to run.
    NothingQueued,
    /// One session ran.
    Ran(StepReport),
}

/// What happened to the task that was claimed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub spec_id: String,
    pub task_id: String,
    /// 1-indexed session number for this task.
    pub iteration: u32,
    /// The agent process exited cleanly (or with a broken pipe).
    pub success: bool,
    /// The task reached completed status in the queue.
    pub completed: bool,
    pub duration_ms: u64,
}

/// A task consumed its entire session budget without completing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaxIterationsExceededError {
    pub spec_id: String,
    pub task_id: String,
    pub iteration: u32,
    pub max_iterations: u32,
}

impl fmt::Display for MaxIterationsExceededError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "task '{}/{}' would start iteration {} but max_iterations is {}",
            self.spec_id, self.task_id, self.iteration, self.max_iterations
        )
    }
}

impl std::error::Error for MaxIterationsExceededError {}

/// Execute one iteration of the task loop.
///
/// Accepted events from the session are forwarded over `live` as they
/// arrive, when a sender is given.
#[instrument(skip_all, fields(root = %root.display()))]
pub fn run_step<R: AgentRunner>(
    root: &Path,
    runner: &R,
    live: Option<&Sender<AgentEvent>>,
) -> Result<StepOutcome> {
    let paths = ProjectPaths::new(root);
    let cfg = load_config(&paths.config_path)?;

    let mut queue = load_queue(&paths.queue_path)?;
    let Some(next) = queue.next_queued() else {
        return Ok(StepOutcome::NothingQueued);
    };
    let spec_id = next.spec_id.clone();
    let task_id = next.task_id.clone();

    // Resolve the task before claiming it so a broken spec record leaves
    // the queue untouched.
    let record = load_spec_record(&paths.spec_record_path(&spec_id))?;
    let task = record
        .task(&task_id)
        .ok_or_else(|| anyhow!("task '{task_id}' not found in spec record for '{spec_id}'"))?
        .clone();

    let session_dir = paths.session_dir(&spec_id, &task_id);
    let iteration = next_iteration(&session_dir)?;
    if iteration > cfg.max_iterations {
        return Err(MaxIterationsExceededError {
            spec_id,
            task_id,
            iteration,
            max_iterations: cfg.max_iterations,
        }
        .into());
    }

    queue
        .mark_running(&spec_id, &task_id, true, Utc::now())
        .map_err(|err| anyhow!("claim task '{spec_id}/{task_id}': {err}"))?;
    write_queue(&paths.queue_path, &queue)?;
    write_status(&paths.status_path, &ProjectStatus::running(&spec_id, &task_id))?;
    info!(spec_id = %spec_id, task_id = %task_id, iteration, "task claimed");

    let request = SessionRequest {
        workdir: root.to_path_buf(),
        prompt: build_prompt(&task, &cfg),
        log_dir: session_dir,
        iteration,
        completion_marker: cfg.completion_marker.clone(),
        timeout: Duration::from_secs(cfg.session_timeout_secs),
        output_limit_bytes: cfg.output_limit_bytes,
    };

    let attempt = runner.run(&request, live);

    // Settle the queue from fresh disk state. The session may have taken a
    // long time; a stale in-memory copy would clobber concurrent repairs.
    let mut queue = load_queue(&paths.queue_path)?;
    let mut completed = matches!(&attempt, Ok(result) if result.success && result.is_complete);
    if completed {
        if let Err(err) = queue.mark_completed(&spec_id, &task_id, Utc::now()) {
            warn!(spec_id = %spec_id, task_id = %task_id, err = %err, "could not mark task completed");
            requeue(&mut queue, &spec_id, &task_id);
            completed = false;
        }
    } else {
        requeue(&mut queue, &spec_id, &task_id);
    }
    write_queue(&paths.queue_path, &queue)?;
    write_status(&paths.status_path, &ProjectStatus::idle())?;

    let result =
        attempt.with_context(|| format!("session for '{spec_id}/{task_id}' failed"))?;
    if completed {
        info!(spec_id = %spec_id, task_id = %task_id, iteration, "task completed");
    } else {
        info!(
            spec_id = %spec_id,
            task_id = %task_id,
            iteration,
            success = result.success,
            "task requeued"
        );
    }

    Ok(StepOutcome::Ran(StepReport {
        spec_id,
        task_id,
        iteration,
        success: result.success,
        completed,
        duration_ms: result.duration_ms,
    }))
}

fn requeue(queue: &mut crate::core::queue::TaskQueue, spec_id: &str, task_id: &str) {
    if let Err(err) = queue.mark_queued(spec_id, task_id) {
        warn!(spec_id, task_id, err = %err, "could not requeue task");
    }
}

/// Iteration numbers are derived from transcripts already on disk, so a
/// restarted conductor keeps counting where the previous one stopped. The
/// highest `iteration_<n>.jsonl` index wins; a gap in the numbering (a
/// deleted transcript) must never make a later index get reused.
fn next_iteration(session_dir: &Path) -> Result<u32> {
    if !session_dir.exists() {
        return Ok(1);
    }
    let mut highest = 0u32;
    for entry in fs::read_dir(session_dir)
        .with_context(|| format!("read session dir {}", session_dir.display()))?
    {
        let entry = entry.context("read session dir entry")?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(index) = name
            .strip_prefix("iteration_")
            .and_then(|rest| rest.strip_suffix(".jsonl"))
            .and_then(|digits| digits.parse::<u32>().ok())
        {
            highest = highest.max(index);
        }
    }
    Ok(highest + 1)
}

fn build_prompt(task: &SpecTask, cfg: &ProjectConfig) -> String {
    let mut buf = String::new();
    if let Some(title) = &task.title {
        buf.push_str(&format!("# {title}\n\n"));
    }
    match &task.description {
        Some(description) => buf.push_str(description),
        None => buf.push_str(&format!("Work on task '{}'.", task.id)),
    }
    buf.push_str(&format!(
        "\n\nWhen the task is fully done, end your final message with exactly: {}\n",
        cfg.completion_marker
    ));
    buf
}
