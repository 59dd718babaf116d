//! Multi-session looping for `conductor run`.

use std::path::Path;
use std::sync::mpsc::Sender;

use anyhow::Result;
use tracing::{info, warn};

use crate::core::event::AgentEvent;
use crate::io::init::ProjectPaths;
use crate::io::queue_store::{load_queue, write_queue};
use crate::io::runner::AgentRunner;
use crate::io::status::CleanupGuard;
use crate::step::{MaxIterationsExceededError, StepOutcome, StepReport, run_step};

/// Reason why `run_loop` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// The queue has no queued tasks left.
    Complete,
    /// A session ended with a process failure.
    TaskFailed {
        spec_id: String,
        task_id: String,
        iteration: u32,
    },
    /// The next task exhausted its session budget.
    MaxIterationsExceeded {
        spec_id: String,
        task_id: String,
        max_iterations: u32,
    },
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub steps_executed: u32,
    pub stop: LoopStop,
}

/// Run sessions until the queue drains, a session fails, or a task runs out
/// of budget.
///
/// Any `running` entries found at startup are leftovers from an interrupted
/// invocation; they are demoted before the first step. A cleanup guard
/// releases the run slot again on every exit path, including errors.
pub fn run_loop<R: AgentRunner, F: FnMut(&StepReport)>(
    root: &Path,
    runner: &R,
    live: Option<&Sender<AgentEvent>>,
    mut on_step: F,
) -> Result<LoopOutcome> {
    let paths = ProjectPaths::new(root);
    release_stale_running(&paths)?;
    let _guard = CleanupGuard::new(root);

    let mut steps_executed = 0u32;
    loop {
        match run_step(root, runner, live) {
            Ok(StepOutcome::NothingQueued) => {
                return Ok(LoopOutcome {
                    steps_executed,
                    stop: LoopStop::Complete,
                });
            }
            Ok(StepOutcome::Ran(report)) => {
                steps_executed += 1;
                on_step(&report);
                if !report.success {
                    return Ok(LoopOutcome {
                        steps_executed,
                        stop: LoopStop::TaskFailed {
                            spec_id: report.spec_id,
                            task_id: report.task_id,
                            iteration: report.iteration,
                        },
                    });
                }
            }
            Err(err) => {
                if let Some(limit) = err.downcast_ref::<MaxIterationsExceededError>() {
                    return Ok(LoopOutcome {
                        steps_executed,
                        stop: LoopStop::MaxIterationsExceeded {
                            spec_id: limit.spec_id.clone(),
                            task_id: limit.task_id.clone(),
                            max_iterations: limit.max_iterations,
                        },
                    });
                }
                return Err(err);
            }
        }
    }
}

fn release_stale_running(paths: &ProjectPaths) -> Result<()> {
    let mut queue = load_queue(&paths.queue_path)?;
    let cleared = queue.clear_running_tasks();
    if cleared > 0 {
        warn!(cleared, "demoted running tasks left by a previous invocation");
        write_queue(&paths.queue_path, &queue)?;
    } else {
        info!("queue has no stale running entries");
    }
    Ok(())
}
