//! Test-only helpers: scripted agent runners and project scaffolding.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::sync::mpsc::Sender;

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::core::event::AgentEvent;
use crate::io::init::{InitOptions, ProjectPaths, init_project};
use crate::io::runner::{AgentRunner, RunResult, SessionRequest};

/// One scripted session outcome.
#[derive(Debug, Clone)]
pub enum ScriptedSession {
    Finished(RunResult),
    Fails(String),
}

/// Agent runner that replays predetermined session results in order.
///
/// Running more sessions than were scripted is an error: it means the
/// code under test looped more than the test expected.
pub struct ScriptedRunner {
    sessions: Mutex<VecDeque<ScriptedSession>>,
}

impl ScriptedRunner {
    pub fn new(sessions: Vec<ScriptedSession>) -> Self {
        Self {
            sessions: Mutex::new(sessions.into_iter().collect()),
        }
    }

    pub fn remaining(&self) -> usize {
        self.sessions.lock().expect("sessions lock").len()
    }
}

impl AgentRunner for ScriptedRunner {
    fn run(
        &self,
        request: &SessionRequest,
        live: Option<&Sender<AgentEvent>>,
    ) -> Result<RunResult> {
        let session = self
            .sessions
            .lock()
            .expect("sessions lock")
            .pop_front()
            .ok_or_else(|| anyhow!("unscripted session for {}", request.log_dir.display()))?;
        match session {
            ScriptedSession::Finished(result) => {
                // Leave a transcript behind so iteration numbering advances,
                // as the real runner would.
                fs::create_dir_all(&request.log_dir)?;
                fs::write(request.transcript_path(), &result.transcript)?;
                if let Some(tx) = live {
                    for event in &result.events {
                        let _ = tx.send(event.clone());
                    }
                }
                Ok(result)
            }
            ScriptedSession::Fails(message) => Err(anyhow!(message)),
        }
    }
}

/// A session result with the given outcome flags and transcript.
pub fn run_result(success: bool, is_complete: bool, transcript: &str) -> RunResult {
    RunResult {
        success,
        is_complete,
        duration_ms: 10,
        transcript: transcript.to_string(),
        exit_code: Some(if success { 0 } else { 1 }),
        events: vec![AgentEvent::Text {
            content: transcript.to_string(),
        }],
    }
}

/// An initialized project in a temp directory with spec record helpers.
pub struct TestProject {
    temp: TempDir,
    pub paths: ProjectPaths,
}

impl TestProject {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir()?;
        let paths = init_project(temp.path(), &InitOptions { force: false })?;
        Ok(Self { temp, paths })
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    /// Write a minimal spec record where every listed task is not yet
    /// passing.
    pub fn write_spec_record(&self, spec_id: &str, task_ids: &[&str]) -> Result<()> {
        let tasks: Vec<serde_json::Value> = task_ids
            .iter()
            .map(|id| {
                serde_json::json!({
                    "id": id,
                    "passes": false,
                    "title": format!("Task {id}"),
                    "description": format!("Do the work for {id}.")
                })
            })
            .collect();
        let record = serde_json::json!({ "tasks": tasks });
        let path = self.paths.spec_record_path(spec_id);
        fs::create_dir_all(path.parent().ok_or_else(|| anyhow!("no parent"))?)?;
        let mut buf = serde_json::to_string_pretty(&record)?;
        buf.push('\n');
        fs::write(path, buf)?;
        Ok(())
    }
}
