//! Agent process runner: spawn a backend, tee its output, normalize live.
//!
//! The raw transcript file is written byte-for-byte from backend stdout,
//! before each line is handed to the dialect parser, so diagnosis never
//! depends on the parser being correct. Normalization happens incrementally
//! as lines arrive; callers can watch progress over a channel instead of
//! waiting for process exit.

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::claude;
use crate::core::codex;
use crate::core::event::AgentEvent;
use crate::core::session::SessionState;
use crate::io::engine::Engine;
use crate::io::process::{
    exit_indicates_success, isolate_in_own_group, join_output, kill_process_tree,
    read_stream_limited,
};

/// Grace period for the child to exit after its stdout reaches EOF.
const EXIT_GRACE: Duration = Duration::from_secs(10);

/// Parameters for one agent session.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    /// Working directory for the backend process.
    pub workdir: PathBuf,
    /// Prompt text piped to the backend's stdin.
    pub prompt: String,
    /// Directory receiving `iteration_<n>` transcript and diagnostics files.
    pub log_dir: PathBuf,
    /// Iteration identifier for the log file names.
    pub iteration: u32,
    /// Terminal marker for suffix-anchored completion detection.
    pub completion_marker: String,
    /// Maximum wall-clock time for the session.
    pub timeout: Duration,
    /// Bound on in-memory stderr collection. The transcript file is never
    /// truncated.
    pub output_limit_bytes: usize,
}

impl SessionRequest {
    pub fn transcript_path(&self) -> PathBuf {
        self.log_dir
            .join(format!("iteration_{}.jsonl", self.iteration))
    }

    pub fn stderr_log_path(&self) -> PathBuf {
        self.log_dir
            .join(format!("iteration_{}.stderr.log", self.iteration))
    }
}

/// Structured result of one agent session.
#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    /// Clean exit or broken-pipe exit, and no timeout.
    pub success: bool,
    /// Suffix-anchored completion marker detected in the accumulated text.
    pub is_complete: bool,
    pub duration_ms: u64,
    /// Accumulated assistant-visible text (deduplicated).
    pub transcript: String,
    pub exit_code: Option<i32>,
    /// Normalized, deduplicated events in arrival order.
    pub events: Vec<AgentEvent>,
}

/// Abstraction over agent execution backends.
///
/// The orchestration layer only depends on this trait; tests substitute
/// scripted runners that return predetermined results without spawning
/// processes.
pub trait AgentRunner {
    /// Run one session. Accepted events are forwarded over `live` as they
    /// arrive, when a sender is given.
    fn run(&self, request: &SessionRequest, live: Option<&Sender<AgentEvent>>)
    -> Result<RunResult>;
}

/// Runner that spawns a real backend process.
#[derive(Debug, Clone)]
pub struct ProcessAgentRunner {
    pub engine: Engine,
    pub model: Option<String>,
}

impl ProcessAgentRunner {
    pub fn new(engine: Engine, model: Option<String>) -> Self {
        Self { engine, model }
    }

    /// Build the backend invocation: non-interactive, streaming, structured
    /// output, prompt on stdin.
    fn command(&self, workdir: &Path) -> Command {
        let mut cmd = match self.engine {
            Engine::Claude => {
                let mut cmd = Command::new("claude");
                cmd.arg("-p")
                    .arg("--verbose")
                    .arg("--output-format")
                    .arg("stream-json");
                cmd
            }
            Engine::Codex => {
                let mut cmd = Command::new("codex");
                cmd.arg("exec").arg("--json").arg("-");
                cmd
            }
        };
        if let Some(model) = &self.model {
            cmd.arg("--model").arg(model);
        }
        cmd.current_dir(workdir);
        cmd
    }
}

impl AgentRunner for ProcessAgentRunner {
    #[instrument(skip_all, fields(engine = %self.engine, iteration = request.iteration))]
    fn run(
        &self,
        request: &SessionRequest,
        live: Option<&Sender<AgentEvent>>,
    ) -> Result<RunResult> {
        info!(workdir = %request.workdir.display(), "starting agent session");
        let cmd = self.command(&request.workdir);
        let parse = match self.engine {
            Engine::Claude => claude::parse_line,
            Engine::Codex => codex::parse_line,
        };
        run_session(cmd, parse, request, live)
    }
}

/// Drive one backend process to completion.
///
/// Stdout is teed line-by-line into the transcript file by a reader thread
/// before the line reaches the parser. The main thread consumes lines
/// against the deadline, updates the session state, and forwards accepted
/// events. On timeout the child is killed; a timed-out session is never a
/// success regardless of exit code.
fn run_session(
    mut cmd: Command,
    parse: fn(&str) -> Vec<AgentEvent>,
    request: &SessionRequest,
    live: Option<&Sender<AgentEvent>>,
) -> Result<RunResult> {
    let start = Instant::now();
    fs::create_dir_all(&request.log_dir)
        .with_context(|| format!("create log dir {}", request.log_dir.display()))?;
    let transcript_path = request.transcript_path();
    let mut transcript_file = fs::File::create(&transcript_path)
        .with_context(|| format!("create transcript {}", transcript_path.display()))?;

    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    isolate_in_own_group(&mut cmd);
    let mut child = cmd.spawn().context("spawn agent process")?;

    let mut child_stdin = child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("stdin was not piped"))?;
    child_stdin
        .write_all(request.prompt.as_bytes())
        .context("write prompt to stdin")?;
    drop(child_stdin);

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let (line_tx, line_rx) = mpsc::channel::<String>();
    let stdout_handle = thread::spawn(move || -> Result<()> {
        let mut reader = BufReader::new(stdout);
        loop {
            let mut raw = Vec::new();
            let n = reader.read_until(b'\n', &mut raw).context("read line")?;
            if n == 0 {
                break;
            }
            transcript_file.write_all(&raw).context("tee transcript")?;
            transcript_file.flush().context("flush transcript")?;
            let line = String::from_utf8_lossy(&raw).into_owned();
            // Consumer may be gone on the timeout path; keep draining so
            // the transcript file stays complete.
            let _ = line_tx.send(line);
        }
        Ok(())
    });
    let stderr_limit = request.output_limit_bytes;
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, stderr_limit));

    let deadline = start + request.timeout;
    let mut session = SessionState::new(request.completion_marker.clone());
    let mut events = Vec::new();
    let mut timed_out = false;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            timed_out = true;
            break;
        }
        match line_rx.recv_timeout(remaining) {
            Ok(line) => {
                for event in session.ingest(parse(&line)) {
                    if let Some(tx) = live {
                        // A detached viewer is not an error.
                        let _ = tx.send(event.clone());
                    }
                    events.push(event);
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                timed_out = true;
                break;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let status = if timed_out {
        warn!(
            timeout_secs = request.timeout.as_secs(),
            "session timed out, killing"
        );
        kill_process_tree(&mut child)?;
        child.wait().context("wait agent after kill")?
    } else {
        match child.wait_timeout(EXIT_GRACE).context("wait for agent")? {
            Some(status) => status,
            None => {
                warn!("agent did not exit after closing stdout, killing");
                kill_process_tree(&mut child)?;
                child.wait().context("wait agent after kill")?
            }
        }
    };

    // Lines the reader tee'd between the deadline check and the kill.
    while let Ok(line) = line_rx.try_recv() {
        for event in session.ingest(parse(&line)) {
            events.push(event);
        }
    }

    match stdout_handle.join() {
        Ok(result) => result.context("transcript reader failed")?,
        Err(_) => return Err(anyhow!("transcript reader thread panicked")),
    }
    let (stderr_bytes, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;
    write_stderr_log(&request.stderr_log_path(), &stderr_bytes, stderr_truncated)?;

    let success = !timed_out && exit_indicates_success(status);
    let result = RunResult {
        success,
        is_complete: session.is_complete(),
        duration_ms: start.elapsed().as_millis() as u64,
        transcript: session.transcript().to_string(),
        exit_code: status.code(),
        events,
    };
    debug!(
        success = result.success,
        is_complete = result.is_complete,
        exit_code = ?result.exit_code,
        events = result.events.len(),
        "agent session finished"
    );
    Ok(result)
}

fn write_stderr_log(path: &Path, bytes: &[u8], truncated: usize) -> Result<()> {
    let mut buf = String::from_utf8_lossy(bytes).into_owned();
    if truncated > 0 {
        buf.push_str(&format!("\n[stderr truncated {truncated} bytes]\n"));
    }
    fs::write(path, buf).with_context(|| format!("write stderr log {}", path.display()))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn request(log_dir: &Path) -> SessionRequest {
        SessionRequest {
            workdir: log_dir.to_path_buf(),
            prompt: String::new(),
            log_dir: log_dir.to_path_buf(),
            iteration: 1,
            completion_marker: "TASK COMPLETE".to_string(),
            timeout: Duration::from_secs(10),
            output_limit_bytes: 64 * 1024,
        }
    }

    fn shell(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    /// Stream-json lines are normalized, the raw transcript is preserved,
    /// and stderr lands in its own log file.
    #[test]
    fn session_normalizes_and_tees_output() {
        let temp = tempfile::tempdir().expect("tempdir");
        let req = request(temp.path());
        let script = concat!(
            r#"printf '%s\n' '{"type":"assistant","message":{"content":[{"type":"text","text":"working on it"}]}}'; "#,
            r#"printf '%s\n' 'not json at all'; "#,
            r#"printf '%s\n' '{"type":"result","subtype":"success","result":"done. TASK COMPLETE"}'; "#,
            "echo oops >&2",
        );

        let result = run_session(shell(script), claude::parse_line, &req, None).expect("run");

        assert!(result.success);
        assert!(result.is_complete);
        assert_eq!(result.exit_code, Some(0));
        assert!(result.transcript.contains("working on it"));
        assert!(result.transcript.trim_end().ends_with("TASK COMPLETE"));

        let raw = fs::read_to_string(req.transcript_path()).expect("transcript");
        assert!(raw.contains(r#""type":"assistant""#));
        assert!(raw.contains("not json at all"));
        let stderr = fs::read_to_string(req.stderr_log_path()).expect("stderr log");
        assert!(stderr.contains("oops"));
    }

    #[test]
    fn events_are_forwarded_live() {
        let temp = tempfile::tempdir().expect("tempdir");
        let req = request(temp.path());
        let script = r#"printf '%s\n' '{"type":"assistant","message":{"content":[{"type":"text","text":"hello"}]}}'"#;

        let (tx, rx) = mpsc::channel();
        let result = run_session(shell(script), claude::parse_line, &req, Some(&tx)).expect("run");
        drop(tx);

        let live: Vec<AgentEvent> = rx.into_iter().collect();
        assert_eq!(live, result.events);
        assert!(matches!(&live[0], AgentEvent::Text { content } if content == "hello"));
    }

    /// The backend forks a helper that inherits stdout; the deadline must
    /// cut the whole tree down, not just the leader, or the transcript
    /// reader keeps the session alive until the helper exits.
    #[test]
    fn timeout_kills_the_process_and_is_not_success() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut req = request(temp.path());
        req.timeout = Duration::from_millis(200);

        let start = Instant::now();
        let result = run_session(shell("sleep 30 & sleep 30"), claude::parse_line, &req, None)
            .expect("run");
        assert!(start.elapsed() < Duration::from_secs(10));
        assert!(!result.success);
        assert!(!result.is_complete);
    }

    #[test]
    fn nonzero_exit_is_failure_but_broken_pipe_is_not() {
        let temp = tempfile::tempdir().expect("tempdir");
        let req = request(temp.path());

        let failed = run_session(shell("exit 3"), claude::parse_line, &req, None).expect("run");
        assert!(!failed.success);
        assert_eq!(failed.exit_code, Some(3));

        let piped = run_session(shell("exit 141"), claude::parse_line, &req, None).expect("run");
        assert!(piped.success);
    }

    #[test]
    fn codex_dialect_is_parsed_when_selected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let req = request(temp.path());
        let script = r#"printf '%s\n' '[2024-01-21T10:00:00] exec ls -la'"#;

        let result = run_session(shell(script), codex::parse_line, &req, None).expect("run");
        assert!(
            matches!(&result.events[0], AgentEvent::ToolCall { name, .. } if name == "shell")
        );
    }

    #[test]
    fn duplicate_stream_text_is_suppressed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let req = request(temp.path());
        let line = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"same"}]}}"#;
        let script = format!("printf '%s\\n' '{line}'; printf '%s\\n' '{line}'");

        let result = run_session(shell(&script), claude::parse_line, &req, None).expect("run");
        let texts = result
            .events
            .iter()
            .filter(|e| matches!(e, AgentEvent::Text { .. }))
            .count();
        assert_eq!(texts, 1);
    }
}
