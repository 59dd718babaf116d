//! Conductor CLI: drive coding-agent backends through a per-project task
//! queue.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use conductor::core::event::AgentEvent;
use conductor::core::queue::TaskStatus;
use conductor::exit_codes;
use conductor::io::config::{load_config, load_settings};
use conductor::io::engine::{
    Engine, EnginePurpose, probe_engine, resolve_engine, resolve_model,
};
use conductor::io::init::{InitOptions, ProjectPaths, init_project};
use conductor::io::queue_store::{load_queue, write_queue};
use conductor::io::reconcile::reconcile_project;
use conductor::io::runner::ProcessAgentRunner;
use conductor::io::spec_record::load_spec_record;
use conductor::io::status::{CleanupGuard, load_status};
use conductor::looping::{LoopStop, run_loop};
use conductor::step::{StepOutcome, run_step};

#[derive(Parser)]
#[command(
    name = "conductor",
    version,
    about = "Autonomous software-task conductor"
)]
struct Cli {
    /// Project root (defaults to the current directory).
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.conductor/` scaffolding (queue, config, status).
    Init {
        /// Overwrite existing conductor-owned files (the queue is preserved).
        #[arg(short, long)]
        force: bool,
    },
    /// Queue every non-passing task from a spec's completion record.
    Enqueue {
        /// Spec identifier (directory name under `specs/`).
        spec_id: String,
    },
    /// Print queue counts and the current run state.
    Status,
    /// Run one agent session for the head of the queue.
    Step {
        /// Backend engine (`claude` or `codex`).
        #[arg(long)]
        engine: Option<String>,
        /// Model identifier passed through to the backend.
        #[arg(long)]
        model: Option<String>,
    },
    /// Run sessions until the queue drains or a session fails.
    Run {
        #[arg(long)]
        engine: Option<String>,
        #[arg(long)]
        model: Option<String>,
    },
    /// Repair queue drift against spec completion records.
    Reconcile,
    /// Probe installed backends and print their versions.
    Engines,
}

fn main() {
    conductor::logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir().context("determine current directory")?,
    };
    match cli.command {
        Command::Init { force } => cmd_init(&root, force),
        Command::Enqueue { spec_id } => cmd_enqueue(&root, &spec_id),
        Command::Status => cmd_status(&root),
        Command::Step { engine, model } => cmd_step(&root, engine.as_deref(), model.as_deref()),
        Command::Run { engine, model } => cmd_run(&root, engine.as_deref(), model.as_deref()),
        Command::Reconcile => cmd_reconcile(&root),
        Command::Engines => cmd_engines(),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_project(root, &InitOptions { force })?;
    println!("initialized {}", paths.conductor_dir.display());
    Ok(exit_codes::OK)
}

fn cmd_enqueue(root: &Path, spec_id: &str) -> Result<i32> {
    let paths = ProjectPaths::new(root);
    let record = load_spec_record(&paths.spec_record_path(spec_id))?;
    let mut queue = load_queue(&paths.queue_path)?;
    let added = queue.enqueue(
        record
            .tasks
            .iter()
            .filter(|task| !task.passes)
            .map(|task| (spec_id.to_string(), task.id.clone())),
    );
    write_queue(&paths.queue_path, &queue)?;
    println!("queued {added} task(s) from '{spec_id}'");
    Ok(exit_codes::OK)
}

fn cmd_status(root: &Path) -> Result<i32> {
    let paths = ProjectPaths::new(root);
    let queue = load_queue(&paths.queue_path)?;
    let status = load_status(&paths.status_path)?;
    println!(
        "queued: {}  running: {}  completed: {}",
        queue.count(TaskStatus::Queued),
        queue.count(TaskStatus::Running),
        queue.count(TaskStatus::Completed),
    );
    match (&status.spec_id, &status.task_id) {
        (Some(spec_id), Some(task_id)) => {
            println!("state: {:?} ({spec_id}/{task_id})", status.state);
        }
        _ => println!("state: {:?}", status.state),
    }
    Ok(exit_codes::OK)
}

/// Exit code for a run cut short by SIGINT/SIGTERM (128 + SIGINT).
const INTERRUPTED: i32 = 130;

/// Release the run slot before dying on SIGINT/SIGTERM.
///
/// The handler owns its own guard; the normal exit path runs cleanup through
/// a separate one, and the on-disk effect is idempotent either way.
fn install_interrupt_cleanup(root: &Path) -> Result<()> {
    let guard = Arc::new(CleanupGuard::new(root));
    ctrlc::set_handler(move || {
        guard.run();
        std::process::exit(INTERRUPTED);
    })
    .context("install interrupt handler")
}

fn cmd_step(root: &Path, engine: Option<&str>, model: Option<&str>) -> Result<i32> {
    let runner = build_runner(root, engine, model)?;
    install_interrupt_cleanup(root)?;
    let (printer, tx) = spawn_event_printer();
    let outcome = run_step(root, &runner, Some(&tx));
    drop(tx);
    let _ = printer.join();
    match outcome? {
        StepOutcome::NothingQueued => {
            println!("nothing queued");
            Ok(exit_codes::COMPLETE)
        }
        StepOutcome::Ran(report) => {
            println!(
                "{}/{} iteration {}: {}",
                report.spec_id,
                report.task_id,
                report.iteration,
                describe(report.success, report.completed),
            );
            if report.success {
                Ok(exit_codes::OK)
            } else {
                Ok(exit_codes::FAILED)
            }
        }
    }
}

fn cmd_run(root: &Path, engine: Option<&str>, model: Option<&str>) -> Result<i32> {
    let runner = build_runner(root, engine, model)?;
    install_interrupt_cleanup(root)?;
    let (printer, tx) = spawn_event_printer();
    let outcome = run_loop(root, &runner, Some(&tx), |report| {
        println!(
            "{}/{} iteration {}: {}",
            report.spec_id,
            report.task_id,
            report.iteration,
            describe(report.success, report.completed),
        );
    });
    drop(tx);
    let _ = printer.join();
    let outcome = outcome?;
    match outcome.stop {
        LoopStop::Complete => {
            println!("queue drained after {} session(s)", outcome.steps_executed);
            Ok(exit_codes::COMPLETE)
        }
        LoopStop::TaskFailed {
            spec_id,
            task_id,
            iteration,
        } => {
            println!("session for {spec_id}/{task_id} failed on iteration {iteration}");
            Ok(exit_codes::FAILED)
        }
        LoopStop::MaxIterationsExceeded {
            spec_id,
            task_id,
            max_iterations,
        } => {
            println!("{spec_id}/{task_id} exhausted its budget of {max_iterations} session(s)");
            Ok(exit_codes::FAILED)
        }
    }
}

fn cmd_reconcile(root: &Path) -> Result<i32> {
    let paths = ProjectPaths::new(root);
    let cfg = load_config(&paths.config_path)?;
    let report = reconcile_project(
        &paths,
        Utc::now(),
        Duration::from_secs(cfg.stall_threshold_secs),
    )?;
    println!("fixed: {}", report.fixed_count);
    for issue in &report.issues {
        println!("- {issue}");
    }
    Ok(exit_codes::OK)
}

fn cmd_engines() -> Result<i32> {
    for engine in Engine::PREFERENCE_ORDER {
        let probe = probe_engine(engine);
        if probe.available {
            if probe.version.is_empty() {
                println!("{engine}: available");
            } else {
                println!("{engine}: available ({})", probe.version);
            }
        } else {
            println!("{engine}: not found");
        }
    }
    Ok(exit_codes::OK)
}

fn build_runner(
    root: &Path,
    engine: Option<&str>,
    model: Option<&str>,
) -> Result<ProcessAgentRunner> {
    let paths = ProjectPaths::new(root);
    let cfg = load_config(&paths.config_path)?;
    let settings = load_settings(&paths.settings_path)?;
    let engine = resolve_engine(engine, &cfg, &settings, EnginePurpose::Build);
    let model = resolve_model(model, &cfg, &settings, EnginePurpose::Build);
    Ok(ProcessAgentRunner::new(engine, model))
}

/// Print normalized events to stdout as they arrive from a session.
fn spawn_event_printer() -> (thread::JoinHandle<()>, mpsc::Sender<AgentEvent>) {
    let (tx, rx) = mpsc::channel::<AgentEvent>();
    let handle = thread::spawn(move || {
        for event in rx {
            render_event(&event);
        }
    });
    (handle, tx)
}

fn render_event(event: &AgentEvent) {
    match event {
        AgentEvent::Text { content } => print!("{content}"),
        AgentEvent::Thinking { .. } => {}
        AgentEvent::ToolCall { name, detail, .. } => {
            if detail.is_empty() {
                println!("[{name}]");
            } else {
                println!("[{name}] {detail}");
            }
        }
        AgentEvent::ToolResult { content, is_error, .. } => {
            if *is_error {
                println!("[tool error] {content}");
            }
        }
        AgentEvent::Complete { reason } => match reason {
            Some(reason) => println!("\n[session ended: {reason}]"),
            None => println!("\n[session ended]"),
        },
        AgentEvent::Metadata { .. } => {}
    }
}

fn describe(success: bool, completed: bool) -> &'static str {
    match (success, completed) {
        (_, true) => "completed",
        (true, false) => "requeued",
        (false, _) => "failed",
    }
}
