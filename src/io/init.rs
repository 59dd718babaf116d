//! Initialization helpers for `.conductor/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use crate::io::config::{ProjectConfig, write_config};
use crate::io::queue_store::initialize_queue;
use crate::io::status::{ProjectStatus, write_status};

/// All canonical paths within `.conductor/` for a project root.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    pub root: PathBuf,
    pub conductor_dir: PathBuf,
    pub state_dir: PathBuf,
    pub sessions_dir: PathBuf,
    pub specs_dir: PathBuf,
    pub queue_path: PathBuf,
    pub config_path: PathBuf,
    pub settings_path: PathBuf,
    pub status_path: PathBuf,
    pub gitignore_path: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let conductor_dir = root.join(".conductor");
        let state_dir = conductor_dir.join("state");
        let sessions_dir = conductor_dir.join("sessions");
        Self {
            specs_dir: root.join("specs"),
            root,
            queue_path: state_dir.join("queue.json"),
            config_path: state_dir.join("config.toml"),
            settings_path: state_dir.join("settings.toml"),
            status_path: state_dir.join("status.json"),
            gitignore_path: conductor_dir.join(".gitignore"),
            conductor_dir,
            state_dir,
            sessions_dir,
        }
    }

    /// Authoritative completion record for one spec (read-only to us).
    pub fn spec_record_path(&self, spec_id: &str) -> PathBuf {
        self.specs_dir.join(spec_id).join("tasks.json")
    }

    /// Log directory for one task's sessions.
    pub fn session_dir(&self, spec_id: &str, task_id: &str) -> PathBuf {
        self.sessions_dir.join(spec_id).join(task_id)
    }
}

/// Options for `init_project`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing conductor-owned files.
    pub force: bool,
}

/// Create `.conductor/` scaffolding in `root`.
///
/// Fails if `.conductor/` already exists unless `options.force` is set. The
/// queue file is never overwritten, even with force: it is the audit trail.
pub fn init_project(root: &Path, options: &InitOptions) -> Result<ProjectPaths> {
    let paths = ProjectPaths::new(root);
    if paths.conductor_dir.exists() && !options.force {
        return Err(anyhow!(
            "conductor init: .conductor already exists (use --force to overwrite)"
        ));
    }
    if paths.conductor_dir.exists() && !paths.conductor_dir.is_dir() {
        return Err(anyhow!(
            "conductor init: .conductor exists but is not a directory"
        ));
    }

    create_dir(&paths.conductor_dir)?;
    create_dir(&paths.state_dir)?;
    create_dir(&paths.sessions_dir)?;
    create_dir(&paths.specs_dir)?;

    fs::write(&paths.gitignore_path, CONDUCTOR_GITIGNORE)
        .with_context(|| format!("write {}", paths.gitignore_path.display()))?;
    write_config(&paths.config_path, &ProjectConfig::default())?;
    write_status(&paths.status_path, &ProjectStatus::idle())?;
    initialize_queue(&paths.queue_path)?;

    Ok(paths)
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

const CONDUCTOR_GITIGNORE: &str = "sessions/\n";
