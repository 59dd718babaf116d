//! Project configuration stored under `.conductor/state/config.toml`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Per-project configuration (TOML).
///
/// This file is intended to be edited by humans and must remain stable and
/// automatable. Missing fields default to sensible values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProjectConfig {
    /// Backend engine override for this project (`claude` or `codex`).
    pub engine: Option<String>,

    /// Model identifier passed through to the backend.
    pub model: Option<String>,

    /// Terminal marker the agent must emit at the very end of its output to
    /// declare a task done.
    pub completion_marker: String,

    /// Per-session wall-clock budget in seconds.
    pub session_timeout_secs: u64,

    /// Truncate in-memory output collection beyond this many bytes. The raw
    /// transcript file is never truncated.
    pub output_limit_bytes: usize,

    /// A running task older than this is presumed crashed and re-queued.
    pub stall_threshold_secs: u64,

    /// Stop `conductor run` after this many sessions.
    pub max_iterations: u32,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            engine: None,
            model: None,
            completion_marker: "TASK COMPLETE".to_string(),
            session_timeout_secs: 30 * 60,
            output_limit_bytes: 1_000_000,
            stall_threshold_secs: 2 * 60 * 60,
            max_iterations: 50,
        }
    }
}

impl ProjectConfig {
    pub fn validate(&self) -> Result<()> {
        if self.completion_marker.trim().is_empty() {
            return Err(anyhow!("completion_marker must be non-empty"));
        }
        if self.session_timeout_secs == 0 {
            return Err(anyhow!("session_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.stall_threshold_secs == 0 {
            return Err(anyhow!("stall_threshold_secs must be > 0"));
        }
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file. A missing file yields the defaults.
pub fn load_config(path: &Path) -> Result<ProjectConfig> {
    if !path.exists() {
        let cfg = ProjectConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ProjectConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ProjectConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Purpose-scoped global settings, below per-project config in precedence.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub build_engine: Option<String>,
    pub review_engine: Option<String>,
    pub build_model: Option<String>,
    pub review_model: Option<String>,
}

/// Load global settings. A missing file yields the defaults.
pub fn load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let settings: Settings =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    Ok(settings)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
