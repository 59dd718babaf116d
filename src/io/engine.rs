//! Backend engine selection and availability detection.
//!
//! The set of supported backends is a closed enum so dispatch stays
//! exhaustive; adding a backend means the compiler walks you through every
//! match. Selection resolves a strict precedence chain and only falls back to
//! probing installed executables when nothing else decides.

use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, warn};

use crate::io::config::{ProjectConfig, Settings};
use crate::io::process::run_command_with_timeout;

/// Environment override consulted between the explicit argument and the
/// per-project config.
pub const ENGINE_ENV_VAR: &str = "CONDUCTOR_ENGINE";

/// Bound on each `--version` probe during auto detection.
pub const DETECT_TIMEOUT: Duration = Duration::from_secs(3);

const PROBE_OUTPUT_LIMIT: usize = 4 * 1024;

static SEMVER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"v?(\d+\.\d+\.\d+)").unwrap());

/// Supported agent backends, in no particular order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    Claude,
    Codex,
}

impl Engine {
    /// Fixed preference order for auto detection.
    pub const PREFERENCE_ORDER: [Engine; 2] = [Engine::Claude, Engine::Codex];

    pub fn as_str(self) -> &'static str {
        match self {
            Engine::Claude => "claude",
            Engine::Codex => "codex",
        }
    }

    /// Executable name on PATH.
    pub fn command_name(self) -> &'static str {
        self.as_str()
    }

    pub fn from_name(name: &str) -> Option<Engine> {
        match name.trim().to_ascii_lowercase().as_str() {
            "claude" => Some(Engine::Claude),
            "codex" => Some(Engine::Codex),
            _ => None,
        }
    }
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an engine is being selected for; settings are scoped per purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePurpose {
    /// Task execution.
    Build,
    /// Decomposition/output review.
    Review,
}

/// Result of probing one backend's availability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineProbe {
    pub engine: Engine,
    pub available: bool,
    /// Parsed semantic version, empty when unparseable. Absence of a version
    /// never fails detection.
    pub version: String,
}

/// Probe a backend by invoking its version-check command.
///
/// Executable missing or unresponsive within [`DETECT_TIMEOUT`] both report
/// as unavailable; this never returns an error.
pub fn probe_engine(engine: Engine) -> EngineProbe {
    probe_command(engine, engine.command_name())
}

fn probe_command(engine: Engine, command_name: &str) -> EngineProbe {
    let mut cmd = Command::new(command_name);
    cmd.arg("--version");
    match run_command_with_timeout(cmd, None, DETECT_TIMEOUT, PROBE_OUTPUT_LIMIT) {
        Ok(output) if !output.timed_out && output.status.success() => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            EngineProbe {
                engine,
                available: true,
                version: parse_version(&stdout),
            }
        }
        Ok(output) => {
            debug!(%engine, timed_out = output.timed_out, code = ?output.status.code(), "engine probe failed");
            unavailable(engine)
        }
        Err(err) => {
            debug!(%engine, err = %err, "engine probe could not run");
            unavailable(engine)
        }
    }
}

fn unavailable(engine: Engine) -> EngineProbe {
    EngineProbe {
        engine,
        available: false,
        version: String::new(),
    }
}

/// Extract a semantic version (with or without a leading `v`) from probe
/// output. Returns an empty string when none is found.
pub fn parse_version(output: &str) -> String {
    SEMVER_RE
        .captures(output)
        .map(|caps| caps[1].to_string())
        .unwrap_or_default()
}

/// Probe all backends in preference order and return the first available.
///
/// When none respond, the default backend is still returned (not an error) so
/// the failure surfaces later, at the point of actual use, with a clearer
/// message.
pub fn detect_engine() -> Engine {
    for engine in Engine::PREFERENCE_ORDER {
        if probe_engine(engine).available {
            debug!(%engine, "auto-detected engine");
            return engine;
        }
    }
    warn!("no engine responded to detection; defaulting to claude");
    Engine::Claude
}

/// Resolve the engine for one invocation.
///
/// Precedence: explicit caller argument > `CONDUCTOR_ENGINE` > per-project
/// config > purpose-scoped global settings > auto detection.
pub fn resolve_engine(
    explicit: Option<&str>,
    project: &ProjectConfig,
    settings: &Settings,
    purpose: EnginePurpose,
) -> Engine {
    let env = std::env::var(ENGINE_ENV_VAR).ok();
    resolve_engine_with(
        explicit,
        env.as_deref(),
        project.engine.as_deref(),
        settings,
        purpose,
        detect_engine,
    )
}

/// Precedence resolution with every input injected, for determinism in tests.
pub fn resolve_engine_with(
    explicit: Option<&str>,
    env: Option<&str>,
    project_engine: Option<&str>,
    settings: &Settings,
    purpose: EnginePurpose,
    detect: impl FnOnce() -> Engine,
) -> Engine {
    let settings_engine = match purpose {
        EnginePurpose::Build => settings.build_engine.as_deref(),
        EnginePurpose::Review => settings.review_engine.as_deref(),
    };
    for (source, name) in [
        ("argument", explicit),
        ("environment", env),
        ("project config", project_engine),
        ("settings", settings_engine),
    ] {
        let Some(name) = name else { continue };
        match Engine::from_name(name) {
            Some(engine) => {
                debug!(%engine, source, "engine resolved");
                return engine;
            }
            None => warn!(name, source, "unknown engine name, ignoring"),
        }
    }
    detect()
}

/// Resolve the model identifier: explicit argument > per-project config >
/// purpose-scoped settings. `None` lets the backend pick its own default.
pub fn resolve_model(
    explicit: Option<&str>,
    project: &ProjectConfig,
    settings: &Settings,
    purpose: EnginePurpose,
) -> Option<String> {
    let settings_model = match purpose {
        EnginePurpose::Build => settings.build_model.as_deref(),
        EnginePurpose::Review => settings.review_model.as_deref(),
    };
    explicit
        .or(project.model.as_deref())
        .or(settings_model)
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(build: Option<&str>, review: Option<&str>) -> Settings {
        Settings {
            build_engine: build.map(str::to_string),
            review_engine: review.map(str::to_string),
            ..Settings::default()
        }
    }

    #[test]
    fn parse_version_handles_leading_v_and_noise() {
        assert_eq!(parse_version("claude 1.0.24 (stable)"), "1.0.24");
        assert_eq!(parse_version("codex-cli v0.4.11"), "0.4.11");
        assert_eq!(parse_version("no version here"), "");
    }

    #[test]
    fn explicit_argument_wins_over_everything() {
        let engine = resolve_engine_with(
            Some("codex"),
            Some("claude"),
            Some("claude"),
            &settings(Some("claude"), None),
            EnginePurpose::Build,
            || panic!("detection must not run"),
        );
        assert_eq!(engine, Engine::Codex);
    }

    #[test]
    fn env_beats_project_config() {
        let engine = resolve_engine_with(
            None,
            Some("codex"),
            Some("claude"),
            &Settings::default(),
            EnginePurpose::Build,
            || panic!("detection must not run"),
        );
        assert_eq!(engine, Engine::Codex);
    }

    #[test]
    fn settings_are_purpose_scoped() {
        let settings = settings(Some("claude"), Some("codex"));
        let build = resolve_engine_with(None, None, None, &settings, EnginePurpose::Build, || {
            panic!("detection must not run")
        });
        let review =
            resolve_engine_with(None, None, None, &settings, EnginePurpose::Review, || {
                panic!("detection must not run")
            });
        assert_eq!(build, Engine::Claude);
        assert_eq!(review, Engine::Codex);
    }

    #[test]
    fn unknown_names_fall_through_to_detection() {
        let engine = resolve_engine_with(
            Some("gpt-magic"),
            None,
            None,
            &Settings::default(),
            EnginePurpose::Build,
            || Engine::Codex,
        );
        assert_eq!(engine, Engine::Codex);
    }

    #[test]
    fn probe_reports_missing_executable_as_unavailable() {
        let probe = probe_command(Engine::Claude, "definitely-not-a-real-backend-xyz");
        assert!(!probe.available);
        assert_eq!(probe.version, "");
    }

    #[test]
    fn model_resolution_prefers_explicit() {
        let project = ProjectConfig {
            model: Some("project-model".to_string()),
            ..ProjectConfig::default()
        };
        let model = resolve_model(Some("cli-model"), &project, &Settings::default(), EnginePurpose::Build);
        assert_eq!(model.as_deref(), Some("cli-model"));
        let model = resolve_model(None, &project, &Settings::default(), EnginePurpose::Build);
        assert_eq!(model.as_deref(), Some("project-model"));
    }
}
