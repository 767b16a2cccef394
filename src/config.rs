//! Configuration management with environment variable support.
//!
//! All knobs have a default and can be overridden from the environment:
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `WEB_REPLAY_PROJECTS_DIR` | Root of the project tree | `projects` |
//! | `WEB_REPLAY_SESSION_DIR` | Base directory for execution sessions | `<tmp>/web-replay` |
//! | `WEB_REPLAY_RUNNER` | Interpreter used to run recorded scripts | `python3` |
//! | `WEB_REPLAY_RECORDER` | Recorder command line | `playwright codegen --target python -b chromium` |
//! | `WEB_REPLAY_SCRIPT_EXT` | Extension of recorded script files | `py` |
//! | `WEB_REPLAY_EXEC_TIMEOUT` | Per test case time limit in seconds (0 = none) | `300` |
//! | `WEB_REPLAY_RECORD_TIMEOUT` | Recorder wait limit in seconds (0 = none) | `0` |
//!
//! Command lines are split on whitespace; the first word is the program.
//!
//! # Example
//!
//! ```bash
//! export WEB_REPLAY_PROJECTS_DIR="$HOME/replay-projects"
//! export WEB_REPLAY_RUNNER="uv run python"
//! export WEB_REPLAY_EXEC_TIMEOUT=60
//! ```

use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use crate::error::{Error, Result};

// ============================================================================
// Default Values
// ============================================================================

/// Default project tree root (relative to the working directory)
pub const DEFAULT_PROJECTS_DIR: &str = "projects";

/// Default directory name for sessions under the system temp dir
pub const DEFAULT_SESSION_DIR_NAME: &str = "web-replay";

/// Default interpreter for recorded scripts
pub const DEFAULT_RUNNER: &str = "python3";

/// Default recorder command line; `-o <script> <url>` is appended per recording
pub const DEFAULT_RECORDER: &str = "playwright codegen --target python -b chromium";

/// Default extension of recorded script files
pub const DEFAULT_SCRIPT_EXT: &str = "py";

/// Default execution timeout (seconds)
pub const DEFAULT_EXEC_TIMEOUT: u64 = 300;

/// Default recording timeout (seconds, 0 = wait for the recorder to exit)
pub const DEFAULT_RECORD_TIMEOUT: u64 = 0;

// ============================================================================
// Environment Variable Names
// ============================================================================

pub const ENV_PROJECTS_DIR: &str = "WEB_REPLAY_PROJECTS_DIR";
pub const ENV_SESSION_DIR: &str = "WEB_REPLAY_SESSION_DIR";
pub const ENV_RUNNER: &str = "WEB_REPLAY_RUNNER";
pub const ENV_RECORDER: &str = "WEB_REPLAY_RECORDER";
pub const ENV_SCRIPT_EXT: &str = "WEB_REPLAY_SCRIPT_EXT";
pub const ENV_EXEC_TIMEOUT: &str = "WEB_REPLAY_EXEC_TIMEOUT";
pub const ENV_RECORD_TIMEOUT: &str = "WEB_REPLAY_RECORD_TIMEOUT";

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Get the global configuration (initialized from environment on first access)
pub fn get() -> &'static Config {
    CONFIG.get_or_init(Config::from_env)
}

/// A program plus its leading arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    /// Split a command line on whitespace. Fails on an empty string.
    pub fn parse(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace().map(str::to_string);
        let program = words
            .next()
            .ok_or_else(|| Error::InvalidConfig("empty command line".to_string()))?;
        Ok(Self {
            program,
            args: words.collect(),
        })
    }
}

/// Centralized configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the persisted project tree
    pub projects_dir: PathBuf,
    /// Base directory for execution session scratch space
    pub session_dir: PathBuf,
    /// Interpreter that executes recorded scripts
    pub runner: CommandLine,
    /// Recorder launched for a recording session
    pub recorder: CommandLine,
    /// Extension of raw script files (without the dot)
    pub script_ext: String,
    /// Upper bound on a single test case run
    pub execution_timeout: Option<Duration>,
    /// Upper bound on waiting for the recorder to exit
    pub recording_timeout: Option<Duration>,
}

impl Config {
    /// Create configuration from environment variables, falling back to defaults.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        let defaults = Self::defaults();

        let command = |var: &str, fallback: CommandLine| match env::var(var) {
            Ok(raw) => CommandLine::parse(&raw).unwrap_or_else(|e| {
                tracing::warn!("Ignoring {}: {}", var, e);
                fallback
            }),
            Err(_) => fallback,
        };

        Self {
            projects_dir: env::var(ENV_PROJECTS_DIR)
                .map(PathBuf::from)
                .unwrap_or(defaults.projects_dir),
            session_dir: env::var(ENV_SESSION_DIR)
                .map(PathBuf::from)
                .unwrap_or(defaults.session_dir),
            runner: command(ENV_RUNNER, defaults.runner),
            recorder: command(ENV_RECORDER, defaults.recorder),
            script_ext: env::var(ENV_SCRIPT_EXT)
                .map(|s| s.trim_start_matches('.').to_string())
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.script_ext),
            execution_timeout: timeout_from_env(ENV_EXEC_TIMEOUT, DEFAULT_EXEC_TIMEOUT),
            recording_timeout: timeout_from_env(ENV_RECORD_TIMEOUT, DEFAULT_RECORD_TIMEOUT),
        }
    }

    /// Create configuration with all defaults (ignoring environment)
    pub fn defaults() -> Self {
        Self {
            projects_dir: PathBuf::from(DEFAULT_PROJECTS_DIR),
            session_dir: env::temp_dir().join(DEFAULT_SESSION_DIR_NAME),
            runner: CommandLine {
                program: DEFAULT_RUNNER.to_string(),
                args: Vec::new(),
            },
            recorder: CommandLine {
                program: "playwright".to_string(),
                args: ["codegen", "--target", "python", "-b", "chromium"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            },
            script_ext: DEFAULT_SCRIPT_EXT.to_string(),
            execution_timeout: seconds(DEFAULT_EXEC_TIMEOUT),
            recording_timeout: seconds(DEFAULT_RECORD_TIMEOUT),
        }
    }

    pub fn projects_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.projects_dir = dir.into();
        self
    }

    pub fn session_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.session_dir = dir.into();
        self
    }

    pub fn runner(mut self, runner: CommandLine) -> Self {
        self.runner = runner;
        self
    }

    pub fn recorder(mut self, recorder: CommandLine) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn script_ext(mut self, ext: impl Into<String>) -> Self {
        self.script_ext = ext.into();
        self
    }

    pub fn execution_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.execution_timeout = timeout;
        self
    }

    pub fn recording_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.recording_timeout = timeout;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Zero means "no limit"
fn seconds(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn timeout_from_env(var: &str, default: u64) -> Option<Duration> {
    let secs = env::var(var)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default);
    seconds(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_parse() {
        let cmd = CommandLine::parse("uv  run python").unwrap();
        assert_eq!(cmd.program, "uv");
        assert_eq!(cmd.args, vec!["run", "python"]);
    }

    #[test]
    fn test_command_line_parse_empty() {
        assert!(CommandLine::parse("   ").is_err());
    }

    #[test]
    fn test_default_recorder_matches_constant() {
        let parsed = CommandLine::parse(DEFAULT_RECORDER).unwrap();
        assert_eq!(Config::defaults().recorder, parsed);
    }

    #[test]
    fn test_seconds_zero_is_unbounded() {
        assert_eq!(seconds(0), None);
        assert_eq!(seconds(5), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::defaults();
        assert_eq!(config.projects_dir, PathBuf::from(DEFAULT_PROJECTS_DIR));
        assert_eq!(config.runner.program, DEFAULT_RUNNER);
        assert_eq!(config.script_ext, DEFAULT_SCRIPT_EXT);
        assert_eq!(config.execution_timeout, Some(Duration::from_secs(300)));
        assert_eq!(config.recording_timeout, None);
    }

    #[test]
    fn test_builder_overrides() {
        let config = Config::defaults()
            .projects_dir("/tmp/p")
            .script_ext("sh")
            .execution_timeout(None);
        assert_eq!(config.projects_dir, PathBuf::from("/tmp/p"));
        assert_eq!(config.script_ext, "sh");
        assert_eq!(config.execution_timeout, None);
    }
}
