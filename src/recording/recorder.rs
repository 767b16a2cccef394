//! Recording session lifecycle: launch the recorder, wait for it, extract.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};

use crate::clock::{Clock, SystemClock};
use crate::config::{CommandLine, Config};
use crate::error::{Error, Result};
use crate::process::{CommandSpec, ProcessRunner, RunningProcess, SystemProcessRunner};
use crate::store::{FsProjectStore, ProjectStore};

use super::extract::extract_with_clock;
use super::types::{Step, TestCase};

struct ActiveRecording {
    project_id: String,
    test_case_id: String,
    script_path: PathBuf,
    /// Modification time of a script left by an earlier recording
    previous_script: Option<SystemTime>,
    process: Box<dyn RunningProcess>,
    started_at: DateTime<Utc>,
}

/// At most one recording at a time.
///
/// [`start`](Self::start) launches the recorder pointed at a URL; the user
/// interacts with the browser and closes it; [`stop`](Self::stop) waits for
/// the recorder to exit, extracts the steps and persists the test case.
pub struct RecordingSession {
    store: Arc<dyn ProjectStore>,
    runner: Arc<dyn ProcessRunner>,
    clock: Arc<dyn Clock>,
    recorder: CommandLine,
    wait_limit: Option<Duration>,
    active: Option<ActiveRecording>,
}

impl RecordingSession {
    pub fn new(store: Arc<dyn ProjectStore>, runner: Arc<dyn ProcessRunner>) -> Self {
        let defaults = Config::defaults();
        Self {
            store,
            runner,
            clock: Arc::new(SystemClock),
            recorder: defaults.recorder,
            wait_limit: defaults.recording_timeout,
            active: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(FsProjectStore::new(&config.projects_dir, config.script_ext.clone())),
            Arc::new(SystemProcessRunner),
        )
        .recorder(config.recorder.clone())
        .wait_limit(config.recording_timeout)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Recorder command; `-o <script> <url>` is appended on start
    pub fn recorder(mut self, recorder: CommandLine) -> Self {
        self.recorder = recorder;
        self
    }

    /// How long `stop` waits for the recorder before terminating it
    pub fn wait_limit(mut self, limit: Option<Duration>) -> Self {
        self.wait_limit = limit;
        self
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    /// Launch the recorder for `url`, writing to the test case's script path
    pub fn start(&mut self, url: &str, project_id: &str, test_case_id: &str) -> Result<()> {
        if let Some(active) = &self.active {
            tracing::warn!(
                "Recording {}/{} already in progress",
                active.project_id,
                active.test_case_id
            );
            return Err(Error::already_exists(
                "recording",
                format!("{}/{}", active.project_id, active.test_case_id),
            ));
        }

        self.store.ensure_results_dir(project_id)?;
        let script_path = self.store.script_path(project_id, test_case_id)?;
        let previous_script = modified(&script_path);

        let command = CommandSpec::from_command_line(&self.recorder)
            .arg("-o")
            .arg(script_path.to_string_lossy().into_owned())
            .arg(url);
        let process = self.runner.spawn(&command).map_err(|e| {
            Error::ExternalProcessFailure(format!("cannot launch `{}`: {}", command.display(), e))
        })?;

        tracing::info!(
            pid = process.id(),
            "Recording {}/{} from {}",
            project_id,
            test_case_id,
            url
        );
        self.active = Some(ActiveRecording {
            project_id: project_id.to_string(),
            test_case_id: test_case_id.to_string(),
            script_path,
            previous_script,
            process,
            started_at: self.clock.now(),
        });
        Ok(())
    }

    /// Finish the recording and return the extracted steps.
    ///
    /// Never fails: a missing or unreadable script, or no recording in
    /// progress, yields an empty list. The session is idle afterwards.
    pub fn stop(&mut self) -> Vec<Step> {
        let Some(mut active) = self.active.take() else {
            tracing::warn!("No recording in progress");
            return Vec::new();
        };

        match self.finish(&mut active) {
            Ok(steps) => steps,
            Err(e) => {
                tracing::error!(
                    "Recording {}/{} failed: {}",
                    active.project_id,
                    active.test_case_id,
                    e
                );
                Vec::new()
            }
        }
    }

    fn finish(&self, active: &mut ActiveRecording) -> Result<Vec<Step>> {
        let output = active.process.wait(self.wait_limit)?;
        if output.timed_out {
            tracing::warn!("Recorder did not exit in time and was terminated");
        } else if !output.success() {
            tracing::warn!(exit_code = ?output.exit_code, "Recorder exited abnormally: {}", output.stderr.trim());
        }

        if !active.script_path.is_file() {
            tracing::warn!("Recorder wrote no script at {}", active.script_path.display());
            return Ok(Vec::new());
        }
        if active.previous_script.is_some() && modified(&active.script_path) == active.previous_script {
            tracing::warn!(
                "Recorder left {} unchanged, keeping the earlier recording",
                active.script_path.display()
            );
            return Ok(Vec::new());
        }

        let raw_script = fs::read_to_string(&active.script_path)?;
        let steps = extract_with_clock(&raw_script, self.clock.as_ref());
        let elapsed = self.clock.now() - active.started_at;
        tracing::info!(
            "Extracted {} steps from {}/{} after {}s",
            steps.len(),
            active.project_id,
            active.test_case_id,
            elapsed.num_seconds()
        );

        let test_case = TestCase {
            project_id: active.project_id.clone(),
            test_case_id: active.test_case_id.clone(),
            steps: steps.clone(),
            recorded_at: self.clock.now(),
            raw_script,
        };
        if let Err(e) = self.store.save_test_case(&test_case) {
            tracing::error!("Failed to save test case: {}", e);
        }
        Ok(steps)
    }
}

fn modified(path: &std::path::Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}
