//! Execution of recorded test cases.
//!
//! The orchestrator runs a test case's raw script as an isolated child
//! process inside an [`ExecutionSession`], captures what it printed, and turns
//! a non-zero exit into a classified [`ExecutionResult`]. Runs never surface
//! as errors: a missing script, a launch failure, a timeout or a panic in a
//! collaborator all become failure results.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::clock::{Clock, SystemClock};
use crate::config::{CommandLine, Config};
use crate::diagnosis::{self, FailureCategory, FailureDiagnosis};
use crate::error::{Error, Result};
use crate::process::{CommandSpec, ProcessRunner, SystemProcessRunner};
use crate::runner::{ExecutionResult, ProjectRunSummary};
use crate::session::{ExecutionSession, SessionProvider, WorkspaceSessionProvider};
use crate::store::{FsProjectStore, ProjectStore};

/// Lifecycle of the orchestrator's session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    SessionStarting,
    SessionReady,
    Running,
    SessionClosing,
}

/// Runs test cases, one at a time, against at most one open session
pub struct ExecutionOrchestrator {
    store: Arc<dyn ProjectStore>,
    runner: Arc<dyn ProcessRunner>,
    sessions: Arc<dyn SessionProvider>,
    clock: Arc<dyn Clock>,
    interpreter: CommandLine,
    timeout: Option<Duration>,
    session: Option<ExecutionSession>,
    state: OrchestratorState,
}

impl ExecutionOrchestrator {
    pub fn new(
        store: Arc<dyn ProjectStore>,
        runner: Arc<dyn ProcessRunner>,
        sessions: Arc<dyn SessionProvider>,
    ) -> Self {
        let defaults = Config::defaults();
        Self {
            store,
            runner,
            sessions,
            clock: Arc::new(SystemClock),
            interpreter: defaults.runner,
            timeout: defaults.execution_timeout,
            session: None,
            state: OrchestratorState::Idle,
        }
    }

    /// Filesystem store, system processes and workspace sessions, as configured
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Arc::new(FsProjectStore::new(&config.projects_dir, config.script_ext.clone())),
            Arc::new(SystemProcessRunner),
            Arc::new(WorkspaceSessionProvider::new(&config.session_dir)),
        )
        .interpreter(config.runner.clone())
        .timeout(config.execution_timeout)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Program (plus leading args) the script path is passed to
    pub fn interpreter(mut self, interpreter: CommandLine) -> Self {
        self.interpreter = interpreter;
        self
    }

    /// Time limit for a single test case, None for no limit
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Open the execution session. Returns false if it could not be opened.
    ///
    /// Every successful start must be paired with [`close_session`](Self::close_session).
    /// Starting while a session is already open keeps the existing one.
    pub fn start_session(&mut self) -> bool {
        if self.session.is_some() {
            tracing::warn!("Session already open, reusing it");
            return true;
        }

        self.state = OrchestratorState::SessionStarting;
        match self.sessions.open() {
            Ok(session) => {
                self.session = Some(session);
                self.state = OrchestratorState::SessionReady;
                true
            }
            Err(e) => {
                tracing::error!("Failed to start session: {}", e);
                self.state = OrchestratorState::Idle;
                false
            }
        }
    }

    /// Release the execution session. Closing with nothing open is a no-op.
    pub fn close_session(&mut self) -> bool {
        let Some(session) = self.session.take() else {
            tracing::debug!("No session to close");
            return true;
        };

        self.state = OrchestratorState::SessionClosing;
        let closed = match self.sessions.close(session) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to close session: {}", e);
                false
            }
        };
        self.state = OrchestratorState::Idle;
        closed
    }

    /// Run one test case and append the result to the project's history.
    ///
    /// Uses the open session, or a session opened and closed just for this run.
    pub fn execute_test_case(&mut self, project_id: &str, test_case_id: &str) -> ExecutionResult {
        let transient = self.session.is_none();
        if transient && !self.start_session() {
            let result = self.session_unavailable(project_id, test_case_id);
            self.record(&result);
            return result;
        }

        let result = self.run_current(project_id, test_case_id);
        self.record(&result);

        if transient {
            self.close_session();
        }
        result
    }

    /// Run every test case of a project in listing order inside a single session.
    ///
    /// A failing case does not stop the batch. Errors only when the project
    /// cannot be found or listed, or when no session can be opened.
    pub fn execute_project(&mut self, project_id: &str) -> Result<ProjectRunSummary> {
        self.store.get_project(project_id)?;
        let cases = self.store.list_test_cases(project_id)?;
        if cases.is_empty() {
            tracing::info!("Project {} has no test cases", project_id);
            return Ok(ProjectRunSummary::from_results(project_id, Vec::new()));
        }

        let owns_session = self.session.is_none();
        if owns_session && !self.start_session() {
            return Err(Error::ResourceLifecycle("could not start an execution session".to_string()));
        }

        tracing::info!("Running {} test cases in project {}", cases.len(), project_id);
        let mut results = Vec::with_capacity(cases.len());
        for case in &cases {
            let result = self.run_current(project_id, &case.test_case_id);
            self.record(&result);
            results.push(result);
        }

        if owns_session {
            self.close_session();
        }

        let summary = ProjectRunSummary::from_results(project_id, results);
        tracing::info!(
            "Project {} finished: {} passed, {} failed",
            project_id,
            summary.success_count,
            summary.failed_count
        );
        Ok(summary)
    }

    /// Run one test case inside a caller-held session. Does not record history.
    pub fn run_in_session(
        &self,
        session: &ExecutionSession,
        project_id: &str,
        test_case_id: &str,
    ) -> ExecutionResult {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.launch(session, project_id, test_case_id)
        }));

        outcome.unwrap_or_else(|payload| {
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!("Test case {}/{} panicked: {}", project_id, test_case_id, detail);
            ExecutionResult::failure(
                project_id,
                test_case_id,
                format!("Unexpected error: {}", detail),
                FailureDiagnosis::for_category(FailureCategory::UnknownError),
                self.clock.now(),
            )
        })
    }

    /// Run against the orchestrator's own session
    fn run_current(&mut self, project_id: &str, test_case_id: &str) -> ExecutionResult {
        self.state = OrchestratorState::Running;
        let result = match self.session.as_ref() {
            Some(session) => self.run_in_session(session, project_id, test_case_id),
            None => self.session_unavailable(project_id, test_case_id),
        };
        self.state = OrchestratorState::SessionReady;
        result
    }

    fn launch(&self, session: &ExecutionSession, project_id: &str, test_case_id: &str) -> ExecutionResult {
        let executed_at = self.clock.now();

        let script = match self.store.script_path(project_id, test_case_id) {
            Ok(path) if path.is_file() => path,
            Ok(path) => {
                tracing::warn!("Script not found: {}", path.display());
                return ExecutionResult::failure(
                    project_id,
                    test_case_id,
                    format!("Script not found: {}", path.display()),
                    FailureDiagnosis::for_category(FailureCategory::ScriptNotFound),
                    executed_at,
                );
            }
            Err(e) => {
                return ExecutionResult::failure(
                    project_id,
                    test_case_id,
                    e.to_string(),
                    FailureDiagnosis::for_category(FailureCategory::ScriptNotFound),
                    executed_at,
                );
            }
        };

        let artifacts = session.artifact_dir(test_case_id);
        if let Err(e) = std::fs::create_dir_all(&artifacts) {
            tracing::warn!("Cannot create {}: {}", artifacts.display(), e);
        }

        let mut command = CommandSpec::from_command_line(&self.interpreter)
            .arg(script.to_string_lossy().into_owned());
        for (key, value) in session.env_for(test_case_id) {
            command = command.env(key, value);
        }

        tracing::info!("Executing test case {}/{}", project_id, test_case_id);
        let started = Instant::now();
        let output = self.runner.run(&command, self.timeout);
        let duration_ms = started.elapsed().as_millis() as u64;

        let result = match output {
            Err(e) => ExecutionResult::failure(
                project_id,
                test_case_id,
                format!("Failed to launch `{}`: {}", command.display(), e),
                FailureDiagnosis::for_category(FailureCategory::ProcessLaunchFailed),
                executed_at,
            ),
            Ok(out) if out.timed_out => ExecutionResult::failure(
                project_id,
                test_case_id,
                format!("Execution exceeded {:?}\n{}", self.timeout.unwrap_or_default(), out.stderr)
                    .trim_end()
                    .to_string(),
                FailureDiagnosis::for_category(FailureCategory::ExecutionTimedOut),
                executed_at,
            )
            .with_output(out.stdout),
            Ok(out) if out.success() => {
                ExecutionResult::success(project_id, test_case_id, out.stdout, executed_at)
            }
            Ok(out) => {
                let error_text = if out.stderr.trim().is_empty() {
                    match out.exit_code {
                        Some(code) => format!("Test case execution failed (exit code {})", code),
                        None => "Test case execution failed".to_string(),
                    }
                } else {
                    out.stderr
                };
                let diagnosis = diagnosis::classify(&error_text);
                ExecutionResult::failure(project_id, test_case_id, error_text, diagnosis, executed_at)
                    .with_output(out.stdout)
                    .with_exit_code(out.exit_code)
            }
        }
        .with_duration_ms(duration_ms);

        match &result.diagnosis {
            None => tracing::info!("Test case {}/{} passed in {} ms", project_id, test_case_id, duration_ms),
            Some(d) => tracing::warn!(
                category = ?d.category,
                "Test case {}/{} failed in {} ms",
                project_id,
                test_case_id,
                duration_ms
            ),
        }
        result
    }

    fn session_unavailable(&self, project_id: &str, test_case_id: &str) -> ExecutionResult {
        ExecutionResult::failure(
            project_id,
            test_case_id,
            "No execution session available",
            FailureDiagnosis::for_category(FailureCategory::SessionUnavailable),
            self.clock.now(),
        )
    }

    fn record(&self, result: &ExecutionResult) {
        match self.store.append_result(result) {
            Ok(_) => {}
            Err(e) if e.is_not_found() => tracing::warn!(
                "Result for {}/{} not recorded: {}",
                result.project_id,
                result.test_case_id,
                e
            ),
            Err(e) => tracing::error!(
                "Failed to record result for {}/{}: {}",
                result.project_id,
                result.test_case_id,
                e
            ),
        }
    }
}

impl Drop for ExecutionOrchestrator {
    fn drop(&mut self) {
        if self.session.is_some() {
            tracing::warn!("Orchestrator dropped with an open session, closing it");
            self.close_session();
        }
    }
}
