//! Web Replay - record browser sessions as test cases, replay them, diagnose failures.
//!
//! This crate provides:
//! - Recording sessions that drive an external recorder and extract steps
//! - Heuristic step extraction from recorded automation scripts
//! - Isolated execution of recorded scripts inside an execution session
//! - Rule-based classification of failures with remediation hints
//! - A filesystem store for projects, test cases and run history
//!
//! # Example
//!
//! ```rust,no_run
//! use web_replay::{Config, ExecutionOrchestrator};
//!
//! let config = Config::from_env();
//! let mut orchestrator = ExecutionOrchestrator::from_config(&config);
//! let summary = orchestrator.execute_project("shop").unwrap();
//! println!("{} of {} passed", summary.success_count, summary.total);
//! ```

pub mod clock;
pub mod config;
pub mod diagnosis;
pub mod error;
pub mod orchestrator;
pub mod process;
pub mod recording;
pub mod runner;
pub mod session;
pub mod store;

// Re-export configuration and errors
pub use config::{CommandLine, Config};
pub use error::{Error, Result};

// Re-export recording types
pub use recording::{RecordingSession, Step, StepAction, StepKind, TestCase, extract};

// Re-export execution types
pub use orchestrator::{ExecutionOrchestrator, OrchestratorState};
pub use runner::{ExecutionResult, ExecutionStatus, ProjectRunSummary};
pub use session::{ExecutionSession, SessionProvider, WorkspaceSessionProvider};

// Re-export classification
pub use diagnosis::{FailureCategory, FailureDiagnosis, classify};

// Re-export storage and process seams
pub use clock::{Clock, SystemClock};
pub use process::{CommandSpec, ProcessOutput, ProcessRunner, RunningProcess, SystemProcessRunner};
pub use store::{FsProjectStore, ProjectInfo, ProjectStore, TestCaseSummary};
