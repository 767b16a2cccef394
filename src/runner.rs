//! Types for test run results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::diagnosis::FailureDiagnosis;

/// Outcome of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Failure,
}

/// Result of running a single test case.
///
/// Built through [`ExecutionResult::success`] or [`ExecutionResult::failure`] so
/// that a diagnosis is present exactly when the run failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub project_id: String,
    pub test_case_id: String,

    pub status: ExecutionStatus,

    /// Captured standard output of the script
    pub output: String,

    /// Short summary on success, raw error text on failure
    pub message: String,

    /// Classified failure (None on success)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<FailureDiagnosis>,

    /// Exit code of the script process, if one ran to completion
    #[serde(default)]
    pub exit_code: Option<i32>,

    /// Wall time spent running the script
    #[serde(default)]
    pub duration_ms: u64,

    pub executed_at: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn success(
        project_id: &str,
        test_case_id: &str,
        output: String,
        executed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            project_id: project_id.to_string(),
            test_case_id: test_case_id.to_string(),
            status: ExecutionStatus::Success,
            output,
            message: "Test case passed".to_string(),
            diagnosis: None,
            exit_code: Some(0),
            duration_ms: 0,
            executed_at,
        }
    }

    pub fn failure(
        project_id: &str,
        test_case_id: &str,
        message: impl Into<String>,
        diagnosis: FailureDiagnosis,
        executed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            project_id: project_id.to_string(),
            test_case_id: test_case_id.to_string(),
            status: ExecutionStatus::Failure,
            output: String::new(),
            message: message.into(),
            diagnosis: Some(diagnosis),
            exit_code: None,
            duration_ms: 0,
            executed_at,
        }
    }

    pub fn with_output(mut self, output: String) -> Self {
        self.output = output;
        self
    }

    pub fn with_exit_code(mut self, exit_code: Option<i32>) -> Self {
        self.exit_code = exit_code;
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

/// Aggregate of running every test case in a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRunSummary {
    pub project_id: String,
    pub total: usize,
    pub success_count: usize,
    pub failed_count: usize,
    /// One entry per test case, in listing order
    pub results: Vec<ExecutionResult>,
}

impl ProjectRunSummary {
    pub fn from_results(project_id: &str, results: Vec<ExecutionResult>) -> Self {
        let success_count = results.iter().filter(|r| r.is_success()).count();
        Self {
            project_id: project_id.to_string(),
            total: results.len(),
            success_count,
            failed_count: results.len() - success_count,
            results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnosis::{FailureCategory, FailureDiagnosis};

    #[test]
    fn test_success_has_no_diagnosis() {
        let result = ExecutionResult::success("p", "t", "ok\n".to_string(), Utc::now());
        assert!(result.is_success());
        assert!(result.diagnosis.is_none());

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "success");
        assert!(json.get("diagnosis").is_none());
    }

    #[test]
    fn test_failure_carries_diagnosis() {
        let diagnosis = FailureDiagnosis::for_category(FailureCategory::NetworkError);
        let result = ExecutionResult::failure("p", "t", "net::ERR", diagnosis, Utc::now())
            .with_exit_code(Some(1));
        assert!(!result.is_success());
        assert_eq!(
            result.diagnosis.as_ref().map(|d| d.category),
            Some(FailureCategory::NetworkError)
        );
        assert_eq!(result.exit_code, Some(1));
    }

    #[test]
    fn test_summary_counts() {
        let now = Utc::now();
        let results = vec![
            ExecutionResult::success("p", "a", String::new(), now),
            ExecutionResult::failure(
                "p",
                "b",
                "boom",
                FailureDiagnosis::for_category(FailureCategory::UnknownError),
                now,
            ),
            ExecutionResult::success("p", "c", String::new(), now),
        ];
        let summary = ProjectRunSummary::from_results("p", results);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.success_count, 2);
        assert_eq!(summary.failed_count, 1);
    }
}
