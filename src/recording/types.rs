use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::lenient_timestamp;

/// Kind of a recorded browser action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Navigate,
    Click,
    Fill,
    Unknown,
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StepKind::Navigate => "navigate",
            StepKind::Click => "click",
            StepKind::Fill => "fill",
            StepKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// The action a step performs, carrying exactly the fields its kind needs.
///
/// Serialized with a `type` tag: `{"type": "fill", "selector": "...", "value": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StepAction {
    /// Load a page
    #[serde(alias = "goto")]
    Navigate { url: String },

    /// Click the element matched by an opaque locator expression
    Click { selector: String },

    /// Type `value` into the element matched by `selector`
    Fill { selector: String, value: String },

    /// A step type this version does not understand
    #[serde(other)]
    Unknown,
}

/// One recorded browser action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    #[serde(flatten)]
    pub action: StepAction,

    /// When the step was extracted
    #[serde(alias = "timestamp", deserialize_with = "lenient_timestamp")]
    pub recorded_at: DateTime<Utc>,
}

impl Step {
    pub fn new(action: StepAction, recorded_at: DateTime<Utc>) -> Self {
        Self { action, recorded_at }
    }

    pub fn kind(&self) -> StepKind {
        match self.action {
            StepAction::Navigate { .. } => StepKind::Navigate,
            StepAction::Click { .. } => StepKind::Click,
            StepAction::Fill { .. } => StepKind::Fill,
            StepAction::Unknown => StepKind::Unknown,
        }
    }

    pub fn selector(&self) -> Option<&str> {
        match &self.action {
            StepAction::Click { selector } | StepAction::Fill { selector, .. } => Some(selector),
            _ => None,
        }
    }

    pub fn value(&self) -> Option<&str> {
        match &self.action {
            StepAction::Fill { value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match &self.action {
            StepAction::Navigate { url } => Some(url),
            _ => None,
        }
    }
}

/// A persisted recording: the structured steps plus the script that actually runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub project_id: String,
    pub test_case_id: String,

    /// Best-effort structured view of `raw_script`, in line order
    pub steps: Vec<Step>,

    #[serde(deserialize_with = "lenient_timestamp")]
    pub recorded_at: DateTime<Utc>,

    /// The recorded script, verbatim. This is what gets executed.
    #[serde(alias = "raw_code")]
    pub raw_script: String,
}
