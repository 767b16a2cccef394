//! Failure classification for test case runs.
//!
//! Maps the error text of a failed run to a [`FailureDiagnosis`]: a category
//! from a closed set, a short reason and ordered remediation hints. The rule
//! table is evaluated top to bottom and the first matching row wins, since
//! the substrings it looks for overlap (a click timeout also mentions
//! "timeout").

use serde::{Deserialize, Serialize};

/// Closed set of diagnostic categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureCategory {
    ElementNotFound,
    ElementInteractionFailed,
    PageLoadFailed,
    NetworkError,
    InputOperationFailed,
    SelectorMismatch,
    OperationTimeout,
    ScriptSyntaxError,
    UnknownError,
    /// The recorded script for the test case does not exist
    ScriptNotFound,
    /// An execution session could not be opened
    SessionUnavailable,
    /// The script interpreter could not be started
    ProcessLaunchFailed,
    /// The run exceeded the configured time limit and was terminated
    ExecutionTimedOut,
}

impl FailureCategory {
    pub const ALL: [FailureCategory; 13] = [
        FailureCategory::ElementNotFound,
        FailureCategory::ElementInteractionFailed,
        FailureCategory::PageLoadFailed,
        FailureCategory::NetworkError,
        FailureCategory::InputOperationFailed,
        FailureCategory::SelectorMismatch,
        FailureCategory::OperationTimeout,
        FailureCategory::ScriptSyntaxError,
        FailureCategory::UnknownError,
        FailureCategory::ScriptNotFound,
        FailureCategory::SessionUnavailable,
        FailureCategory::ProcessLaunchFailed,
        FailureCategory::ExecutionTimedOut,
    ];

    /// Heading shown to users
    pub fn label(&self) -> &'static str {
        self.guidance().label
    }

    /// Inverse of [`label`](Self::label)
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.label() == label.trim())
    }

    fn guidance(&self) -> &'static Guidance {
        match self {
            FailureCategory::ElementNotFound => &Guidance {
                label: "Element not found",
                reason: "The page never showed an element matching the recorded locator.",
                suggestions: &[
                    "Check that the element still exists on the page",
                    "Re-record the step if the page structure changed",
                    "Wait for the element explicitly before interacting with it",
                ],
            },
            FailureCategory::ElementInteractionFailed => &Guidance {
                label: "Element interaction failed",
                reason: "A click on the element failed or did not complete in time.",
                suggestions: &[
                    "Make sure the element is visible and enabled",
                    "Check whether another element (a dialog or overlay) covers it",
                    "Scroll the element into view before clicking",
                ],
            },
            FailureCategory::PageLoadFailed => &Guidance {
                label: "Page load failed",
                reason: "Navigating to the page did not succeed.",
                suggestions: &[
                    "Verify the URL is correct and reachable",
                    "Check that the target server is running",
                    "Increase the navigation timeout for slow pages",
                ],
            },
            FailureCategory::NetworkError => &Guidance {
                label: "Network error",
                reason: "The browser reported a network-level error.",
                suggestions: &[
                    "Check the network connection",
                    "Verify DNS resolution and proxy settings",
                    "Confirm the server accepts connections",
                ],
            },
            FailureCategory::InputOperationFailed => &Guidance {
                label: "Input operation failed",
                reason: "Entering text into a field failed.",
                suggestions: &[
                    "Make sure the input field is editable",
                    "Check that the field is not disabled or read-only",
                    "Verify the locator points at an input element",
                ],
            },
            FailureCategory::SelectorMismatch => &Guidance {
                label: "Selector mismatch",
                reason: "A selector did not match the expected element.",
                suggestions: &[
                    "Review the selector in the recorded script",
                    "Prefer role or text based locators over CSS paths",
                    "Re-record the test case against the current page",
                ],
            },
            FailureCategory::OperationTimeout => &Guidance {
                label: "Operation timeout",
                reason: "A browser operation did not finish within its time limit.",
                suggestions: &[
                    "Check whether the page is slow to respond",
                    "Increase the timeout for the slow operation",
                    "Wait for a specific page state instead of a fixed delay",
                ],
            },
            FailureCategory::ScriptSyntaxError => &Guidance {
                label: "Script syntax error",
                reason: "The recorded script is not valid source code.",
                suggestions: &[
                    "Open the script and fix the reported line",
                    "Re-record the test case if the script was edited by hand",
                ],
            },
            FailureCategory::UnknownError => &Guidance {
                label: "Unknown error",
                reason: "The failure did not match any known pattern.",
                suggestions: &[
                    "Read the full error output",
                    "Run the script manually to reproduce the failure",
                ],
            },
            FailureCategory::ScriptNotFound => &Guidance {
                label: "Script not found",
                reason: "No recorded script exists for this test case.",
                suggestions: &[
                    "Check the project and test case identifiers",
                    "Record the test case before running it",
                ],
            },
            FailureCategory::SessionUnavailable => &Guidance {
                label: "Session unavailable",
                reason: "An execution session could not be started.",
                suggestions: &[
                    "Check that the session directory is writable",
                    "Retry once other runs have finished",
                ],
            },
            FailureCategory::ProcessLaunchFailed => &Guidance {
                label: "Process launch failed",
                reason: "The script interpreter could not be started.",
                suggestions: &[
                    "Check that the configured runner is installed and on PATH",
                    "Verify the runner command in the configuration",
                ],
            },
            FailureCategory::ExecutionTimedOut => &Guidance {
                label: "Execution timed out",
                reason: "The test case ran longer than the allowed time and was stopped.",
                suggestions: &[
                    "Check whether the script waits on something that never happens",
                    "Raise the execution timeout if the test is legitimately long",
                ],
            },
        }
    }
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Fixed reason and hints per category
struct Guidance {
    label: &'static str,
    reason: &'static str,
    suggestions: &'static [&'static str],
}

/// One row of the classification table
struct Rule {
    matches: fn(&str) -> bool,
    category: FailureCategory,
}

/// Evaluated in order; first match wins
const RULES: &[Rule] = &[
    Rule {
        matches: |t| t.contains("waiting for locator"),
        category: FailureCategory::ElementNotFound,
    },
    Rule {
        matches: |t| t.contains("click") && (t.contains("failed") || t.contains("timeout")),
        category: FailureCategory::ElementInteractionFailed,
    },
    Rule {
        matches: |t| t.contains("page.goto"),
        category: FailureCategory::PageLoadFailed,
    },
    Rule {
        matches: |t| t.contains("net::"),
        category: FailureCategory::NetworkError,
    },
    Rule {
        matches: |t| t.contains("fill") || t.contains("type"),
        category: FailureCategory::InputOperationFailed,
    },
    Rule {
        matches: |t| t.contains("selector"),
        category: FailureCategory::SelectorMismatch,
    },
    Rule {
        matches: |t| t.contains("timeout"),
        category: FailureCategory::OperationTimeout,
    },
    Rule {
        matches: |t| t.contains("SyntaxError"),
        category: FailureCategory::ScriptSyntaxError,
    },
];

const REASON_HEADING: &str = "Reason:";
const TYPE_HEADING: &str = "Error type:";
const SUGGESTIONS_HEADING: &str = "Suggestions:";

/// Classified explanation of a failed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDiagnosis {
    pub category: FailureCategory,
    pub reason: String,
    pub suggestions: Vec<String>,
}

impl FailureDiagnosis {
    /// Diagnosis with the category's standard reason and hints
    pub fn for_category(category: FailureCategory) -> Self {
        let guidance = category.guidance();
        Self {
            category,
            reason: guidance.reason.to_string(),
            suggestions: guidance.suggestions.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Render as a headed block:
    ///
    /// ```text
    /// Error type: Element not found
    /// Reason: The page never showed ...
    /// Suggestions:
    /// - Check that ...
    /// ```
    pub fn render(&self) -> String {
        let mut out = format!(
            "{} {}\n{} {}\n{}",
            TYPE_HEADING,
            self.category.label(),
            REASON_HEADING,
            self.reason,
            SUGGESTIONS_HEADING
        );
        for suggestion in &self.suggestions {
            out.push_str("\n- ");
            out.push_str(suggestion);
        }
        out
    }

    /// Read back a block produced by [`render`](Self::render).
    ///
    /// Text without a recognizable heading yields an `UnknownError` diagnosis
    /// telling the reader to consult the raw output.
    pub fn parse_rendered(text: &str) -> Self {
        let mut category = None;
        let mut reason = None;
        let mut suggestions = Vec::new();

        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Some(label) = line.strip_prefix(TYPE_HEADING) {
                category = FailureCategory::from_label(label);
            } else if let Some(r) = line.strip_prefix(REASON_HEADING) {
                reason = Some(r.trim().to_string());
            } else if let Some(s) = line.strip_prefix('-') {
                suggestions.push(s.trim().to_string());
            }
        }

        match (category, reason) {
            (Some(category), Some(reason)) => Self {
                category,
                reason,
                suggestions,
            },
            _ => Self {
                category: FailureCategory::UnknownError,
                reason: "The diagnosis text could not be parsed.".to_string(),
                suggestions: vec!["Read the original error output".to_string()],
            },
        }
    }
}

impl std::fmt::Display for FailureDiagnosis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.render())
    }
}

/// Category for a piece of error text
pub fn categorize(error_text: &str) -> FailureCategory {
    RULES
        .iter()
        .find(|rule| (rule.matches)(error_text))
        .map(|rule| rule.category)
        .unwrap_or(FailureCategory::UnknownError)
}

/// Diagnose a failed run from its error text. Pure and deterministic.
pub fn classify(error_text: &str) -> FailureDiagnosis {
    let diagnosis = FailureDiagnosis::for_category(categorize(error_text));
    tracing::debug!(category = ?diagnosis.category, "Classified failure");
    diagnosis
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_waiting_for_locator_always_element_not_found() {
        let texts = [
            "waiting for locator(\"#go\")",
            "click failed: timeout 30000ms exceeded, waiting for locator(\"#go\")",
            "page.goto: net::ERR waiting for locator fill type selector SyntaxError",
        ];
        for text in texts {
            assert_eq!(categorize(text), FailureCategory::ElementNotFound, "{}", text);
        }
    }

    #[test]
    fn test_rule_order() {
        let cases = [
            ("locator.click: timeout 30000ms exceeded", FailureCategory::ElementInteractionFailed),
            ("Locator.click: Timeout 30000ms exceeded", FailureCategory::UnknownError),
            ("click failed: element detached", FailureCategory::ElementInteractionFailed),
            ("page.goto: net::ERR_NAME_NOT_RESOLVED", FailureCategory::PageLoadFailed),
            ("net::ERR_CONNECTION_REFUSED at https://x", FailureCategory::NetworkError),
            ("Locator.fill: element is not an <input>", FailureCategory::InputOperationFailed),
            ("TypeError: object is not callable", FailureCategory::UnknownError),
            ("wrong type for argument", FailureCategory::InputOperationFailed),
            ("Unexpected token in selector", FailureCategory::SelectorMismatch),
            ("Navigation timeout of 30000 ms", FailureCategory::OperationTimeout),
            ("SyntaxError: invalid syntax", FailureCategory::ScriptSyntaxError),
            ("segmentation fault", FailureCategory::UnknownError),
            ("", FailureCategory::UnknownError),
        ];
        for (text, expected) in cases {
            assert_eq!(categorize(text), expected, "{}", text);
        }
    }

    #[test]
    fn test_click_without_failure_word_falls_through() {
        assert_eq!(categorize("clicked the button"), FailureCategory::UnknownError);
    }

    #[test]
    fn test_classify_is_deterministic() {
        let text = "Error: click failed after timeout";
        assert_eq!(classify(text), classify(text));
    }

    #[test]
    fn test_every_category_has_guidance() {
        for category in FailureCategory::ALL {
            let diagnosis = FailureDiagnosis::for_category(category);
            assert!(!diagnosis.reason.is_empty());
            assert!(!diagnosis.suggestions.is_empty());
            assert_eq!(FailureCategory::from_label(category.label()), Some(category));
        }
    }

    #[test]
    fn test_render_layout() {
        let rendered = FailureDiagnosis::for_category(FailureCategory::ScriptSyntaxError).render();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "Error type: Script syntax error");
        assert!(lines[1].starts_with("Reason: "));
        assert_eq!(lines[2], "Suggestions:");
        assert!(lines[3..].iter().all(|l| l.starts_with("- ")));
    }

    #[test]
    fn test_parse_rendered_reads_back() {
        let diagnosis = classify("net::ERR_TIMED_OUT");
        assert_eq!(FailureDiagnosis::parse_rendered(&diagnosis.render()), diagnosis);
    }

    #[test]
    fn test_parse_rendered_garbage() {
        let parsed = FailureDiagnosis::parse_rendered("Traceback (most recent call last):");
        assert_eq!(parsed.category, FailureCategory::UnknownError);
        assert_eq!(parsed.suggestions, vec!["Read the original error output"]);
    }
}
