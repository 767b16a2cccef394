//! Error types for web-replay

use thiserror::Error;

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by project storage, recording and session management.
///
/// Execution of a test case never returns one of these: failures there are
/// folded into a [`crate::runner::ExecutionResult`] with a diagnosis.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: String, id: String },

    #[error("External process failed: {0}")]
    ExternalProcessFailure(String),

    #[error("Session lifecycle error: {0}")]
    ResourceLifecycle(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid identifier: {0:?}")]
    InvalidId(String),
}

impl Error {
    pub fn not_found(kind: &str, id: impl Into<String>) -> Self {
        Error::NotFound {
            kind: kind.to_string(),
            id: id.into(),
        }
    }

    pub fn already_exists(kind: &str, id: impl Into<String>) -> Self {
        Error::AlreadyExists {
            kind: kind.to_string(),
            id: id.into(),
        }
    }

    /// Whether this error means the addressed resource does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_kind_and_id() {
        let err = Error::not_found("project", "shop");
        assert_eq!(err.to_string(), "project not found: shop");
        assert!(err.is_not_found());

        let err = Error::already_exists("recording", "shop/login");
        assert_eq!(err.to_string(), "recording already exists: shop/login");
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: Error = io.into();
        assert!(err.to_string().starts_with("I/O error:"));
    }
}
