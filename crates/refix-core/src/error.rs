//! Unified error types for refix

use thiserror::Error;

/// Unified error type for all refix operations
#[derive(Error, Debug)]
pub enum RefixError {
    // Input errors
    #[error("Invalid target: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // Artifact errors
    #[error("Artifact error ({name}): {message}")]
    Artifact { name: String, message: String },

    #[error("Path escapes target directory: {0}")]
    PathTraversal(String),

    // Collaborator errors
    #[error("Static analyzer failed: {0}")]
    Analyzer(String),

    #[error("Dynamic validator failed: {0}")]
    Validator(String),

    #[error("Corrective stage failed: {0}")]
    Corrector(String),

    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    // Telemetry errors
    #[error("Telemetry error: {0}")]
    Telemetry(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

impl RefixError {
    /// Build an artifact error from a name and any displayable cause
    pub fn artifact(name: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Artifact {
            name: name.into(),
            message: message.to_string(),
        }
    }

    /// Build a timeout error
    pub fn timeout(operation: impl Into<String>, secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            secs,
        }
    }
}

/// Result type alias using RefixError
pub type Result<T> = std::result::Result<T, RefixError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = RefixError::Validation("Target directory does not exist: ./nope".into());
        assert_eq!(
            err.to_string(),
            "Invalid target: Target directory does not exist: ./nope"
        );

        let err = RefixError::timeout("pytest", 60);
        assert_eq!(err.to_string(), "pytest timed out after 60s");

        let err = RefixError::artifact("calc.py", "permission denied");
        assert!(err.to_string().contains("calc.py"));
        assert!(err.to_string().contains("permission denied"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: RefixError = io.into();
        assert!(matches!(err, RefixError::Io(_)));
    }
}
