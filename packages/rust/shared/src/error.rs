//! Error types for Roadmend.
//!
//! Library crates use [`RoadmendError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all Roadmend operations.
#[derive(Debug, thiserror::Error)]
pub enum RoadmendError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error while talking to a collaborator.
    #[error("network error: {0}")]
    Network(String),

    /// Roadmap JSON could not be parsed or serialized.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Text-generation service error (HTTP, API, or response shape).
    #[error("generation error: {0}")]
    Generation(String),

    /// Run lease could not be acquired or released.
    #[error("lock error: {0}")]
    Lock(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error.
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, RoadmendError>;

impl RoadmendError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = RoadmendError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = RoadmendError::Storage("database is locked".into());
        assert!(err.to_string().contains("database is locked"));
    }

    #[test]
    fn io_error_keeps_path() {
        let err = RoadmendError::io(
            "/tmp/roadmend.lock",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("roadmend.lock"));
        assert!(msg.contains("denied"));
    }
}
