//! Error types and result aliases for twinrun.
//!
//! This module defines the shared error types used by every twinrun crate.
//! Errors are structured for programmatic handling and include context for debugging.

use std::fmt;
use std::path::{Path, PathBuf};

/// The result type used throughout twinrun.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in shared twinrun operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An invalid identifier was provided.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// Description of what made the ID invalid.
        message: String,
    },

    /// A local file operation failed.
    #[error("io error at {}: {message}", path.display())]
    Io {
        /// The file or directory involved.
        path: PathBuf,
        /// Description of the failure.
        message: String,
        /// The underlying cause.
        #[source]
        source: std::io::Error,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// The configuration is missing a value or contains an invalid one.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The requested resource was not found.
    #[error("not found: {resource_type} with id {id}")]
    ResourceNotFound {
        /// The type of resource that was not found.
        resource_type: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// An internal error occurred that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates a new I/O error for the given path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            message: message.into(),
            source,
        }
    }

    /// Creates a new resource not found error.
    #[must_use]
    pub fn resource_not_found(resource_type: &'static str, id: impl fmt::Display) -> Self {
        Self::ResourceNotFound {
            resource_type,
            id: id.to_string(),
        }
    }

    /// Returns true if this error wraps an I/O `NotFound`.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Io { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
            Self::ResourceNotFound { .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn io_error_display_includes_path() {
        let source = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = Error::io("/tmp/run/deployed_list.json", "failed to read ledger", source);
        let msg = err.to_string();
        assert!(msg.contains("deployed_list.json"));
        assert!(msg.contains("failed to read ledger"));
        assert!(StdError::source(&err).is_some());
        assert!(err.is_not_found());
    }

    #[test]
    fn resource_not_found_display() {
        let err = Error::resource_not_found("queue", "run_42_completion");
        assert_eq!(
            err.to_string(),
            "not found: queue with id run_42_completion"
        );
        assert!(err.is_not_found());
    }

    #[test]
    fn config_error_is_not_not_found() {
        let err = Error::InvalidConfig("task_id cannot be empty".into());
        assert!(!err.is_not_found());
    }
}
