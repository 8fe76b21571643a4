//! Error types for stashkeep.
//!
//! Every failure a caller can observe is a [`StashError`]. Variants are grouped
//! by [`ErrorKind`] so callers can decide whether the world was touched.

use crate::registry::Coord;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for stashkeep.
#[derive(Debug, Error)]
pub enum StashError {
    // Caller input errors
    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    // Resolution errors
    #[error("No container labeled '{label}'")]
    UnknownLabel { label: String },

    #[error("No container at {position}{}", found_suffix(.block))]
    NotAContainer {
        position: Coord,
        /// Block name observed at the position, if any
        block: Option<String>,
    },

    // Policy errors
    #[error("Access to {target} is forbidden")]
    AccessDenied { target: String },

    // Persistence errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // World interaction errors
    #[error("World interaction failed: {message}")]
    World { message: String },

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Container access timed out after {0:?}")]
    Timeout(Duration),
}

fn found_suffix(block: &Option<String>) -> String {
    block
        .as_deref()
        .map(|b| format!(" (found {b})"))
        .unwrap_or_default()
}

/// Result type alias for stashkeep operations.
pub type Result<T> = std::result::Result<T, StashError>;

/// Coarse classification of a [`StashError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or malformed caller input.
    Validation,
    /// Label unknown or position names no container.
    Resolution,
    /// Container flagged forbidden.
    AccessDenied,
    /// Registry read/write failure.
    Persistence,
    /// The world handle reported a failure.
    World,
    /// Cancelled or timed out.
    Interrupted,
}

impl From<std::io::Error> for StashError {
    fn from(err: std::io::Error) -> Self {
        StashError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for StashError {
    fn from(err: serde_json::Error) -> Self {
        StashError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl StashError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        StashError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a validation error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        StashError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a world interaction error.
    pub fn world(message: impl Into<String>) -> Self {
        StashError::World {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StashError::Validation { .. } => ErrorKind::Validation,
            StashError::UnknownLabel { .. } | StashError::NotAContainer { .. } => {
                ErrorKind::Resolution
            }
            StashError::AccessDenied { .. } => ErrorKind::AccessDenied,
            StashError::Io { .. } | StashError::Json { .. } => ErrorKind::Persistence,
            StashError::World { .. } => ErrorKind::World,
            StashError::Cancelled | StashError::Timeout(_) => ErrorKind::Interrupted,
        }
    }

    /// Whether the failure happened before any container was touched.
    ///
    /// Validation, resolution and policy failures short-circuit before the
    /// mutex is acquired.
    pub fn is_pre_access(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Validation | ErrorKind::Resolution | ErrorKind::AccessDenied
        )
    }
}
