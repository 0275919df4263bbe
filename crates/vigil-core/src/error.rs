//! Error types for the attribute namespace.

use crate::Version;
use thiserror::Error;

/// Errors that can occur in namespace operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Malformed path '{path}': {reason}")]
    MalformedPath { path: String, reason: String },

    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Version {requested} predates retained history (horizon {horizon})")]
    VersionTooOld { requested: Version, horizon: Version },

    #[error("Version {requested} is ahead of current version {current}")]
    VersionAhead { requested: Version, current: Version },

    #[error("Wildcard not allowed in concrete path: {0}")]
    WildcardNotAllowed(String),

    #[error("Path conflicts with an existing node: {0}")]
    PathConflict(String),

    #[error("Invalid value at '{path}': {reason}")]
    InvalidValue { path: String, reason: String },
}

impl CoreError {
    pub(crate) fn malformed(path: &str, reason: impl Into<String>) -> Self {
        CoreError::MalformedPath {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether the caller should fall back to a full snapshot.
    pub fn requires_snapshot(&self) -> bool {
        matches!(
            self,
            CoreError::VersionTooOld { .. } | CoreError::VersionAhead { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
