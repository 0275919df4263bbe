//! Error types for synchronization.

use thiserror::Error;
use vigil_core::CoreError;

/// Errors that can occur while encoding, decoding or applying ChangeSets.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Invalid ChangeSet: {0}")]
    InvalidChangeSet(String),
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Codec(err.to_string())
    }
}

impl SyncError {
    /// Whether the peer should answer with a full snapshot instead.
    pub fn requires_snapshot(&self) -> bool {
        matches!(self, SyncError::Core(core) if core.requires_snapshot())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
