//! Error types for the Vigil SDK.

use crate::network::NetworkError;
use crate::subscription::SubscriptionId;
use thiserror::Error;
use vigil_core::CoreError;
use vigil_sync::SyncError;

/// Error type for SDK operations.
#[derive(Error, Debug)]
pub enum SdkError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(SubscriptionId),

    /// The producer task has stopped and no longer accepts mutations.
    #[error("Producer closed")]
    ProducerClosed,

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for SdkError {
    fn from(err: serde_json::Error) -> Self {
        SdkError::Serialization(err.to_string())
    }
}

/// Result type for SDK operations.
pub type Result<T> = std::result::Result<T, SdkError>;
