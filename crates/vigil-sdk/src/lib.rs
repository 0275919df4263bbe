//! Vigil SDK - producers, mirrors and subscriptions for remote monitoring
//!
//! This SDK ties the attribute tree and the sync engine into the two ends of
//! a monitoring link:
//!
//! - The **producer** (the instrumented host) owns an attribute tree. Samplers
//!   submit mutations through a [`ProducerHandle`]; a [`SyncManager`] serves
//!   the resulting ChangeSets to consumers.
//! - A **consumer** (server or viewer) runs a [`Session`] holding a
//!   [`Mirror`] of the producer's tree and a [`SubscriptionManager`] that
//!   watches patterns on it. A [`Scheduler`] drives interval subscriptions.
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use vigil_sdk::prelude::*;
//!
//! let mirror = Arc::new(Mirror::new());
//! let subscriptions = SubscriptionManager::new(mirror.clone());
//!
//! let id = subscriptions.subscribe(
//!     "/memory/usage".parse().unwrap(),
//!     DeliveryPolicy::Interval(Duration::from_secs(1)),
//! );
//! assert_eq!(subscriptions.state(id), Some(SubscriptionState::Pending));
//! ```
//!
//! # Architecture
//!
//! - [`producer`] - The tree-owning producer task and its handle
//! - [`mirror`] - Consumer-side mirror tree
//! - [`subscription`] - Pattern subscriptions and observers
//! - [`scheduler`] - Timer driving interval subscriptions
//! - [`sync`] - Producer-side serving of ChangeSets
//! - [`session`] - Consumer-side session
//! - [`network`] - Network transport abstractions
//! - [`error`] - Error types

pub mod error;
pub mod mirror;
pub mod network;
pub mod producer;
pub mod scheduler;
pub mod session;
pub mod subscription;
pub mod sync;

// Re-exports for convenience
pub use error::{Result, SdkError};
pub use mirror::Mirror;
pub use network::{create_network, MemoryTransport, Message, NetworkError, NetworkTransport, PeerId};
pub use producer::{Producer, ProducerConfig, ProducerEvent, ProducerHandle, SharedTree};
pub use scheduler::Scheduler;
pub use session::{Session, SessionConfig, SessionConfigBuilder, SessionEvent};
pub use subscription::{
    Change, DeliveryPolicy, Notification, Observer, ObserverId, SubscriptionId, SubscriptionManager,
    SubscriptionState,
};
pub use sync::{SyncConfig, SyncConfigBuilder, SyncEvent, SyncManager};

// Re-export commonly used types from the lower layers
pub use vigil_core::{AttributePath, AttributeValue, ChangeSet, Resolved, Version};
pub use vigil_sync::ApplyOutcome;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::SdkError;
    pub use crate::mirror::Mirror;
    pub use crate::network::{NetworkTransport, PeerId};
    pub use crate::producer::{Producer, ProducerConfig, ProducerHandle};
    pub use crate::scheduler::Scheduler;
    pub use crate::session::{Session, SessionConfig};
    pub use crate::subscription::{DeliveryPolicy, Notification, SubscriptionManager, SubscriptionState};
    pub use crate::sync::{SyncConfig, SyncManager};
    pub use vigil_core::{AttributePath, AttributeValue};
}
