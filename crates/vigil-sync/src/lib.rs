//! Vigil Sync - keeping attribute mirrors consistent with a producer
//!
//! This crate implements the synchronization protocol between a producer's
//! attribute tree and any number of consumer mirrors:
//! - ChangeSet wire format (tagged values, textual paths)
//! - SyncEngine: version-ordered apply with gap detection
//! - AckTracker: per-consumer acknowledged versions for tombstone compaction
//! - NetworkSimulator: lossy/duplicating/reordering delivery for tests
//!
//! # Protocol
//!
//! ```text
//! Producer, on mutation:
//!   version += 1; stamp leaf (or tombstone) with version
//!
//! Producer, on request from consumer j (last confirmed c_j):
//!   if c_j >= horizon: send changes_since(c_j)
//!   else:              send snapshot()
//!
//! Consumer, on snapshot s:
//!   mirror = s; confirmed = s.result
//!
//! Consumer, on ChangeSet cs:
//!   for op in cs (version order):
//!     skip if op.version <= confirmed
//!     skip if stored_version(op.path) >= op.version   // last writer by version wins
//!     else apply
//!   if cs.base <= confirmed: confirmed = max(confirmed, cs.result); drop tombstones <= confirmed
//!   else:                    buffer range, request changes_since(confirmed)
//! ```
//!
//! # Example
//!
//! ```rust
//! use vigil_core::AttributeTree;
//! use vigil_sync::SyncEngine;
//!
//! let mut producer = AttributeTree::new();
//! producer.upsert(&"/uptime".parse().unwrap(), 3600i64.into()).unwrap();
//!
//! let mut mirror = AttributeTree::new();
//! let mut engine = SyncEngine::new();
//! let changes = SyncEngine::diff(&producer, mirror.version()).unwrap();
//! let outcome = engine.apply(&changes, &mut mirror).unwrap();
//!
//! assert!(!outcome.is_gap());
//! assert_eq!(mirror.version(), producer.version());
//! ```

pub mod ack;
pub mod engine;
pub mod error;
pub mod simulator;
pub mod wire;

pub use ack::AckTracker;
pub use engine::{ApplyOutcome, SyncEngine};
pub use error::{Result, SyncError};
pub use simulator::{NetworkConfig, NetworkSimulator};
pub use wire::{decode, encode, ChangeSetWire, OpKind, OperationWire};
