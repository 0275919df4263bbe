//! Per-consumer acknowledged versions.
//!
//! The producer may only compact tombstones every registered consumer has
//! confirmed; `min_acked` is that bound.

use std::collections::BTreeMap;
use vigil_core::Version;

/// Tracks the highest version each consumer has confirmed.
#[derive(Debug, Clone, Default)]
pub struct AckTracker {
    acked: BTreeMap<String, Version>,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a consumer (initializes its ack to 0)
    pub fn register_peer(&mut self, peer_id: impl Into<String>) {
        self.acked.entry(peer_id.into()).or_insert(0);
    }

    /// Record an ack; acks never move backwards. Unknown peers are ignored.
    pub fn update_ack(&mut self, peer_id: &str, version: Version) {
        if let Some(acked) = self.acked.get_mut(peer_id) {
            *acked = (*acked).max(version);
        }
    }

    pub fn get_ack(&self, peer_id: &str) -> Version {
        self.acked.get(peer_id).copied().unwrap_or(0)
    }

    /// Minimum ack across consumers, `None` when nobody is registered.
    pub fn min_acked(&self) -> Option<Version> {
        self.acked.values().copied().min()
    }

    pub fn remove_peer(&mut self, peer_id: &str) -> Option<Version> {
        self.acked.remove(peer_id)
    }

    pub fn peers(&self) -> impl Iterator<Item = &String> {
        self.acked.keys()
    }

    pub fn len(&self) -> usize {
        self.acked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.acked.is_empty()
    }
}
