//! Consumer-side copy of a producer's namespace.

use crate::error::Result;
use parking_lot::{Mutex, RwLock};
use tracing::trace;
use vigil_core::{AttributePath, AttributeTree, AttributeValue, ChangeSet, Leaf, Resolved, Version};
use vigil_sync::{ApplyOutcome, SyncEngine};

/// A mirror tree plus the engine that keeps it in sync.
///
/// `apply` is serialized by the engine mutex and runs under a single write
/// lock, so readers observe either the state before a ChangeSet or after
/// it, never a part of one.
#[derive(Debug, Default)]
pub struct Mirror {
    tree: RwLock<AttributeTree>,
    engine: Mutex<SyncEngine>,
}

impl Mirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&self, changes: &ChangeSet) -> Result<ApplyOutcome> {
        let mut engine = self.engine.lock();
        let mut tree = self.tree.write();
        let outcome = engine.apply(changes, &mut tree)?;
        trace!(?outcome, "mirror updated");
        Ok(outcome)
    }

    /// Confirmed version.
    pub fn version(&self) -> Version {
        self.tree.read().version()
    }

    pub fn resolve(&self, pattern: &AttributePath) -> Vec<Resolved> {
        self.tree.read().resolve(pattern)
    }

    pub fn get(&self, path: &AttributePath) -> Option<AttributeValue> {
        self.tree.read().get(path).cloned()
    }

    pub fn leaf(&self, path: &AttributePath) -> Option<Leaf> {
        self.tree.read().leaf(path).cloned()
    }

    /// Removals above the confirmed version still held to order late
    /// upserts. Confirmed removals are compacted away.
    pub fn tombstone_count(&self) -> usize {
        self.tree.read().tombstone_count()
    }

    pub fn has_pending(&self) -> bool {
        self.engine.lock().has_pending()
    }

    /// Drop buffered out-of-order ranges ahead of a full resync.
    pub fn reset_pending(&self) {
        self.engine.lock().reset();
    }

    /// Run `f` against a consistent view of the tree.
    pub fn read<R>(&self, f: impl FnOnce(&AttributeTree) -> R) -> R {
        f(&self.tree.read())
    }
}
