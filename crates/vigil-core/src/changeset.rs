//! Versioned batches of namespace changes.

use crate::path::AttributePath;
use crate::value::AttributeValue;
use crate::Version;
use serde::{Deserialize, Serialize};

/// A single leaf change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    Upsert {
        path: AttributePath,
        value: AttributeValue,
        version: Version,
    },
    Remove {
        path: AttributePath,
        version: Version,
    },
}

impl Operation {
    pub fn path(&self) -> &AttributePath {
        match self {
            Operation::Upsert { path, .. } | Operation::Remove { path, .. } => path,
        }
    }

    pub fn version(&self) -> Version {
        match self {
            Operation::Upsert { version, .. } | Operation::Remove { version, .. } => *version,
        }
    }

    pub fn is_remove(&self) -> bool {
        matches!(self, Operation::Remove { .. })
    }
}

/// An ordered set of operations covering the version range
/// `(base_version, result_version]`.
///
/// A ChangeSet produced by a tree is complete for its range: applying it to
/// a mirror that has confirmed `base_version` yields the producer's state at
/// `result_version`. A *snapshot* ChangeSet carries the whole namespace and
/// replaces whatever the mirror had.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    base_version: Version,
    result_version: Version,
    snapshot: bool,
    operations: Vec<Operation>,
}

impl ChangeSet {
    /// Build an incremental ChangeSet; operations are put in version order.
    pub fn new(base_version: Version, result_version: Version, operations: Vec<Operation>) -> Self {
        Self::build(base_version, result_version, false, operations)
    }

    /// Build a full-state ChangeSet at `result_version`.
    pub fn snapshot(result_version: Version, operations: Vec<Operation>) -> Self {
        Self::build(0, result_version, true, operations)
    }

    /// An empty ChangeSet that only confirms `version`.
    pub fn empty(version: Version) -> Self {
        Self::build(version, version, false, Vec::new())
    }

    fn build(
        base_version: Version,
        result_version: Version,
        snapshot: bool,
        mut operations: Vec<Operation>,
    ) -> Self {
        operations.sort_by(|a, b| {
            a.version()
                .cmp(&b.version())
                .then_with(|| a.path().cmp(b.path()))
        });
        ChangeSet {
            base_version,
            result_version,
            snapshot,
            operations,
        }
    }

    pub fn base_version(&self) -> Version {
        self.base_version
    }

    pub fn result_version(&self) -> Version {
        self.result_version
    }

    pub fn is_snapshot(&self) -> bool {
        self.snapshot
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn into_operations(self) -> Vec<Operation> {
        self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Whether any operation lands on a path the pattern could cover.
    pub fn touches(&self, pattern: &AttributePath) -> bool {
        self.operations.iter().any(|op| pattern.intersects(op.path()))
    }
}
