//! The versioned attribute tree.
//!
//! One tree holds one producer's view of the namespace, or one consumer's
//! mirror of it. Every committed mutation on a producer tree bumps the tree
//! version and stamps the touched leaves with it. Removals leave tombstones
//! behind so they can be shipped to consumers; tombstones below the
//! retention horizon are compacted away, and consumers that fall behind the
//! horizon must resync from a snapshot.

use crate::changeset::{ChangeSet, Operation};
use crate::error::{CoreError, Result};
use crate::node::{AttributeNode, Leaf};
use crate::path::AttributePath;
use crate::resolver::{PathResolver, Resolved};
use crate::value::AttributeValue;
use crate::Version;
use std::collections::BTreeMap;

/// The namespace of one instance.
#[derive(Clone, Debug, PartialEq)]
pub struct AttributeTree {
    root: AttributeNode,
    version: Version,
    /// Removed leaf paths and the version of their removal.
    tombstones: BTreeMap<AttributePath, Version>,
    /// Tombstones at or below this version have been discarded.
    horizon: Version,
}

impl AttributeTree {
    pub fn new() -> Self {
        AttributeTree {
            root: AttributeNode::interior(),
            version: 0,
            tombstones: BTreeMap::new(),
            horizon: 0,
        }
    }

    pub fn root(&self) -> &AttributeNode {
        &self.root
    }

    /// Current tree version.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Oldest version `changes_since` can still answer from.
    pub fn horizon(&self) -> Version {
        self.horizon
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty_interior()
    }

    pub fn leaf_count(&self) -> usize {
        self.root.leaf_count()
    }

    pub fn tombstone_count(&self) -> usize {
        self.tombstones.len()
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// The node at a concrete path.
    pub fn node(&self, path: &AttributePath) -> Option<&AttributeNode> {
        let mut node = &self.root;
        for segment in path.segments() {
            node = node.child(segment.as_literal()?)?;
        }
        Some(node)
    }

    pub fn leaf(&self, path: &AttributePath) -> Option<&Leaf> {
        self.node(path)?.as_leaf()
    }

    pub fn get(&self, path: &AttributePath) -> Option<&AttributeValue> {
        self.leaf(path).map(|leaf| &leaf.value)
    }

    /// Whether a leaf exists at the path (its value may still be `Absent`).
    pub fn contains(&self, path: &AttributePath) -> bool {
        self.leaf(path).is_some()
    }

    /// Lazy resolution of a pattern; borrows the tree for its lifetime.
    pub fn resolver(&self, pattern: &AttributePath) -> PathResolver<'_> {
        PathResolver::new(&self.root, pattern)
    }

    /// All leaves matching the pattern, key-sorted, as owned results.
    pub fn resolve(&self, pattern: &AttributePath) -> Vec<Resolved> {
        self.resolver(pattern).leaves().collect()
    }

    /// Highest version known for a path: its leaf or its tombstone.
    pub fn stored_version(&self, path: &AttributePath) -> Option<Version> {
        let leaf = self.leaf(path).map(|leaf| leaf.version);
        let tombstone = self.tombstones.get(path).copied();
        leaf.max(tombstone)
    }

    // ------------------------------------------------------------------
    // Producer mutations
    // ------------------------------------------------------------------

    /// Set the value at a concrete path, creating interior nodes as needed.
    /// Returns the new tree version.
    pub fn upsert(&mut self, path: &AttributePath, value: AttributeValue) -> Result<Version> {
        let value = value.into_stored(&path.to_string())?;
        let version = self.version + 1;
        self.insert_leaf(path, value, version)?;
        self.tombstones.remove(path);
        self.version = version;
        Ok(version)
    }

    /// Put a path into the namespace with an `Absent` value unless a leaf is
    /// already there. Returns the version the leaf carries afterwards.
    pub fn declare(&mut self, path: &AttributePath) -> Result<Version> {
        match self.leaf(path) {
            Some(leaf) => Ok(leaf.version),
            None => self.upsert(path, AttributeValue::Absent),
        }
    }

    /// Remove the leaf or subtree at a concrete path.
    ///
    /// Every removed leaf is tombstoned at the new version and childless
    /// ancestors are pruned.
    pub fn remove(&mut self, path: &AttributePath) -> Result<Version> {
        path.keys()?;
        let removed = self
            .detach(path)
            .ok_or_else(|| CoreError::NotFound(path.to_string()))?;

        let version = self.version + 1;
        for (leaf_path, _) in removed.leaves(path) {
            self.tombstones.insert(leaf_path, version);
        }
        self.version = version;
        Ok(version)
    }

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    /// Every upsert and removal stamped after `since`, in version order.
    pub fn changes_since(&self, since: Version) -> Result<ChangeSet> {
        if since > self.version {
            return Err(CoreError::VersionAhead {
                requested: since,
                current: self.version,
            });
        }
        if since < self.horizon {
            return Err(CoreError::VersionTooOld {
                requested: since,
                horizon: self.horizon,
            });
        }

        let mut operations: Vec<Operation> = self
            .root
            .leaves(&AttributePath::root())
            .into_iter()
            .filter(|(_, leaf)| leaf.version > since)
            .map(|(path, leaf)| Operation::Upsert {
                path,
                value: leaf.value.clone(),
                version: leaf.version,
            })
            .collect();

        operations.extend(
            self.tombstones
                .iter()
                .filter(|(_, &version)| version > since)
                .map(|(path, &version)| Operation::Remove {
                    path: path.clone(),
                    version,
                }),
        );

        Ok(ChangeSet::new(since, self.version, operations))
    }

    /// The whole namespace as a snapshot ChangeSet.
    pub fn snapshot(&self) -> ChangeSet {
        let operations = self
            .root
            .leaves(&AttributePath::root())
            .into_iter()
            .map(|(path, leaf)| Operation::Upsert {
                path,
                value: leaf.value.clone(),
                version: leaf.version,
            })
            .collect();
        ChangeSet::snapshot(self.version, operations)
    }

    /// Discard tombstones at or below `horizon`. Returns how many went.
    pub fn compact(&mut self, horizon: Version) -> usize {
        let horizon = horizon.min(self.version);
        let before = self.tombstones.len();
        self.tombstones.retain(|_, version| *version > horizon);
        self.horizon = self.horizon.max(horizon);
        before - self.tombstones.len()
    }

    // ------------------------------------------------------------------
    // Mirror primitives (versions come from the producer)
    // ------------------------------------------------------------------

    /// Set the tree version to what a sync engine has confirmed.
    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    /// Upsert carrying a producer version; last writer by version wins.
    ///
    /// Returns `false` when the stored version is already at or past
    /// `version`. Conflicting nodes (a leaf on the way down, or a subtree
    /// where the leaf goes) are displaced only if they are all older.
    pub fn apply_upsert_at(
        &mut self,
        path: &AttributePath,
        value: AttributeValue,
        version: Version,
    ) -> Result<bool> {
        path.keys()?;
        if path.is_root() {
            return Err(CoreError::PathConflict(path.to_string()));
        }
        let value = value.into_stored(&path.to_string())?;
        if self.stored_version(path).is_some_and(|stored| stored >= version) {
            return Ok(false);
        }
        if !self.displace_conflicts(path, version) {
            return Ok(false);
        }
        self.insert_leaf(path, value, version)?;
        self.tombstones.remove(path);
        Ok(true)
    }

    /// Removal carrying a producer version; last writer by version wins.
    ///
    /// A tombstone is recorded even if nothing is there yet, so an older
    /// upsert arriving late cannot resurrect the leaf.
    pub fn apply_remove_at(&mut self, path: &AttributePath, version: Version) -> Result<bool> {
        path.keys()?;
        if path.is_root() {
            return Err(CoreError::PathConflict(path.to_string()));
        }
        if self.stored_version(path).is_some_and(|stored| stored >= version) {
            return Ok(false);
        }
        if let Some(newest) = self.node(path).map(AttributeNode::max_version) {
            if newest >= version {
                return Ok(false);
            }
            if let Some(removed) = self.detach(path) {
                for (leaf_path, _) in removed.leaves(path) {
                    self.tombstones.insert(leaf_path, version);
                }
            }
        }
        self.tombstones.insert(path.clone(), version);
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn insert_leaf(&mut self, path: &AttributePath, value: AttributeValue, version: Version) -> Result<()> {
        let keys = path.keys()?;
        let conflict = || CoreError::PathConflict(path.to_string());
        let (last, parents) = keys.split_last().ok_or_else(conflict)?;

        let mut node = &mut self.root;
        for key in parents {
            let children = node.children_mut().ok_or_else(conflict)?;
            node = children
                .entry(key.to_string())
                .or_insert_with(AttributeNode::interior);
        }

        let children = node.children_mut().ok_or_else(conflict)?;
        match children.get_mut(*last) {
            Some(AttributeNode::Leaf(leaf)) => {
                leaf.value = value;
                leaf.version = version;
            }
            Some(AttributeNode::Interior(_)) => return Err(conflict()),
            None => {
                children.insert(last.to_string(), AttributeNode::leaf(value, version));
            }
        }
        Ok(())
    }

    fn node_mut(&mut self, path: &AttributePath) -> Option<&mut AttributeNode> {
        let mut node = &mut self.root;
        for segment in path.segments() {
            node = node.children_mut()?.get_mut(segment.as_literal()?)?;
        }
        Some(node)
    }

    /// Unlink the node at `path` and prune ancestors left empty.
    fn detach(&mut self, path: &AttributePath) -> Option<AttributeNode> {
        let Some(parent) = path.parent() else {
            if self.root.is_empty_interior() {
                return None;
            }
            return Some(std::mem::replace(&mut self.root, AttributeNode::interior()));
        };

        let key = path.last()?.as_literal()?.to_string();
        let removed = self.node_mut(&parent)?.children_mut()?.remove(&key)?;
        self.prune(parent);
        Some(removed)
    }

    fn prune(&mut self, from: AttributePath) {
        let mut current = from;
        while let Some(parent) = current.parent() {
            if !self.node(&current).is_some_and(AttributeNode::is_empty_interior) {
                break;
            }
            let key = current.last().and_then(|s| s.as_literal()).map(str::to_string);
            if let (Some(key), Some(children)) = (
                key,
                self.node_mut(&parent).and_then(AttributeNode::children_mut),
            ) {
                children.remove(&key);
            }
            current = parent;
        }
    }

    /// Clear nodes that block a leaf at `path`, if they are older than
    /// `version`. Returns `false` if a newer node blocks it.
    fn displace_conflicts(&mut self, path: &AttributePath, version: Version) -> bool {
        let mut prefix = AttributePath::root();
        for segment in &path.segments()[..path.len() - 1] {
            let Some(key) = segment.as_literal() else {
                return false;
            };
            prefix = prefix.with_key(key);
            match self.leaf(&prefix).map(|leaf| leaf.version) {
                Some(existing) if existing >= version => return false,
                Some(_) => {
                    self.detach(&prefix);
                    self.tombstones.insert(prefix.clone(), version);
                    return true;
                }
                None => {}
            }
        }

        let subtree_version = match self.node(path) {
            Some(node) if !node.is_leaf() => node.max_version(),
            _ => return true,
        };
        if subtree_version >= version {
            return false;
        }
        if let Some(removed) = self.detach(path) {
            for (leaf_path, _) in removed.leaves(path) {
                self.tombstones.insert(leaf_path, version);
            }
        }
        true
    }
}

impl Default for AttributeTree {
    fn default() -> Self {
        Self::new()
    }
}
