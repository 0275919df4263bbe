//! Nodes of the attribute tree.

use crate::path::AttributePath;
use crate::value::AttributeValue;
use crate::Version;
use std::collections::BTreeMap;

/// A leaf: a value plus the version at which it last changed.
#[derive(Clone, Debug, PartialEq)]
pub struct Leaf {
    pub value: AttributeValue,
    pub version: Version,
}

/// A node is either an interior node with keyed children or a leaf.
///
/// Children live in a `BTreeMap`, so enumeration is always key-sorted and
/// stable while the set of keys is unchanged.
#[derive(Clone, Debug, PartialEq)]
pub enum AttributeNode {
    Interior(BTreeMap<String, AttributeNode>),
    Leaf(Leaf),
}

impl AttributeNode {
    pub fn interior() -> Self {
        AttributeNode::Interior(BTreeMap::new())
    }

    pub fn leaf(value: AttributeValue, version: Version) -> Self {
        AttributeNode::Leaf(Leaf { value, version })
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, AttributeNode::Leaf(_))
    }

    pub fn as_leaf(&self) -> Option<&Leaf> {
        match self {
            AttributeNode::Leaf(leaf) => Some(leaf),
            AttributeNode::Interior(_) => None,
        }
    }

    pub fn children(&self) -> Option<&BTreeMap<String, AttributeNode>> {
        match self {
            AttributeNode::Interior(children) => Some(children),
            AttributeNode::Leaf(_) => None,
        }
    }

    pub(crate) fn children_mut(&mut self) -> Option<&mut BTreeMap<String, AttributeNode>> {
        match self {
            AttributeNode::Interior(children) => Some(children),
            AttributeNode::Leaf(_) => None,
        }
    }

    pub fn child(&self, key: &str) -> Option<&AttributeNode> {
        self.children().and_then(|children| children.get(key))
    }

    /// An interior node with no children (only the root may stay this way).
    pub fn is_empty_interior(&self) -> bool {
        matches!(self, AttributeNode::Interior(children) if children.is_empty())
    }

    /// Every leaf below (or at) this node, paired with its full path, in
    /// key-sorted order.
    pub fn leaves(&self, at: &AttributePath) -> Vec<(AttributePath, &Leaf)> {
        let mut out = Vec::new();
        let mut stack = vec![(at.clone(), self)];
        while let Some((path, node)) = stack.pop() {
            match node {
                AttributeNode::Leaf(leaf) => out.push((path, leaf)),
                AttributeNode::Interior(children) => {
                    for (key, child) in children.iter().rev() {
                        stack.push((path.with_key(key), child));
                    }
                }
            }
        }
        out
    }

    /// Highest leaf version in this subtree (0 if it has no leaves).
    pub fn max_version(&self) -> Version {
        match self {
            AttributeNode::Leaf(leaf) => leaf.version,
            AttributeNode::Interior(children) => {
                children.values().map(AttributeNode::max_version).max().unwrap_or(0)
            }
        }
    }

    pub fn leaf_count(&self) -> usize {
        match self {
            AttributeNode::Leaf(_) => 1,
            AttributeNode::Interior(children) => children.values().map(AttributeNode::leaf_count).sum(),
        }
    }
}
