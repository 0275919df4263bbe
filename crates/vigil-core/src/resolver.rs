//! Wildcard expansion against the live tree.
//!
//! A pattern is walked segment by segment. A literal segment descends into the
//! named child (or ends that branch); a wildcard enumerates the children that
//! exist *right now*. The resolver borrows the tree, so no mutation can
//! interleave with an in-progress resolution; results collected out of it are
//! owned snapshots that later mutations do not touch.

use crate::node::AttributeNode;
use crate::path::{AttributePath, Segment};
use crate::value::AttributeValue;
use crate::Version;

/// One matched leaf, detached from the tree.
#[derive(Clone, Debug, PartialEq)]
pub struct Resolved {
    pub path: AttributePath,
    pub value: AttributeValue,
    pub version: Version,
}

/// Lazy, depth-first resolution of a pattern.
///
/// Yields `(concrete path, node)` pairs in key-sorted order. Interior nodes
/// are yielded when the pattern ends on them; use [`PathResolver::leaves`]
/// for leaves only.
pub struct PathResolver<'a> {
    pattern: Vec<Segment>,
    stack: Vec<(AttributePath, &'a AttributeNode)>,
}

impl<'a> PathResolver<'a> {
    pub fn new(root: &'a AttributeNode, pattern: &AttributePath) -> Self {
        PathResolver {
            pattern: pattern.segments().to_vec(),
            stack: vec![(AttributePath::root(), root)],
        }
    }

    /// Only matches that are leaves, as owned results.
    pub fn leaves(self) -> impl Iterator<Item = Resolved> + 'a {
        self.filter_map(|(path, node)| {
            node.as_leaf().map(|leaf| Resolved {
                path,
                value: leaf.value.clone(),
                version: leaf.version,
            })
        })
    }
}

impl<'a> Iterator for PathResolver<'a> {
    type Item = (AttributePath, &'a AttributeNode);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((path, node)) = self.stack.pop() {
            let depth = path.len();
            let Some(segment) = self.pattern.get(depth) else {
                return Some((path, node));
            };
            let Some(children) = node.children() else {
                continue;
            };
            match segment {
                Segment::Literal(key) => {
                    if let Some(child) = children.get(key) {
                        self.stack.push((path.with_key(key), child));
                    }
                }
                Segment::Wildcard => {
                    // Reverse so the smallest key is popped first.
                    for (key, child) in children.iter().rev() {
                        self.stack.push((path.with_key(key), child));
                    }
                }
            }
        }
        None
    }
}
