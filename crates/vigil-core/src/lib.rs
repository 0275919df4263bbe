//! # vigil-core
//!
//! The attribute namespace of a monitored instance.
//!
//! This crate provides:
//! - `AttributePath`: slash-delimited paths with literal and wildcard (`_`) segments
//! - `AttributeValue`: typed leaf values, including the pending `Absent` state
//! - `AttributeTree`: the versioned tree of attributes with tombstones for removals
//! - `PathResolver`: lazy wildcard expansion against the live tree
//! - `ChangeSet`: the versioned batch of upserts and removals used for sync
//!
//! ## Example
//!
//! ```rust
//! use vigil_core::{AttributePath, AttributeTree, AttributeValue};
//!
//! let mut tree = AttributeTree::new();
//! tree.upsert(&"/cpu/0/model".parse().unwrap(), "x86".into()).unwrap();
//! tree.upsert(&"/cpu/1/model".parse().unwrap(), "arm".into()).unwrap();
//!
//! let pattern: AttributePath = "/cpu/_/model".parse().unwrap();
//! let models: Vec<_> = tree.resolve(&pattern).into_iter().map(|r| r.value).collect();
//! assert_eq!(models, vec![AttributeValue::from("x86"), AttributeValue::from("arm")]);
//! ```

pub mod changeset;
pub mod error;
pub mod node;
pub mod path;
pub mod resolver;
pub mod tree;
pub mod value;

/// Logical version stamp. One counter per tree; zero means "nothing yet".
pub type Version = u64;

pub use changeset::{ChangeSet, Operation};
pub use error::{CoreError, Result};
pub use node::{AttributeNode, Leaf};
pub use path::{AttributePath, Segment, DELIMITER, WILDCARD};
pub use resolver::{PathResolver, Resolved};
pub use tree::AttributeTree;
pub use value::AttributeValue;
