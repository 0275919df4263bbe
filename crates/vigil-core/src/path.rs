//! Slash-delimited attribute paths.
//!
//! A path is an ordered list of segments. A segment is either a literal key
//! (`cpu`, `0`, `model`) or the index wildcard `_`, which stands for "every
//! member of this collection". Paths without wildcards are *concrete* and
//! name at most one node; paths with wildcards are *patterns*.
//!
//! ```text
//! /cpu/_/model      pattern, matches /cpu/0/model, /cpu/1/model, ...
//! /memory/usage     concrete
//! /                 the root
//! ```

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Separator between segments in the text form.
pub const DELIMITER: char = '/';

/// Text token of the index wildcard.
pub const WILDCARD: &str = "_";

/// A single path segment.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    /// A literal child key.
    Literal(String),
    /// The index wildcard; matches any single segment.
    Wildcard,
}

impl Segment {
    /// Parse one segment of text.
    ///
    /// Tokens made only of `_`, `*` and `?` are reserved for wildcards; only
    /// `_` is recognized, the rest are rejected rather than read as literals.
    pub fn parse(raw: &str) -> std::result::Result<Self, &'static str> {
        if raw.is_empty() {
            return Err("empty segment");
        }
        if raw.contains(DELIMITER) {
            return Err("segment contains the delimiter");
        }
        if raw == WILDCARD {
            return Ok(Segment::Wildcard);
        }
        if raw.chars().all(|c| matches!(c, '_' | '*' | '?')) {
            return Err("unrecognized wildcard token");
        }
        Ok(Segment::Literal(raw.to_string()))
    }

    /// Build a literal segment, rejecting wildcard tokens.
    pub fn literal(key: &str) -> Result<Self> {
        match Segment::parse(key) {
            Ok(Segment::Literal(key)) => Ok(Segment::Literal(key)),
            Ok(Segment::Wildcard) => Err(CoreError::malformed(key, "expected a literal key")),
            Err(reason) => Err(CoreError::malformed(key, reason)),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, Segment::Wildcard)
    }

    pub fn as_literal(&self) -> Option<&str> {
        match self {
            Segment::Literal(key) => Some(key),
            Segment::Wildcard => None,
        }
    }

    /// Whether two segments can name the same concrete key.
    fn overlaps(&self, other: &Segment) -> bool {
        self.is_wildcard() || other.is_wildcard() || self == other
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Literal(key) => write!(f, "{}", key),
            Segment::Wildcard => write!(f, "{}", WILDCARD),
        }
    }
}

/// A path into the attribute namespace.
///
/// Ordering is segment-wise, so concrete paths sort by key at every level.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AttributePath(Vec<Segment>);

impl AttributePath {
    /// The root path (no segments).
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Build a path from already-validated segments.
    pub fn new(segments: Vec<Segment>) -> Self {
        Self(segments)
    }

    /// Parse the text form.
    ///
    /// A leading `/` is optional. `"/"` is the root; `""` is malformed.
    pub fn parse(text: &str) -> Result<Self> {
        if text.is_empty() {
            return Err(CoreError::malformed(text, "empty path"));
        }
        if !text.is_ascii() {
            return Err(CoreError::malformed(text, "path must be ASCII"));
        }

        let body = text.strip_prefix(DELIMITER).unwrap_or(text);
        if body.is_empty() {
            return Ok(Self::root());
        }

        body.split(DELIMITER)
            .map(|raw| Segment::parse(raw).map_err(|reason| CoreError::malformed(text, reason)))
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// A path is concrete when it has no wildcard segments.
    pub fn is_concrete(&self) -> bool {
        !self.0.iter().any(Segment::is_wildcard)
    }

    pub fn is_pattern(&self) -> bool {
        !self.is_concrete()
    }

    pub fn last(&self) -> Option<&Segment> {
        self.0.last()
    }

    /// The parent path, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            None
        } else {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// Append one segment given as text (`"_"` appends a wildcard).
    pub fn child(&self, segment: &str) -> Result<Self> {
        let segment = Segment::parse(segment).map_err(|reason| CoreError::malformed(segment, reason))?;
        let mut next = self.clone();
        next.0.push(segment);
        Ok(next)
    }

    /// Append a key known to be valid (taken from the tree itself).
    pub(crate) fn with_key(&self, key: &str) -> Self {
        let mut next = self.clone();
        next.0.push(Segment::Literal(key.to_string()));
        next
    }

    /// Structural prefix test: every segment of `self` equals the
    /// corresponding segment of `other`. The root is a prefix of everything.
    pub fn is_prefix_of(&self, other: &AttributePath) -> bool {
        self.0.len() <= other.0.len() && self.0.iter().zip(&other.0).all(|(a, b)| a == b)
    }

    /// Segment-wise match of a pattern against a concrete path.
    ///
    /// Equal segment counts are required; a wildcard matches any one segment.
    pub fn matches(&self, concrete: &AttributePath) -> bool {
        self.0.len() == concrete.0.len()
            && self
                .0
                .iter()
                .zip(&concrete.0)
                .all(|(pattern, segment)| pattern.is_wildcard() || pattern == segment)
    }

    /// Whether the two paths could address overlapping parts of the tree:
    /// they agree (treating wildcards as "any") on their common prefix.
    pub fn intersects(&self, other: &AttributePath) -> bool {
        self.0.iter().zip(&other.0).all(|(a, b)| a.overlaps(b))
    }

    /// Fill wildcard segments, left to right, with the given keys.
    ///
    /// Surplus wildcards stay wildcards; surplus keys are an error.
    pub fn resolve_wildcards(&self, keys: &[&str]) -> Result<Self> {
        let mut keys = keys.iter();
        let mut segments = Vec::with_capacity(self.0.len());
        for segment in &self.0 {
            match segment {
                Segment::Wildcard => match keys.next() {
                    Some(key) => segments.push(Segment::literal(key)?),
                    None => segments.push(Segment::Wildcard),
                },
                literal => segments.push(literal.clone()),
            }
        }
        if keys.next().is_some() {
            return Err(CoreError::malformed(
                &self.to_string(),
                "more keys than wildcard segments",
            ));
        }
        Ok(Self(segments))
    }

    /// Literal keys of a concrete path.
    pub fn keys(&self) -> Result<Vec<&str>> {
        self.0
            .iter()
            .map(|segment| {
                segment
                    .as_literal()
                    .ok_or_else(|| CoreError::WildcardNotAllowed(self.to_string()))
            })
            .collect()
    }
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "{}", DELIMITER);
        }
        for segment in &self.0 {
            write!(f, "{}{}", DELIMITER, segment)?;
        }
        Ok(())
    }
}

impl FromStr for AttributePath {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        AttributePath::parse(s)
    }
}

impl TryFrom<String> for AttributePath {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        AttributePath::parse(&value)
    }
}

impl From<AttributePath> for String {
    fn from(path: AttributePath) -> Self {
        path.to_string()
    }
}
