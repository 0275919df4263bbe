//! Typed attribute values.
//!
//! Values serialize with an explicit type tag so a consumer never has to
//! guess whether `"42"` was a string or a number:
//!
//! ```text
//! {"type": "integer",  "data": 42}
//! {"type": "duration", "data": 1500}      // milliseconds
//! {"type": "absent"}
//! ```
//!
//! Durations have millisecond resolution: finer parts are dropped when a
//! value is stored, so a producer and its mirrors hold the same value.
//! Floats must be finite.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// The value held by a leaf.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum AttributeValue {
    Integer(i64),
    Float(f64),
    String(String),
    #[serde(rename = "bool")]
    Boolean(bool),
    Duration(#[serde(with = "duration_millis")] Duration),
    /// Declared in the namespace but never sampled; shown as pending.
    #[default]
    Absent,
}

impl AttributeValue {
    pub fn is_absent(&self) -> bool {
        matches!(self, AttributeValue::Absent)
    }

    /// The wire type tag.
    pub fn type_name(&self) -> &'static str {
        match self {
            AttributeValue::Integer(_) => "integer",
            AttributeValue::Float(_) => "float",
            AttributeValue::String(_) => "string",
            AttributeValue::Boolean(_) => "bool",
            AttributeValue::Duration(_) => "duration",
            AttributeValue::Absent => "absent",
        }
    }

    /// The form a leaf stores: durations truncated to whole milliseconds.
    /// Non-finite floats have no wire form and are rejected.
    pub fn into_stored(self, path: &str) -> Result<Self> {
        self.validate(path)?;
        match self {
            AttributeValue::Duration(d) => Ok(AttributeValue::Duration(truncate_millis(d))),
            other => Ok(other),
        }
    }

    /// Reject values that cannot be stored or sent.
    pub fn validate(&self, path: &str) -> Result<()> {
        match self {
            AttributeValue::Float(f) if !f.is_finite() => Err(CoreError::InvalidValue {
                path: path.to_string(),
                reason: format!("float {} is not finite", f),
            }),
            _ => Ok(()),
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            AttributeValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            AttributeValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            AttributeValue::Duration(d) => Some(*d),
            _ => None,
        }
    }
}

/// Floats compare by bit pattern, so a value always equals itself.
impl PartialEq for AttributeValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (AttributeValue::Integer(a), AttributeValue::Integer(b)) => a == b,
            (AttributeValue::Float(a), AttributeValue::Float(b)) => a.to_bits() == b.to_bits(),
            (AttributeValue::String(a), AttributeValue::String(b)) => a == b,
            (AttributeValue::Boolean(a), AttributeValue::Boolean(b)) => a == b,
            (AttributeValue::Duration(a), AttributeValue::Duration(b)) => a == b,
            (AttributeValue::Absent, AttributeValue::Absent) => true,
            _ => false,
        }
    }
}

fn truncate_millis(duration: Duration) -> Duration {
    Duration::from_millis(duration.as_millis().min(u64::MAX as u128) as u64)
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Integer(i) => write!(f, "{}", i),
            AttributeValue::Float(v) => write!(f, "{}", v),
            AttributeValue::String(s) => write!(f, "{}", s),
            AttributeValue::Boolean(b) => write!(f, "{}", b),
            AttributeValue::Duration(d) => write!(f, "{:?}", d),
            AttributeValue::Absent => write!(f, "pending"),
        }
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Integer(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Float(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Boolean(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

impl From<Duration> for AttributeValue {
    fn from(value: Duration) -> Self {
        AttributeValue::Duration(value)
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
