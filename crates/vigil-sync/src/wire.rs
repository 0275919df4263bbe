//! ChangeSet wire contract.
//!
//! What the transport carries between producer and consumer:
//!
//! ```text
//! {
//!   "baseVersion": 4,
//!   "resultVersion": 6,
//!   "operations": [
//!     {"op": "upsert", "path": "/memory/usage", "value": {"type": "integer", "data": 42}, "version": 5},
//!     {"op": "remove", "path": "/cpu/1/model", "version": 6}
//!   ]
//! }
//! ```
//!
//! An upsert without `value` declares the leaf as absent. Paths must be
//! concrete and operation versions must lie in `(baseVersion, resultVersion]`.

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use vigil_core::{AttributePath, AttributeValue, ChangeSet, Operation, Version};

/// Operation discriminator on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Upsert,
    Remove,
}

/// One operation record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OperationWire {
    pub op: OpKind,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<AttributeValue>,
    pub version: Version,
}

/// A ChangeSet as it travels.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSetWire {
    pub base_version: Version,
    pub result_version: Version,
    #[serde(default, skip_serializing_if = "is_false")]
    pub snapshot: bool,
    pub operations: Vec<OperationWire>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl From<&Operation> for OperationWire {
    fn from(op: &Operation) -> Self {
        match op {
            Operation::Upsert { path, value, version } => OperationWire {
                op: OpKind::Upsert,
                path: path.to_string(),
                value: (!value.is_absent()).then(|| value.clone()),
                version: *version,
            },
            Operation::Remove { path, version } => OperationWire {
                op: OpKind::Remove,
                path: path.to_string(),
                value: None,
                version: *version,
            },
        }
    }
}

impl TryFrom<OperationWire> for Operation {
    type Error = SyncError;

    fn try_from(wire: OperationWire) -> Result<Self> {
        let path = AttributePath::parse(&wire.path)?;
        path.keys()?;
        if path.is_root() {
            return Err(SyncError::InvalidChangeSet(
                "operation targets the root".to_string(),
            ));
        }

        match wire.op {
            OpKind::Upsert => Ok(Operation::Upsert {
                path,
                value: wire.value.unwrap_or_default(),
                version: wire.version,
            }),
            OpKind::Remove if wire.value.is_some() => Err(SyncError::InvalidChangeSet(format!(
                "remove of {} carries a value",
                wire.path
            ))),
            OpKind::Remove => Ok(Operation::Remove {
                path,
                version: wire.version,
            }),
        }
    }
}

impl From<&ChangeSet> for ChangeSetWire {
    fn from(cs: &ChangeSet) -> Self {
        ChangeSetWire {
            base_version: cs.base_version(),
            result_version: cs.result_version(),
            snapshot: cs.is_snapshot(),
            operations: cs.operations().iter().map(OperationWire::from).collect(),
        }
    }
}

impl TryFrom<ChangeSetWire> for ChangeSet {
    type Error = SyncError;

    fn try_from(wire: ChangeSetWire) -> Result<Self> {
        if wire.result_version < wire.base_version {
            return Err(SyncError::InvalidChangeSet(format!(
                "result version {} precedes base version {}",
                wire.result_version, wire.base_version
            )));
        }

        let operations = wire
            .operations
            .into_iter()
            .map(Operation::try_from)
            .collect::<Result<Vec<_>>>()?;

        let lower = if wire.snapshot { 0 } else { wire.base_version };
        if let Some(op) = operations
            .iter()
            .find(|op| op.version() <= lower || op.version() > wire.result_version)
        {
            return Err(SyncError::InvalidChangeSet(format!(
                "operation on {} at version {} lies outside ({}, {}]",
                op.path(),
                op.version(),
                lower,
                wire.result_version
            )));
        }

        Ok(if wire.snapshot {
            ChangeSet::snapshot(wire.result_version, operations)
        } else {
            ChangeSet::new(wire.base_version, wire.result_version, operations)
        })
    }
}

/// Serialize a ChangeSet for the transport.
pub fn encode(cs: &ChangeSet) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&ChangeSetWire::from(cs))?)
}

/// Parse and validate a ChangeSet received from the transport.
pub fn decode(bytes: &[u8]) -> Result<ChangeSet> {
    let wire: ChangeSetWire = serde_json::from_slice(bytes)?;
    ChangeSet::try_from(wire)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use vigil_core::{AttributeTree, CoreError};

    fn p(text: &str) -> AttributePath {
        text.parse().unwrap()
    }

    #[test]
    fn test_wire_layout() {
        let mut tree = AttributeTree::new();
        tree.upsert(&p("/memory/usage"), 42i64.into()).unwrap();
        tree.declare(&p("/memory/swap")).unwrap();
        tree.upsert(&p("/uptime"), Duration::from_secs(2).into()).unwrap();

        let bytes = encode(&tree.changes_since(0).unwrap()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            value,
            json!({
                "baseVersion": 0,
                "resultVersion": 3,
                "operations": [
                    {"op": "upsert", "path": "/memory/usage", "value": {"type": "integer", "data": 42}, "version": 1},
                    {"op": "upsert", "path": "/memory/swap", "version": 2},
                    {"op": "upsert", "path": "/uptime", "value": {"type": "duration", "data": 2000}, "version": 3}
                ]
            })
        );
    }

    #[test]
    fn test_decode_restores_changeset() {
        let mut tree = AttributeTree::new();
        tree.upsert(&p("/cpu/0/model"), "x86".into()).unwrap();
        tree.upsert(&p("/cpu/1/model"), "arm".into()).unwrap();
        tree.remove(&p("/cpu/1")).unwrap();

        let original = tree.changes_since(0).unwrap();
        let decoded = decode(&encode(&original).unwrap()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_decode_rejects_unknown_type_tag() {
        let bytes = br#"{"baseVersion":0,"resultVersion":1,"operations":[
            {"op":"upsert","path":"/a","value":{"type":"blob","data":"x"},"version":1}]}"#;
        assert!(matches!(decode(bytes), Err(SyncError::Codec(_))));
    }

    #[test]
    fn test_decode_rejects_malformed_and_pattern_paths() {
        let malformed = br#"{"baseVersion":0,"resultVersion":1,"operations":[
            {"op":"remove","path":"/a//b","version":1}]}"#;
        assert!(matches!(
            decode(malformed),
            Err(SyncError::Core(CoreError::MalformedPath { .. }))
        ));

        let pattern = br#"{"baseVersion":0,"resultVersion":1,"operations":[
            {"op":"remove","path":"/cpu/_","version":1}]}"#;
        assert!(matches!(
            decode(pattern),
            Err(SyncError::Core(CoreError::WildcardNotAllowed(_)))
        ));
    }

    #[test]
    fn test_decode_rejects_versions_outside_range() {
        let beyond = br#"{"baseVersion":2,"resultVersion":3,"operations":[
            {"op":"upsert","path":"/a","value":{"type":"bool","data":true},"version":9}]}"#;
        assert!(matches!(decode(beyond), Err(SyncError::InvalidChangeSet(_))));

        let backwards = br#"{"baseVersion":5,"resultVersion":3,"operations":[]}"#;
        assert!(matches!(decode(backwards), Err(SyncError::InvalidChangeSet(_))));
    }

    #[test]
    fn test_remove_with_value_rejected() {
        let bytes = br#"{"baseVersion":0,"resultVersion":1,"operations":[
            {"op":"remove","path":"/a","value":{"type":"integer","data":1},"version":1}]}"#;
        assert!(matches!(decode(bytes), Err(SyncError::InvalidChangeSet(_))));
    }

    #[test]
    fn test_snapshot_flag_survives() {
        let mut tree = AttributeTree::new();
        tree.upsert(&p("/a"), 1i64.into()).unwrap();
        let decoded = decode(&encode(&tree.snapshot()).unwrap()).unwrap();
        assert!(decoded.is_snapshot());
        assert_eq!(decoded.len(), 1);
    }
}
