//! Applying ChangeSets to a mirror.
//!
//! The mirror's tree version is the *confirmed* version: every change the
//! producer stamped at or below it is reflected in the mirror. Operations are
//! applied last-writer-by-version, so duplicates are no-ops and ChangeSets
//! may arrive in any order. Confirmation only advances over contiguous
//! ranges; a ChangeSet whose base lies beyond the confirmed version is
//! applied, buffered as a pending range, and reported as a gap so the caller
//! can request `changes_since(confirmed)`.
//!
//! Operations at or below the confirmed version are already reflected and
//! are skipped, so the mirror keeps no tombstones at or below it. A snapshot
//! replaces the mirror outright and confirms exactly its result version.

use crate::error::{Result, SyncError};
use std::collections::BTreeMap;
use tracing::{debug, warn};
use vigil_core::{AttributeTree, ChangeSet, Operation, Version};

/// What applying one ChangeSet did to the mirror.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The mirror is confirmed up to `version`.
    Applied {
        applied: usize,
        skipped: usize,
        version: Version,
    },
    /// Changes between the confirmed version and the ChangeSet's base are
    /// missing; ask the producer for everything after `resync_from`.
    Gap {
        applied: usize,
        skipped: usize,
        resync_from: Version,
    },
}

impl ApplyOutcome {
    pub fn is_gap(&self) -> bool {
        matches!(self, ApplyOutcome::Gap { .. })
    }

    pub fn resync_from(&self) -> Option<Version> {
        match self {
            ApplyOutcome::Gap { resync_from, .. } => Some(*resync_from),
            ApplyOutcome::Applied { .. } => None,
        }
    }

    /// Operations that changed the mirror.
    pub fn applied(&self) -> usize {
        match self {
            ApplyOutcome::Applied { applied, .. } | ApplyOutcome::Gap { applied, .. } => *applied,
        }
    }

    /// Operations ignored because the mirror already reflected them.
    pub fn skipped(&self) -> usize {
        match self {
            ApplyOutcome::Applied { skipped, .. } | ApplyOutcome::Gap { skipped, .. } => *skipped,
        }
    }
}

/// Per-mirror synchronization state.
#[derive(Debug, Clone, Default)]
pub struct SyncEngine {
    /// Ranges applied ahead of the confirmed version, keyed by base version.
    pending: BTreeMap<Version, Version>,
}

impl SyncEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// What a consumer that confirmed `from` needs to catch up with `tree`.
    ///
    /// Falls back to a snapshot when `from` predates the compaction horizon
    /// or lies ahead of the tree (the producer restarted).
    pub fn diff(tree: &AttributeTree, from: Version) -> Result<ChangeSet> {
        match tree.changes_since(from) {
            Ok(changes) => Ok(changes),
            Err(err) if err.requires_snapshot() => {
                debug!(from, version = tree.version(), reason = %err, "serving snapshot");
                Ok(tree.snapshot())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Apply a ChangeSet to `mirror`.
    ///
    /// The whole ChangeSet is validated before the mirror is touched.
    pub fn apply(&mut self, changes: &ChangeSet, mirror: &mut AttributeTree) -> Result<ApplyOutcome> {
        validate(changes)?;
        if changes.is_snapshot() {
            return self.apply_snapshot(changes, mirror);
        }

        let confirmed = mirror.version();
        let (applied, skipped) = apply_operations(changes.operations(), confirmed, mirror)?;
        let (base, result) = (changes.base_version(), changes.result_version());

        if base > confirmed {
            let end = self.pending.entry(base).or_insert(result);
            *end = (*end).max(result);
            warn!(confirmed, base, result, "gap in changes, resync required");
            return Ok(ApplyOutcome::Gap {
                applied,
                skipped,
                resync_from: confirmed,
            });
        }

        let version = self.confirm(mirror, result);
        debug!(base, result, applied, skipped, version, "applied changes");
        Ok(ApplyOutcome::Applied {
            applied,
            skipped,
            version,
        })
    }

    /// Replace the mirror's contents with a snapshot.
    ///
    /// The snapshot is authoritative: whatever the mirror held before, it
    /// afterwards equals the snapshot and is confirmed at exactly its result
    /// version, even when that is lower than before (the producer restarted).
    pub fn apply_snapshot(&mut self, snapshot: &ChangeSet, mirror: &mut AttributeTree) -> Result<ApplyOutcome> {
        validate(snapshot)?;
        let mut fresh = AttributeTree::new();
        let (applied, skipped) = apply_operations(snapshot.operations(), 0, &mut fresh)?;
        let version = snapshot.result_version();
        fresh.set_version(version);

        let previous = mirror.version();
        *mirror = fresh;
        self.pending.clear();
        if version < previous {
            warn!(previous, version, "snapshot rolled the mirror back");
        }
        debug!(version, applied, previous, "applied snapshot");
        Ok(ApplyOutcome::Applied {
            applied,
            skipped,
            version,
        })
    }

    /// Ranges applied but not yet confirmed, as `(base, result)`.
    pub fn pending_ranges(&self) -> impl Iterator<Item = (Version, Version)> + '_ {
        self.pending.iter().map(|(&base, &result)| (base, result))
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Forget buffered ranges, e.g. before a full resync.
    pub fn reset(&mut self) {
        self.pending.clear();
    }

    /// Advance the confirmed version to `result`, absorb every pending range
    /// that became contiguous, then drop tombstones the confirmed version
    /// now covers.
    fn confirm(&mut self, mirror: &mut AttributeTree, result: Version) -> Version {
        let mut confirmed = mirror.version().max(result);
        while let Some((&base, &end)) = self.pending.first_key_value() {
            if base > confirmed {
                break;
            }
            self.pending.remove(&base);
            confirmed = confirmed.max(end);
        }
        mirror.set_version(confirmed);
        let discarded = mirror.compact(confirmed);
        if discarded > 0 {
            debug!(confirmed, discarded, "compacted mirror tombstones");
        }
        confirmed
    }
}

fn apply_operations(
    operations: &[Operation],
    confirmed: Version,
    mirror: &mut AttributeTree,
) -> Result<(usize, usize)> {
    let mut applied = 0;
    let mut skipped = 0;
    for op in operations {
        if op.version() <= confirmed {
            skipped += 1;
            continue;
        }
        let changed = match op {
            Operation::Upsert {
                path,
                value,
                version,
            } => mirror.apply_upsert_at(path, value.clone(), *version)?,
            Operation::Remove { path, version } => mirror.apply_remove_at(path, *version)?,
        };
        if changed {
            applied += 1;
        } else {
            skipped += 1;
        }
    }
    Ok((applied, skipped))
}

fn validate(changes: &ChangeSet) -> Result<()> {
    let (base, result) = (changes.base_version(), changes.result_version());
    if result < base {
        return Err(SyncError::InvalidChangeSet(format!(
            "result version {} precedes base version {}",
            result, base
        )));
    }

    let lower = if changes.is_snapshot() { 0 } else { base };
    for op in changes.operations() {
        op.path().keys()?;
        if op.path().is_root() {
            return Err(SyncError::InvalidChangeSet(
                "operation targets the root".to_string(),
            ));
        }
        if op.version() <= lower || op.version() > result {
            return Err(SyncError::InvalidChangeSet(format!(
                "operation on {} at version {} lies outside ({}, {}]",
                op.path(),
                op.version(),
                lower,
                result
            )));
        }
        if let Operation::Upsert { path, value, .. } = op {
            value.validate(&path.to_string())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::{AttributePath, AttributeValue, CoreError};

    fn p(text: &str) -> AttributePath {
        text.parse().unwrap()
    }

    fn int(v: i64) -> AttributeValue {
        AttributeValue::from(v)
    }

    /// Producer with three commits: /a=1 (v1), /b=2 (v2), /a=3 (v3).
    fn producer() -> AttributeTree {
        let mut tree = AttributeTree::new();
        tree.upsert(&p("/a"), int(1)).unwrap();
        tree.upsert(&p("/b"), int(2)).unwrap();
        tree.upsert(&p("/a"), int(3)).unwrap();
        tree
    }

    fn range(tree: &AttributeTree, from: Version, to: Version) -> ChangeSet {
        let ops = tree
            .changes_since(from)
            .unwrap()
            .into_operations()
            .into_iter()
            .filter(|op| op.version() <= to)
            .collect();
        ChangeSet::new(from, to, ops)
    }

    #[test]
    fn test_full_diff_converges() {
        let producer = producer();
        let mut mirror = AttributeTree::new();
        let mut engine = SyncEngine::new();

        let outcome = engine
            .apply(&SyncEngine::diff(&producer, 0).unwrap(), &mut mirror)
            .unwrap();
        assert_eq!(
            outcome,
            ApplyOutcome::Applied {
                applied: 2,
                skipped: 0,
                version: 3
            }
        );
        assert_eq!(mirror.root(), producer.root());
    }

    #[test]
    fn test_duplicate_is_noop() {
        let producer = producer();
        let changes = SyncEngine::diff(&producer, 0).unwrap();
        let mut mirror = AttributeTree::new();
        let mut engine = SyncEngine::new();

        engine.apply(&changes, &mut mirror).unwrap();
        let before = mirror.clone();
        let outcome = engine.apply(&changes, &mut mirror).unwrap();

        assert_eq!(outcome.applied(), 0);
        assert_eq!(outcome.skipped(), 2);
        assert_eq!(mirror, before);
    }

    #[test]
    fn test_older_version_never_overwrites() {
        let mut mirror = AttributeTree::new();
        let mut engine = SyncEngine::new();
        let newer = ChangeSet::new(
            0,
            5,
            vec![Operation::Upsert { path: p("/uptime"), value: int(20), version: 5 }],
        );
        let older = ChangeSet::new(
            0,
            3,
            vec![Operation::Upsert { path: p("/uptime"), value: int(10), version: 3 }],
        );

        engine.apply(&newer, &mut mirror).unwrap();
        engine.apply(&older, &mut mirror).unwrap();
        assert_eq!(mirror.get(&p("/uptime")), Some(&int(20)));
        assert_eq!(mirror.version(), 5);
    }

    #[test]
    fn test_gap_then_fill() {
        let producer = producer();
        let mut mirror = AttributeTree::new();
        let mut engine = SyncEngine::new();

        let outcome = engine.apply(&range(&producer, 2, 3), &mut mirror).unwrap();
        assert_eq!(outcome.resync_from(), Some(0));
        assert_eq!(mirror.version(), 0);
        assert_eq!(engine.pending_ranges().collect::<Vec<_>>(), vec![(2, 3)]);

        let outcome = engine.apply(&range(&producer, 0, 2), &mut mirror).unwrap();
        assert!(!outcome.is_gap());
        assert_eq!(mirror.version(), 3);
        assert!(!engine.has_pending());
        assert_eq!(mirror.root(), producer.root());
    }

    #[test]
    fn test_any_order_converges() {
        let producer = producer();
        let parts = [range(&producer, 0, 1), range(&producer, 1, 2), range(&producer, 2, 3)];

        for order in [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]] {
            let mut mirror = AttributeTree::new();
            let mut engine = SyncEngine::new();
            for i in order {
                engine.apply(&parts[i], &mut mirror).unwrap();
            }
            assert_eq!(mirror.root(), producer.root(), "order {:?}", order);
            assert_eq!(mirror.version(), 3, "order {:?}", order);
        }
    }

    #[test]
    fn test_snapshot_after_compaction() {
        let mut producer = AttributeTree::new();
        producer.upsert(&p("/cpu/0/model"), "x86".into()).unwrap();
        producer.upsert(&p("/cpu/1/model"), "arm".into()).unwrap();

        let mut mirror = AttributeTree::new();
        let mut engine = SyncEngine::new();
        engine
            .apply(&SyncEngine::diff(&producer, 0).unwrap(), &mut mirror)
            .unwrap();

        producer.remove(&p("/cpu/1")).unwrap();
        producer.upsert(&p("/uptime"), int(9)).unwrap();
        producer.compact(producer.version());

        let changes = SyncEngine::diff(&producer, mirror.version()).unwrap();
        assert!(changes.is_snapshot());
        engine.apply(&changes, &mut mirror).unwrap();

        assert!(!mirror.contains(&p("/cpu/1/model")));
        assert_eq!(mirror.root(), producer.root());
        assert_eq!(mirror.version(), producer.version());
    }

    #[test]
    fn test_snapshot_replaces_mirror_after_restart() {
        let mut mirror = AttributeTree::new();
        let mut engine = SyncEngine::new();
        engine
            .apply(
                &ChangeSet::new(
                    0,
                    10,
                    vec![
                        Operation::Upsert { path: p("/uptime"), value: int(9), version: 10 },
                        Operation::Upsert { path: p("/stale"), value: int(1), version: 7 },
                    ],
                ),
                &mut mirror,
            )
            .unwrap();

        let mut restarted = AttributeTree::new();
        restarted.upsert(&p("/boot"), int(1)).unwrap();
        restarted.upsert(&p("/uptime"), int(999)).unwrap();

        let changes = SyncEngine::diff(&restarted, mirror.version()).unwrap();
        assert!(changes.is_snapshot());
        let outcome = engine.apply(&changes, &mut mirror).unwrap();

        assert_eq!(outcome, ApplyOutcome::Applied { applied: 2, skipped: 0, version: 2 });
        assert_eq!(mirror.root(), restarted.root());
        assert_eq!(mirror.version(), 2);
        assert!(!mirror.contains(&p("/stale")));

        // Later changes from the new producer continue from version 2.
        restarted.upsert(&p("/uptime"), int(1000)).unwrap();
        let outcome = engine
            .apply(&SyncEngine::diff(&restarted, mirror.version()).unwrap(), &mut mirror)
            .unwrap();
        assert!(!outcome.is_gap());
        assert_eq!(mirror.get(&p("/uptime")), Some(&int(1000)));
        assert_eq!(mirror.version(), 3);
    }

    #[test]
    fn test_snapshot_discards_pending_ranges() {
        let producer = producer();
        let mut mirror = AttributeTree::new();
        let mut engine = SyncEngine::new();

        engine.apply(&range(&producer, 2, 3), &mut mirror).unwrap();
        assert!(engine.has_pending());

        engine.apply(&producer.snapshot(), &mut mirror).unwrap();
        assert!(!engine.has_pending());
        assert_eq!(mirror.root(), producer.root());
        assert_eq!(mirror.version(), 3);
    }

    #[test]
    fn test_confirmed_tombstones_are_compacted() {
        let mut producer = AttributeTree::new();
        let mut mirror = AttributeTree::new();
        let mut engine = SyncEngine::new();

        for _ in 0..1000 {
            producer.upsert(&p("/proc/7/name"), "cron".into()).unwrap();
            producer.remove(&p("/proc/7")).unwrap();
            let changes = SyncEngine::diff(&producer, mirror.version()).unwrap();
            engine.apply(&changes, &mut mirror).unwrap();
        }
        assert_eq!(mirror.version(), 2000);
        assert!(mirror.is_empty());
        assert_eq!(mirror.tombstone_count(), 0);

        // A replayed upsert from before the remove stays dropped.
        let replay = ChangeSet::new(
            1998,
            1999,
            vec![Operation::Upsert { path: p("/proc/7/name"), value: "cron".into(), version: 1999 }],
        );
        let outcome = engine.apply(&replay, &mut mirror).unwrap();
        assert_eq!(outcome.skipped(), 1);
        assert!(mirror.is_empty());
    }

    #[test]
    fn test_pending_tombstones_survive_until_confirmed() {
        let mut producer = AttributeTree::new();
        producer.upsert(&p("/a"), int(1)).unwrap();
        producer.remove(&p("/a")).unwrap();

        let mut mirror = AttributeTree::new();
        let mut engine = SyncEngine::new();
        engine.apply(&range(&producer, 1, 2), &mut mirror).unwrap();
        assert_eq!(mirror.tombstone_count(), 1);

        // The late upsert at v1 must not resurrect /a.
        let late = ChangeSet::new(
            0,
            1,
            vec![Operation::Upsert { path: p("/a"), value: int(1), version: 1 }],
        );
        assert_eq!(engine.apply(&late, &mut mirror).unwrap().skipped(), 1);
        assert!(mirror.is_empty());
        assert_eq!(mirror.version(), 2);
        assert_eq!(mirror.tombstone_count(), 0);
    }

    #[test]
    fn test_non_finite_value_rejected() {
        let mut mirror = AttributeTree::new();
        let mut engine = SyncEngine::new();
        let changes = ChangeSet::new(
            0,
            2,
            vec![
                Operation::Upsert { path: p("/a"), value: int(1), version: 1 },
                Operation::Upsert { path: p("/load"), value: AttributeValue::Float(f64::NAN), version: 2 },
            ],
        );
        assert!(matches!(
            engine.apply(&changes, &mut mirror),
            Err(SyncError::Core(CoreError::InvalidValue { .. }))
        ));
        assert!(mirror.is_empty());
    }

    #[test]
    fn test_diff_from_future_is_snapshot() {
        let producer = producer();
        let changes = SyncEngine::diff(&producer, 40).unwrap();
        assert!(changes.is_snapshot());
        assert_eq!(changes.result_version(), 3);
    }

    #[test]
    fn test_invalid_changeset_leaves_mirror_untouched() {
        let mut mirror = AttributeTree::new();
        let mut engine = SyncEngine::new();
        let changes = ChangeSet::new(
            0,
            2,
            vec![
                Operation::Upsert { path: p("/a"), value: int(1), version: 1 },
                Operation::Upsert { path: p("/b/_"), value: int(1), version: 2 },
            ],
        );

        assert!(matches!(
            engine.apply(&changes, &mut mirror),
            Err(SyncError::Core(CoreError::WildcardNotAllowed(_)))
        ));
        assert!(mirror.is_empty());

        let outside = ChangeSet::new(
            3,
            4,
            vec![Operation::Remove { path: p("/a"), version: 2 }],
        );
        assert!(matches!(
            engine.apply(&outside, &mut mirror),
            Err(SyncError::InvalidChangeSet(_))
        ));
        assert_eq!(mirror.version(), 0);
    }
}
