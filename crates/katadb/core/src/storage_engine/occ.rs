// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Optimistic Concurrency Control (OCC)
//!
//! Transactions never lock while they run. At commit, inside the commit
//! critical section, every staged write is validated against what other
//! transactions committed after the writer's snapshot:
//!
//! 1. **Record granularity**: any committed change to the key after
//!    `start_ts` is a conflict (first committer wins).
//! 2. **Field granularity**: changes conflict only when the field sets they
//!    touch overlap. Tombstones and concurrent creations always conflict.
//!    A surviving write is rebased onto the latest committed record.
//!
//! Validation only reads the version store, so a rejected commit leaves no trace.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::warn;

use crate::config::ConflictGranularity;
use crate::error::{KataError, KataResult};
use crate::record::Fields;
use crate::storage_engine::mvcc::{KeyChanges, Timestamp, VersionStore};
use crate::storage_engine::transaction::StagedWrite;

/// Why a staged write was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictType {
    /// The key changed after the snapshot
    WriteWrite { committed_ts: Timestamp },
    /// Both sides changed the same fields
    FieldOverlap { committed_ts: Timestamp, fields: BTreeSet<String> },
    /// One side deleted or created the record
    Existence { committed_ts: Timestamp },
}

impl ConflictType {
    pub fn committed_ts(&self) -> Timestamp {
        match self {
            ConflictType::WriteWrite { committed_ts }
            | ConflictType::FieldOverlap { committed_ts, .. }
            | ConflictType::Existence { committed_ts } => *committed_ts,
        }
    }
}

/// A validated write, ready to install
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub write: StagedWrite,
    /// Whether the write was rebased onto concurrent committed changes
    pub merged: bool,
}

/// OCC statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OCCStatistics {
    /// Writes validated
    pub validations: u64,
    /// Commits rejected
    pub conflicts: u64,
    /// Writes rebased under field granularity
    pub merges: u64,
}

/// Validates staged writes against the version store
#[derive(Debug, Clone, Copy)]
pub struct ConflictDetector {
    granularity: ConflictGranularity,
}

impl ConflictDetector {
    pub fn new(granularity: ConflictGranularity) -> Self {
        Self { granularity }
    }

    pub fn granularity(&self) -> ConflictGranularity {
        self.granularity
    }

    /// Validate one staged write of a transaction that started at `start_ts`
    pub fn validate(&self, store: &VersionStore, start_ts: Timestamp, key: &str, write: &StagedWrite) -> KataResult<Resolution> {
        let outcome = match self.granularity {
            ConflictGranularity::Record => self.check_record(store, start_ts, key, write),
            ConflictGranularity::Field => self.check_fields(store, start_ts, key, write)?,
        };

        outcome.map_err(|conflict| {
            warn!(collection = store.collection(), key, start_ts, conflict = ?conflict, "write-write conflict");
            KataError::Conflict {
                collection: store.collection().to_string(),
                key: key.to_string(),
                start_ts,
                committed_ts: conflict.committed_ts(),
            }
        })
    }

    fn check_record(&self, store: &VersionStore, start_ts: Timestamp, key: &str, write: &StagedWrite) -> Result<Resolution, ConflictType> {
        match store.last_commit_ts(key) {
            Some(committed_ts) if committed_ts > start_ts => Err(ConflictType::WriteWrite { committed_ts }),
            _ => Ok(Resolution { write: write.clone(), merged: false }),
        }
    }

    fn check_fields(
        &self,
        store: &VersionStore,
        start_ts: Timestamp,
        key: &str,
        write: &StagedWrite,
    ) -> KataResult<Result<Resolution, ConflictType>> {
        let changes = store.changes_since(key, start_ts)?;
        let Some(committed_ts) = changes.latest_ts() else {
            return Ok(Ok(Resolution { write: write.clone(), merged: false }));
        };
        Ok(rebase(&changes, committed_ts, write))
    }
}

/// Rebase `write` onto committed changes made after its snapshot
fn rebase(changes: &KeyChanges, committed_ts: Timestamp, write: &StagedWrite) -> Result<Resolution, ConflictType> {
    let ours = match write {
        StagedWrite::Put(fields) => fields,
        StagedWrite::Delete => return Err(ConflictType::Existence { committed_ts }),
    };
    let Some(base) = changes.base.as_deref() else {
        return Err(ConflictType::Existence { committed_ts });
    };

    let mut theirs = BTreeSet::new();
    let mut previous = base;
    for (_, state) in &changes.states {
        let Some(state) = state.as_deref() else {
            return Err(ConflictType::Existence { committed_ts });
        };
        theirs.extend(changed_fields(previous, state));
        previous = state;
    }

    let mine = changed_fields(base, ours);
    let overlap: BTreeSet<String> = mine.intersection(&theirs).cloned().collect();
    if !overlap.is_empty() {
        return Err(ConflictType::FieldOverlap { committed_ts, fields: overlap });
    }

    let mut merged = previous.clone();
    for field in &mine {
        match ours.get(field) {
            Some(value) => merged.insert(field.clone(), value.clone()),
            None => merged.remove(field),
        };
    }
    Ok(Resolution { write: StagedWrite::Put(Arc::new(merged)), merged: true })
}

/// Fields whose value differs between two states, including additions and removals
pub fn changed_fields(before: &Fields, after: &Fields) -> BTreeSet<String> {
    before
        .keys()
        .chain(after.keys())
        .filter(|field| before.get(*field) != after.get(*field))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Value;

    fn put(pairs: &[(&str, i64)]) -> StagedWrite {
        StagedWrite::Put(Arc::new(pairs.iter().map(|(k, v)| (k.to_string(), Value::Integer(*v))).collect()))
    }

    fn seeded() -> VersionStore {
        let store = VersionStore::new("c");
        store.install(1, "k", &put(&[("a", 1), ("b", 1)])).unwrap();
        store
    }

    #[test]
    fn test_record_granularity_first_committer_wins() {
        let store = seeded();
        store.install(2, "k", &put(&[("a", 2), ("b", 1)])).unwrap();
        let detector = ConflictDetector::new(ConflictGranularity::Record);

        let err = detector.validate(&store, 1, "k", &put(&[("a", 1), ("b", 9)])).unwrap_err();
        assert!(matches!(err, KataError::Conflict { committed_ts: 2, start_ts: 1, .. }));

        let ok = detector.validate(&store, 2, "k", &put(&[("a", 3)])).unwrap();
        assert!(!ok.merged);
    }

    #[test]
    fn test_record_granularity_new_key_is_clean() {
        let store = seeded();
        let detector = ConflictDetector::new(ConflictGranularity::Record);
        assert!(detector.validate(&store, 1, "fresh", &put(&[("a", 1)])).is_ok());
    }

    #[test]
    fn test_field_granularity_merges_disjoint_changes() {
        let store = seeded();
        store.install(2, "k", &put(&[("a", 2), ("b", 1)])).unwrap();
        let detector = ConflictDetector::new(ConflictGranularity::Field);

        let resolution = detector.validate(&store, 1, "k", &put(&[("a", 1), ("b", 9)])).unwrap();
        assert!(resolution.merged);
        assert_eq!(resolution.write, put(&[("a", 2), ("b", 9)]));
    }

    #[test]
    fn test_field_granularity_rejects_overlap() {
        let store = seeded();
        store.install(2, "k", &put(&[("a", 2), ("b", 1)])).unwrap();
        let detector = ConflictDetector::new(ConflictGranularity::Field);

        let err = detector.validate(&store, 1, "k", &put(&[("a", 5), ("b", 1)])).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_field_granularity_merge_keeps_removals() {
        let store = seeded();
        store.install(2, "k", &put(&[("a", 2), ("b", 1)])).unwrap();
        let detector = ConflictDetector::new(ConflictGranularity::Field);

        let resolution = detector.validate(&store, 1, "k", &put(&[("a", 1)])).unwrap();
        assert_eq!(resolution.write, put(&[("a", 2)]));
    }

    #[test]
    fn test_field_granularity_tombstones_always_conflict() {
        let store = seeded();
        store.install(2, "k", &put(&[("a", 1), ("b", 2)])).unwrap();
        let detector = ConflictDetector::new(ConflictGranularity::Field);
        assert!(detector.validate(&store, 1, "k", &StagedWrite::Delete).is_err());

        store.install(3, "k", &StagedWrite::Delete).unwrap();
        assert!(detector.validate(&store, 2, "k", &put(&[("a", 7), ("b", 2)])).is_err());
    }

    #[test]
    fn test_field_granularity_concurrent_creation_conflicts() {
        let store = VersionStore::new("c");
        store.install(2, "k", &put(&[("a", 1)])).unwrap();
        let detector = ConflictDetector::new(ConflictGranularity::Field);
        assert!(detector.validate(&store, 1, "k", &put(&[("b", 1)])).is_err());
    }

    #[test]
    fn test_changed_fields_covers_additions_and_removals() {
        let before: Fields = [("a".to_string(), Value::Integer(1)), ("b".to_string(), Value::Integer(1))].into();
        let after: Fields = [("a".to_string(), Value::Integer(1)), ("c".to_string(), Value::Integer(1))].into();
        let changed: Vec<String> = changed_fields(&before, &after).into_iter().collect();
        assert_eq!(changed, vec!["b", "c"]);
    }
}
