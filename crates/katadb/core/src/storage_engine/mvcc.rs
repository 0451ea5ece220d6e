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

// Multi-Version Concurrency Control (MVCC) implementation
// Keyed storage of version chains for one collection. Readers resolve the
// version visible at their snapshot timestamp and never wait on commits for
// longer than a single chain lookup.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error};

use crate::error::{KataError, KataResult};
use crate::record::{Fields, PrimaryKey, Record, Version, VersionArena, VersionId};
use crate::storage_engine::transaction::{StagedWrite, Transaction};

/// Timestamp type for MVCC
pub type Timestamp = u64;

/// Head of one key's version chain
#[derive(Debug, Clone, Copy)]
struct ChainHead {
    head: VersionId,
    /// Commit timestamp of the latest put or tombstone on this key
    last_commit_ts: Timestamp,
}

#[derive(Debug, Default)]
struct StoreInner {
    arena: VersionArena,
    heads: BTreeMap<PrimaryKey, ChainHead>,
}

impl StoreInner {
    fn resolve(&self, key: &str, snapshot_ts: Timestamp) -> Option<Record> {
        let head = self.heads.get(key)?;
        let (_, version) = self.arena.chain(head.head).find(|(_, v)| v.created_ts <= snapshot_ts)?;
        version.is_visible_at(snapshot_ts).then(|| Record {
            key: key.to_string(),
            fields: version.fields.as_ref().clone(),
            committed_at: Some(version.created_ts),
            version: version.ordinal,
        })
    }

    fn walk(&self, key: &str, head: VersionId) -> KataResult<Vec<VersionId>> {
        let mut ids = Vec::new();
        let mut cursor = Some(head);
        while let Some(id) = cursor {
            let version = self
                .arena
                .get(id)
                .ok_or_else(|| KataError::Internal(format!("dangling version {id} in chain of {key}")))?;
            ids.push(id);
            cursor = version.prev;
        }
        Ok(ids)
    }
}

/// Old and new committed state of a key around one install
#[derive(Debug, Clone, Default)]
pub struct InstallOutcome {
    /// Latest committed fields before the install, `None` if absent or tombstoned
    pub old: Option<Arc<Fields>>,
    /// Fields after the install, `None` for a tombstone
    pub new: Option<Arc<Fields>>,
}

/// Committed states of a key after some snapshot, used for conflict detection
#[derive(Debug, Clone, Default)]
pub struct KeyChanges {
    /// State visible at the snapshot
    pub base: Option<Arc<Fields>>,
    /// Successive committed states after the snapshot, oldest first; `None` is a tombstone
    pub states: Vec<(Timestamp, Option<Arc<Fields>>)>,
}

impl KeyChanges {
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Commit timestamp of the newest change
    pub fn latest_ts(&self) -> Option<Timestamp> {
        self.states.last().map(|(ts, _)| *ts)
    }

    /// Latest committed state
    pub fn latest(&self) -> Option<&Arc<Fields>> {
        match self.states.last() {
            Some((_, state)) => state.as_ref(),
            None => self.base.as_ref(),
        }
    }
}

/// One retained committed version as reported by `history`
#[derive(Debug, Clone, PartialEq)]
pub struct VersionInfo {
    pub created_at: Timestamp,
    /// Set when the version was superseded or tombstoned at or before the reader's snapshot
    pub deleted_at: Option<Timestamp>,
    /// True when `deleted_at` marks a tombstone rather than a newer version
    pub tombstoned: bool,
    pub fields: Fields,
}

/// Result of one garbage collection sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcStats {
    pub keys_examined: usize,
    pub versions_reclaimed: usize,
    pub keys_removed: usize,
}

impl GcStats {
    pub fn merge(&mut self, other: &GcStats) {
        self.keys_examined += other.keys_examined;
        self.versions_reclaimed += other.versions_reclaimed;
        self.keys_removed += other.keys_removed;
    }
}

/// MVCC statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MVCCStatistics {
    /// Total number of retained versions
    pub total_versions: usize,
    /// Keys with a chain, tombstoned ones included
    pub total_keys: usize,
    /// Keys whose latest committed state is not a tombstone
    pub live_keys: usize,
    /// Average number of versions per key
    pub average_versions_per_key: f64,
}

fn staged_record(key: &str, fields: &Arc<Fields>) -> Record {
    Record {
        key: key.to_string(),
        fields: fields.as_ref().clone(),
        committed_at: None,
        version: 0,
    }
}

/// Version store of one collection
#[derive(Debug)]
pub struct VersionStore {
    collection: String,
    inner: RwLock<StoreInner>,
}

impl VersionStore {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            inner: RwLock::new(StoreInner::default()),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Read `key` as `txn` sees it, own staged writes first
    pub fn read(&self, txn: &Transaction, key: &str) -> Option<Record> {
        match txn.staged(&self.collection, key) {
            Some(StagedWrite::Put(fields)) => Some(staged_record(key, fields)),
            Some(StagedWrite::Delete) => None,
            None => self.read_at(key, txn.start_ts()),
        }
    }

    /// Read the committed version of `key` visible at `snapshot_ts`
    pub fn read_at(&self, key: &str, snapshot_ts: Timestamp) -> Option<Record> {
        self.inner.read().resolve(key, snapshot_ts)
    }

    /// Commit timestamp of the latest modification of `key`
    pub fn last_commit_ts(&self, key: &str) -> Option<Timestamp> {
        self.inner.read().heads.get(key).map(|head| head.last_commit_ts)
    }

    /// Committed states of `key` newer than `since`
    pub fn changes_since(&self, key: &str, since: Timestamp) -> KataResult<KeyChanges> {
        let inner = self.inner.read();
        let Some(head) = inner.heads.get(key) else {
            return Ok(KeyChanges::default());
        };

        let mut chain = Vec::new();
        for id in inner.walk(key, head.head)? {
            if let Some(version) = inner.arena.get(id) {
                chain.push(version);
            }
        }
        chain.reverse();

        let mut changes = KeyChanges {
            base: inner.resolve(key, since).map(|record| Arc::new(record.fields)),
            states: Vec::new(),
        };
        for (position, version) in chain.iter().enumerate() {
            if version.created_ts > since {
                changes.states.push((version.created_ts, Some(Arc::clone(&version.fields))));
            }
            if let Some(deleted) = version.deleted_ts {
                let superseded = chain.get(position + 1).is_some_and(|newer| newer.created_ts == deleted);
                if deleted > since && !superseded {
                    changes.states.push((deleted, None));
                }
            }
        }
        Ok(changes)
    }

    /// Install a committed write at `commit_ts`.
    ///
    /// A put prepends a new version and closes the previous head; a tombstone
    /// closes the head. Callers hold the commit lock and have already checked
    /// for conflicts, so any inconsistency found here is an internal error.
    pub fn install(&self, commit_ts: Timestamp, key: &str, write: &StagedWrite) -> KataResult<InstallOutcome> {
        let mut inner = self.inner.write();
        let current = inner.heads.get(key).copied();

        if let Some(head) = current {
            if head.last_commit_ts >= commit_ts {
                return Err(KataError::Internal(format!(
                    "commit {commit_ts} is not newer than {} on {}/{key}",
                    head.last_commit_ts, self.collection
                )));
            }
        }

        let old = match current {
            Some(head) => {
                let version = inner
                    .arena
                    .get(head.head)
                    .ok_or_else(|| KataError::Internal(format!("dangling head of {}/{key}", self.collection)))?;
                version.is_open().then(|| Arc::clone(&version.fields))
            }
            None => None,
        };

        match write {
            StagedWrite::Put(fields) => {
                let mut ordinal = 1;
                if let Some(head) = current {
                    if let Some(version) = inner.arena.get_mut(head.head) {
                        version.deleted_ts.get_or_insert(commit_ts);
                        ordinal = version.ordinal + 1;
                    }
                }
                let id = inner
                    .arena
                    .insert(Version::new(Arc::clone(fields), commit_ts, ordinal, current.map(|h| h.head)));
                inner.heads.insert(key.to_string(), ChainHead { head: id, last_commit_ts: commit_ts });
                Ok(InstallOutcome { old, new: Some(Arc::clone(fields)) })
            }
            StagedWrite::Delete => {
                let Some(head) = current.filter(|_| old.is_some()) else {
                    return Err(KataError::Internal(format!("tombstone on absent key {}/{key}", self.collection)));
                };
                if let Some(version) = inner.arena.get_mut(head.head) {
                    version.deleted_ts = Some(commit_ts);
                }
                inner.heads.insert(key.to_string(), ChainHead { head: head.head, last_commit_ts: commit_ts });
                Ok(InstallOutcome { old, new: None })
            }
        }
    }

    /// Lazy scan over the records `txn` sees, own staged writes merged in key order
    pub fn scan<'a, P>(&'a self, txn: &'a Transaction, predicate: P) -> Scan<'a, P>
    where
        P: FnMut(&Record) -> bool,
    {
        Scan::new(self, txn.start_ts(), Some(txn), predicate)
    }

    /// Lazy scan over committed records visible at `snapshot_ts`
    pub fn scan_at<P>(&self, snapshot_ts: Timestamp, predicate: P) -> Scan<'_, P>
    where
        P: FnMut(&Record) -> bool,
    {
        Scan::new(self, snapshot_ts, None, predicate)
    }

    fn next_key_after(&self, after: Option<&str>) -> Option<PrimaryKey> {
        let inner = self.inner.read();
        let lower = match after {
            Some(key) => Bound::Excluded(key),
            None => Bound::Unbounded,
        };
        inner.heads.range::<str, _>((lower, Bound::Unbounded)).next().map(|(key, _)| key.clone())
    }

    /// Latest committed fields of every live key, in key order
    pub fn latest_committed(&self) -> Vec<(PrimaryKey, Arc<Fields>)> {
        let inner = self.inner.read();
        inner
            .heads
            .iter()
            .filter_map(|(key, head)| {
                let version = inner.arena.get(head.head)?;
                version.is_open().then(|| (key.clone(), Arc::clone(&version.fields)))
            })
            .collect()
    }

    /// Retained committed versions of `key` created at or before `snapshot_ts`, newest first
    pub fn history(&self, key: &str, snapshot_ts: Timestamp) -> Vec<VersionInfo> {
        let inner = self.inner.read();
        let Some(head) = inner.heads.get(key) else {
            return Vec::new();
        };

        let mut history = Vec::new();
        let mut newer_created: Option<Timestamp> = None;
        for (_, version) in inner.arena.chain(head.head) {
            if version.created_ts <= snapshot_ts {
                let deleted_at = version.deleted_ts.filter(|deleted| *deleted <= snapshot_ts);
                history.push(VersionInfo {
                    created_at: version.created_ts,
                    deleted_at,
                    tombstoned: deleted_at.is_some() && deleted_at != newer_created,
                    fields: version.fields.as_ref().clone(),
                });
            }
            newer_created = Some(version.created_ts);
        }
        history
    }

    /// Drop every version no snapshot at or after `watermark` can observe.
    ///
    /// For each key the version visible at the watermark is kept and everything
    /// older goes. If that version was tombstoned at or before the watermark it
    /// goes too, and the key disappears once nothing newer remains.
    pub fn gc_sweep(&self, watermark: Timestamp) -> KataResult<GcStats> {
        let mut inner = self.inner.write();
        let mut stats = GcStats::default();
        let mut emptied = Vec::new();

        let heads: Vec<(PrimaryKey, VersionId)> = inner.heads.iter().map(|(k, h)| (k.clone(), h.head)).collect();
        for (key, head) in heads {
            stats.keys_examined += 1;
            let chain = inner.walk(&key, head)?;

            let Some(anchor_pos) = chain
                .iter()
                .position(|id| inner.arena.get(*id).is_some_and(|v| v.created_ts <= watermark))
            else {
                continue;
            };
            let anchor = chain[anchor_pos];
            let anchor_dead = inner
                .arena
                .get(anchor)
                .is_some_and(|v| v.deleted_ts.is_some_and(|deleted| deleted <= watermark));

            let first_dropped = if anchor_dead { anchor_pos } else { anchor_pos + 1 };
            if first_dropped >= chain.len() {
                continue;
            }

            for id in &chain[first_dropped..] {
                if inner.arena.remove(*id).is_none() {
                    return Err(KataError::Internal(format!("version {id} of {}/{key} vanished during GC", self.collection)));
                }
                stats.versions_reclaimed += 1;
            }

            if first_dropped == 0 {
                emptied.push(key);
            } else if let Some(survivor) = inner.arena.get_mut(chain[first_dropped - 1]) {
                survivor.prev = None;
            }
        }

        for key in emptied {
            inner.heads.remove(&key);
            stats.keys_removed += 1;
        }

        if stats.versions_reclaimed > 0 {
            debug!(collection = %self.collection, watermark, reclaimed = stats.versions_reclaimed, keys_removed = stats.keys_removed, "gc sweep");
        }
        Ok(stats)
    }

    /// Verify chain ordering for every key: strictly decreasing `created_ts`, at most one open version
    pub fn check_chains(&self) -> KataResult<()> {
        let inner = self.inner.read();
        for (key, head) in &inner.heads {
            let mut newer: Option<Timestamp> = None;
            let mut open = 0;
            for id in inner.walk(key, head.head)? {
                let Some(version) = inner.arena.get(id) else { continue };
                if newer.is_some_and(|ts| version.created_ts >= ts) {
                    error!(collection = %self.collection, key = %key, "version chain out of order");
                    return Err(KataError::Internal(format!("chain of {}/{key} is out of order", self.collection)));
                }
                open += usize::from(version.is_open());
                newer = Some(version.created_ts);
            }
            if open > 1 {
                return Err(KataError::Internal(format!("chain of {}/{key} has {open} open versions", self.collection)));
            }
        }
        Ok(())
    }

    /// Get MVCC statistics
    pub fn statistics(&self) -> MVCCStatistics {
        let inner = self.inner.read();
        let total_versions = inner.arena.len();
        let total_keys = inner.heads.len();
        let live_keys = inner
            .heads
            .values()
            .filter(|head| inner.arena.get(head.head).is_some_and(Version::is_open))
            .count();

        MVCCStatistics {
            total_versions,
            total_keys,
            live_keys,
            average_versions_per_key: if total_keys > 0 { total_versions as f64 / total_keys as f64 } else { 0.0 },
        }
    }

    /// Number of keys with a chain, tombstoned ones included
    pub fn key_count(&self) -> usize {
        self.inner.read().heads.len()
    }

    /// Keys of the collection with a chain, in order
    pub fn keys(&self) -> BTreeSet<PrimaryKey> {
        self.inner.read().heads.keys().cloned().collect()
    }
}

/// Lazy, restartable scan over one collection.
///
/// Each step takes the store's read lock only long enough to locate the next
/// key, so commits interleave freely. What the scan yields depends only on
/// its snapshot timestamp.
pub struct Scan<'a, P> {
    store: &'a VersionStore,
    snapshot_ts: Timestamp,
    overlay: Option<&'a Transaction>,
    predicate: P,
    cursor: Option<PrimaryKey>,
    exhausted: bool,
}

impl<'a, P> Scan<'a, P>
where
    P: FnMut(&Record) -> bool,
{
    fn new(store: &'a VersionStore, snapshot_ts: Timestamp, overlay: Option<&'a Transaction>, predicate: P) -> Self {
        Self {
            store,
            snapshot_ts,
            overlay,
            predicate,
            cursor: None,
            exhausted: false,
        }
    }

    /// Rewind to the first key
    pub fn restart(&mut self) {
        self.cursor = None;
        self.exhausted = false;
    }

    /// Last key the scan moved past
    pub fn position(&self) -> Option<&str> {
        self.cursor.as_deref()
    }
}

impl<P> Iterator for Scan<'_, P>
where
    P: FnMut(&Record) -> bool,
{
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        while !self.exhausted {
            let after = self.cursor.as_deref();
            let committed = self.store.next_key_after(after);
            let staged = self
                .overlay
                .and_then(|txn| txn.next_staged_after(&self.store.collection, after))
                .map(|(key, write)| (key.clone(), write));

            let (key, staged_write) = match (committed, staged) {
                (None, None) => {
                    self.exhausted = true;
                    return None;
                }
                (Some(c), Some((s, write))) if s <= c => (s, Some(write)),
                (Some(c), _) => (c, None),
                (None, Some((s, write))) => (s, Some(write)),
            };

            let record = match staged_write {
                Some(StagedWrite::Put(fields)) => Some(staged_record(&key, fields)),
                Some(StagedWrite::Delete) => None,
                None => self.store.read_at(&key, self.snapshot_ts),
            };
            self.cursor = Some(key);

            if let Some(record) = record {
                if (self.predicate)(&record) {
                    return Some(record);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Value;
    use crate::storage_engine::transaction::TransactionManager;

    fn fields(n: i64) -> Arc<Fields> {
        Arc::new(Fields::from([("n".to_string(), Value::Integer(n))]))
    }

    fn put(n: i64) -> StagedWrite {
        StagedWrite::Put(fields(n))
    }

    fn n_of(record: &Record) -> i64 {
        record.get("n").and_then(Value::as_i64).unwrap()
    }

    #[test]
    fn test_read_resolves_snapshot_version() {
        let store = VersionStore::new("c");
        store.install(1, "a", &put(1)).unwrap();
        store.install(3, "a", &put(3)).unwrap();

        assert!(store.read_at("a", 0).is_none());
        assert_eq!(n_of(&store.read_at("a", 1).unwrap()), 1);
        assert_eq!(n_of(&store.read_at("a", 2).unwrap()), 1);
        let latest = store.read_at("a", 3).unwrap();
        assert_eq!(n_of(&latest), 3);
        assert_eq!(latest.committed_at, Some(3));
        assert_eq!(latest.version, 2);
    }

    #[test]
    fn test_tombstone_hides_key_from_later_snapshots() {
        let store = VersionStore::new("c");
        store.install(1, "a", &put(1)).unwrap();
        let outcome = store.install(2, "a", &StagedWrite::Delete).unwrap();

        assert!(outcome.old.is_some());
        assert!(outcome.new.is_none());
        assert!(store.read_at("a", 1).is_some());
        assert!(store.read_at("a", 2).is_none());
        assert!(store.latest_committed().is_empty());
        assert_eq!(store.last_commit_ts("a"), Some(2));
    }

    #[test]
    fn test_tombstone_on_absent_key_is_internal_error() {
        let store = VersionStore::new("c");
        assert!(matches!(store.install(1, "a", &StagedWrite::Delete), Err(KataError::Internal(_))));
    }

    #[test]
    fn test_install_rejects_out_of_order_commit() {
        let store = VersionStore::new("c");
        store.install(5, "a", &put(1)).unwrap();
        assert!(matches!(store.install(5, "a", &put(2)), Err(KataError::Internal(_))));
        store.check_chains().unwrap();
    }

    #[test]
    fn test_read_your_own_writes_overlay() {
        let manager = Arc::new(TransactionManager::new());
        let store = VersionStore::new("c");
        store.install(1, "a", &put(1)).unwrap();
        manager.publish(1);

        let mut txn = manager.begin();
        txn.stage_write("c", "a".to_string(), put(7)).unwrap();
        txn.stage_write("c", "b".to_string(), put(8)).unwrap();

        let own = store.read(&txn, "a").unwrap();
        assert_eq!(n_of(&own), 7);
        assert!(own.is_staged());
        assert_eq!(own.version, 0);

        txn.stage_write("c", "a".to_string(), StagedWrite::Delete).unwrap();
        assert!(store.read(&txn, "a").is_none());
        assert!(store.read(&txn, "b").is_some());
    }

    #[test]
    fn test_scan_merges_staged_writes_in_key_order() {
        let manager = Arc::new(TransactionManager::new());
        let store = VersionStore::new("c");
        for (ts, key) in ["b", "d", "f"].iter().enumerate() {
            store.install(ts as u64 + 1, key, &put(ts as i64)).unwrap();
        }
        manager.publish(3);

        let mut txn = manager.begin();
        txn.stage_write("c", "a".to_string(), put(10)).unwrap();
        txn.stage_write("c", "d".to_string(), StagedWrite::Delete).unwrap();
        txn.stage_write("c", "e".to_string(), put(11)).unwrap();
        txn.stage_write("other", "c".to_string(), put(12)).unwrap();

        let keys: Vec<String> = store.scan(&txn, |_| true).map(|r| r.key).collect();
        assert_eq!(keys, vec!["a", "b", "e", "f"]);

        let big: Vec<String> = store.scan(&txn, |r| n_of(r) >= 10).map(|r| r.key).collect();
        assert_eq!(big, vec!["a", "e"]);
    }

    #[test]
    fn test_scan_is_restartable_and_ignores_later_commits() {
        let store = VersionStore::new("c");
        store.install(1, "a", &put(1)).unwrap();
        store.install(2, "b", &put(2)).unwrap();

        let mut scan = store.scan_at(2, |_| true);
        assert_eq!(scan.next().unwrap().key, "a");
        store.install(3, "c", &put(3)).unwrap();
        store.install(4, "b", &put(4)).unwrap();

        let rest: Vec<Record> = scan.by_ref().collect();
        assert_eq!(rest.len(), 1);
        assert_eq!(n_of(&rest[0]), 2);

        scan.restart();
        assert_eq!(scan.count(), 2);
    }

    #[test]
    fn test_changes_since_reports_puts_and_tombstones() {
        let store = VersionStore::new("c");
        store.install(1, "a", &put(1)).unwrap();
        store.install(2, "a", &put(2)).unwrap();
        store.install(3, "a", &StagedWrite::Delete).unwrap();
        store.install(4, "a", &put(4)).unwrap();

        let changes = store.changes_since("a", 1).unwrap();
        assert_eq!(changes.base, Some(fields(1)));
        let states: Vec<(Timestamp, bool)> = changes.states.iter().map(|(ts, s)| (*ts, s.is_some())).collect();
        assert_eq!(states, vec![(2, true), (3, false), (4, true)]);
        assert_eq!(changes.latest_ts(), Some(4));

        assert!(store.changes_since("a", 4).unwrap().is_empty());
    }

    #[test]
    fn test_gc_keeps_version_visible_at_watermark() {
        let store = VersionStore::new("c");
        store.install(1, "a", &put(1)).unwrap();
        store.install(2, "a", &put(2)).unwrap();
        store.install(3, "a", &put(3)).unwrap();

        let before = store.read_at("a", 2);
        let stats = store.gc_sweep(2).unwrap();

        assert_eq!(stats.versions_reclaimed, 1);
        assert_eq!(store.read_at("a", 2), before);
        assert_eq!(before.unwrap().version, 2);
        let latest = store.read_at("a", 3).unwrap();
        assert_eq!(n_of(&latest), 3);
        assert_eq!(latest.version, 3);
        assert_eq!(store.statistics().total_versions, 2);
        store.check_chains().unwrap();
    }

    #[test]
    fn test_gc_drops_keys_tombstoned_before_watermark() {
        let store = VersionStore::new("c");
        store.install(1, "a", &put(1)).unwrap();
        store.install(2, "a", &StagedWrite::Delete).unwrap();
        store.install(3, "b", &put(3)).unwrap();

        assert_eq!(store.gc_sweep(1).unwrap().versions_reclaimed, 0);
        let stats = store.gc_sweep(3).unwrap();
        assert_eq!(stats.keys_removed, 1);
        assert!(store.keys().iter().eq(["b".to_string()].iter()));

        let again = store.gc_sweep(3).unwrap();
        assert_eq!(again.versions_reclaimed, 0);
    }

    #[test]
    fn test_gc_after_reinsert_keeps_new_chain() {
        let store = VersionStore::new("c");
        store.install(1, "a", &put(1)).unwrap();
        store.install(2, "a", &StagedWrite::Delete).unwrap();
        store.install(3, "a", &put(3)).unwrap();

        let stats = store.gc_sweep(3).unwrap();
        assert_eq!(stats.versions_reclaimed, 1);
        assert_eq!(stats.keys_removed, 0);
        assert_eq!(store.history("a", 3).len(), 1);
        assert_eq!(store.read_at("a", 3).unwrap().version, 2);
    }

    #[test]
    fn test_history_marks_tombstones() {
        let store = VersionStore::new("c");
        store.install(1, "a", &put(1)).unwrap();
        store.install(2, "a", &put(2)).unwrap();
        store.install(3, "a", &StagedWrite::Delete).unwrap();

        let history = store.history("a", 3);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].created_at, 2);
        assert_eq!(history[0].deleted_at, Some(3));
        assert!(history[0].tombstoned);
        assert_eq!(history[1].deleted_at, Some(2));
        assert!(!history[1].tombstoned);

        let early = store.history("a", 2);
        assert_eq!(early[0].deleted_at, None);
    }
}
