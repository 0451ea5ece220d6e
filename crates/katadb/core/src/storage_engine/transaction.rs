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

// Transaction management module
// Issues timestamps, tracks the registry of live transactions and owns the
// per-transaction write set. Nothing here touches shared record state: writes
// are only staged, and become visible when the database installs them at commit.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{KataError, KataResult};
use crate::record::{Fields, PrimaryKey};
use crate::storage_engine::mvcc::Timestamp;

/// Transaction identifier type
pub type TransactionId = u64;

/// Transaction state. `Committed` and `Aborted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction can read and stage writes
    Active,
    /// All staged writes were installed
    Committed,
    /// Staged writes were discarded
    Aborted,
}

/// A write waiting in a transaction's write set
#[derive(Debug, Clone, PartialEq)]
pub enum StagedWrite {
    /// Replace the record with these fields
    Put(Arc<Fields>),
    /// Tombstone the record
    Delete,
}

impl StagedWrite {
    pub fn fields(&self) -> Option<&Arc<Fields>> {
        match self {
            StagedWrite::Put(fields) => Some(fields),
            StagedWrite::Delete => None,
        }
    }
}

/// Write set keyed by (collection, primary key), in deterministic install order
pub type WriteSet = BTreeMap<(String, PrimaryKey), StagedWrite>;

/// Handle to a transaction, owned by the caller.
///
/// The snapshot boundary is `start_ts`: every version committed at or before
/// it is visible, nothing committed later is. Dropping a handle that is still
/// active deregisters it, which is equivalent to an abort.
pub struct Transaction {
    id: TransactionId,
    start_ts: Timestamp,
    state: TransactionState,
    commit_ts: Option<Timestamp>,
    write_set: WriteSet,
    manager: Arc<TransactionManager>,
}

impl Transaction {
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Snapshot timestamp of this transaction
    pub fn start_ts(&self) -> Timestamp {
        self.start_ts
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Commit timestamp, once committed
    pub fn commit_ts(&self) -> Option<Timestamp> {
        self.commit_ts
    }

    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    pub fn write_set(&self) -> &WriteSet {
        &self.write_set
    }

    /// Staged write for a key, if this transaction wrote it
    pub fn staged(&self, collection: &str, key: &str) -> Option<&StagedWrite> {
        // BTreeMap lookups by tuple need owned keys
        self.write_set.get(&(collection.to_string(), key.to_string()))
    }

    /// Staged writes of one collection, ordered by key
    pub fn staged_in<'a>(&'a self, collection: &'a str) -> impl Iterator<Item = (&'a PrimaryKey, &'a StagedWrite)> + 'a {
        self.write_set
            .range((Bound::Included((collection.to_string(), String::new())), Bound::Unbounded))
            .take_while(move |((c, _), _)| c == collection)
            .map(|((_, key), write)| (key, write))
    }

    /// First staged write of `collection` whose key sorts after `after`
    pub(crate) fn next_staged_after(&self, collection: &str, after: Option<&str>) -> Option<(&PrimaryKey, &StagedWrite)> {
        let lower = match after {
            Some(key) => Bound::Excluded((collection.to_string(), key.to_string())),
            None => Bound::Included((collection.to_string(), String::new())),
        };
        self.write_set
            .range((lower, Bound::Unbounded))
            .next()
            .filter(|((c, _), _)| c == collection)
            .map(|((_, key), write)| (key, write))
    }

    /// Fail with `InvalidState` unless the transaction is active
    pub fn ensure_active(&self) -> KataResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(KataError::InvalidState { txn: self.id, state: self.state })
        }
    }

    /// Stage a write. Validation is the caller's job; no shared state is touched.
    pub(crate) fn stage_write(&mut self, collection: &str, key: PrimaryKey, write: StagedWrite) -> KataResult<()> {
        self.ensure_active()?;
        debug!(txn = self.id, collection, key = %key, delete = matches!(write, StagedWrite::Delete), "staged write");
        self.write_set.insert((collection.to_string(), key), write);
        Ok(())
    }

    /// Drop a staged write
    pub(crate) fn unstage(&mut self, collection: &str, key: &str) -> Option<StagedWrite> {
        self.write_set.remove(&(collection.to_string(), key.to_string()))
    }

    pub(crate) fn mark_committed(&mut self, commit_ts: Timestamp) {
        self.state = TransactionState::Committed;
        self.commit_ts = Some(commit_ts);
        self.write_set.clear();
        self.manager.finish(self.id, TransactionState::Committed);
    }

    pub(crate) fn mark_aborted(&mut self) {
        if self.state == TransactionState::Active {
            self.state = TransactionState::Aborted;
            self.write_set.clear();
            self.manager.finish(self.id, TransactionState::Aborted);
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("start_ts", &self.start_ts)
            .field("state", &self.state)
            .field("commit_ts", &self.commit_ts)
            .field("staged", &self.write_set.len())
            .finish()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state == TransactionState::Active {
            if self.write_set.is_empty() {
                debug!(txn = self.id, "read-only transaction dropped");
            } else {
                warn!(txn = self.id, staged = self.write_set.len(), "active transaction dropped, discarding staged writes");
            }
            self.mark_aborted();
        }
    }
}

/// Counters kept by the transaction manager
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionStatistics {
    pub begun: u64,
    pub committed: u64,
    pub aborted: u64,
    pub active: usize,
}

/// Process-wide transaction coordinator.
///
/// Owns the commit clock and the registry of active transactions. One instance
/// is created per `Database` and shared with every handle it issues.
#[derive(Debug, Default)]
pub struct TransactionManager {
    next_txn_id: AtomicU64,
    /// Highest commit timestamp whose versions are fully installed
    last_commit_ts: AtomicU64,
    /// Active transactions and their snapshot timestamps
    active: Mutex<HashMap<TransactionId, Timestamp>>,
    committed: AtomicU64,
    aborted: AtomicU64,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a transaction: allocate an id, capture the snapshot and register it
    pub fn begin(self: &Arc<Self>) -> Transaction {
        let id = self.next_txn_id.fetch_add(1, Ordering::SeqCst) + 1;

        // Reading the clock and registering happen under one lock so the GC
        // watermark can never pass a snapshot that is about to be registered.
        let start_ts = {
            let mut active = self.active.lock();
            let start_ts = self.last_commit_ts.load(Ordering::Acquire);
            active.insert(id, start_ts);
            start_ts
        };

        debug!(txn = id, start_ts, "transaction started");
        Transaction {
            id,
            start_ts,
            state: TransactionState::Active,
            commit_ts: None,
            write_set: WriteSet::new(),
            manager: Arc::clone(self),
        }
    }

    /// Highest published commit timestamp
    pub fn last_commit_ts(&self) -> Timestamp {
        self.last_commit_ts.load(Ordering::Acquire)
    }

    /// Timestamp for the next commit. Only meaningful inside the commit critical section.
    pub(crate) fn next_commit_ts(&self) -> Timestamp {
        self.last_commit_ts() + 1
    }

    /// Make a fully installed commit visible to transactions that begin afterwards
    pub(crate) fn publish(&self, commit_ts: Timestamp) {
        self.last_commit_ts.store(commit_ts, Ordering::Release);
    }

    /// Oldest snapshot any active transaction may read, or the clock when none is active
    pub fn watermark(&self) -> Timestamp {
        let active = self.active.lock();
        active.values().copied().min().unwrap_or_else(|| self.last_commit_ts())
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    pub fn statistics(&self) -> TransactionStatistics {
        TransactionStatistics {
            begun: self.next_txn_id.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            active: self.active_count(),
        }
    }

    fn finish(&self, id: TransactionId, outcome: TransactionState) {
        self.active.lock().remove(&id);
        match outcome {
            TransactionState::Committed => self.committed.fetch_add(1, Ordering::Relaxed),
            _ => self.aborted.fetch_add(1, Ordering::Relaxed),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(pairs: &[(&str, i64)]) -> StagedWrite {
        StagedWrite::Put(Arc::new(pairs.iter().map(|(k, v)| (k.to_string(), (*v).into())).collect()))
    }

    #[test]
    fn test_begin_assigns_unique_increasing_ids() {
        let manager = Arc::new(TransactionManager::new());
        let t1 = manager.begin();
        let t2 = manager.begin();

        assert!(t2.id() > t1.id());
        assert_eq!(t1.start_ts(), 0);
        assert_eq!(manager.active_count(), 2);
    }

    #[test]
    fn test_snapshot_follows_published_commits() {
        let manager = Arc::new(TransactionManager::new());
        let before = manager.begin();

        let ts = manager.next_commit_ts();
        manager.publish(ts);
        let after = manager.begin();

        assert_eq!(before.start_ts(), 0);
        assert_eq!(after.start_ts(), 1);
    }

    #[test]
    fn test_watermark_is_oldest_active_snapshot() {
        let manager = Arc::new(TransactionManager::new());
        manager.publish(5);
        let old = manager.begin();
        manager.publish(9);
        let _young = manager.begin();

        assert_eq!(manager.watermark(), 5);
        drop(old);
        assert_eq!(manager.watermark(), 9);
    }

    #[test]
    fn test_watermark_without_active_transactions_is_clock() {
        let manager = TransactionManager::new();
        manager.publish(42);
        assert_eq!(manager.watermark(), 42);
    }

    #[test]
    fn test_staging_and_lookup() {
        let manager = Arc::new(TransactionManager::new());
        let mut txn = manager.begin();

        txn.stage_write("a", "k2".to_string(), put(&[("n", 2)])).unwrap();
        txn.stage_write("a", "k1".to_string(), StagedWrite::Delete).unwrap();
        txn.stage_write("b", "k0".to_string(), put(&[("n", 0)])).unwrap();

        assert_eq!(txn.staged("a", "k1"), Some(&StagedWrite::Delete));
        let keys: Vec<&PrimaryKey> = txn.staged_in("a").map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["k1", "k2"]);
        assert_eq!(txn.staged_in("b").count(), 1);
        assert_eq!(txn.staged_in("c").count(), 0);
    }

    #[test]
    fn test_terminal_transaction_rejects_writes() {
        let manager = Arc::new(TransactionManager::new());
        let mut txn = manager.begin();
        txn.mark_aborted();

        let err = txn.stage_write("a", "k".to_string(), StagedWrite::Delete).unwrap_err();
        assert!(matches!(err, KataError::InvalidState { state: TransactionState::Aborted, .. }));
        assert_eq!(manager.active_count(), 0);
    }

    #[test]
    fn test_dropping_active_handle_deregisters() {
        let manager = Arc::new(TransactionManager::new());
        {
            let _txn = manager.begin();
            assert_eq!(manager.active_count(), 1);
        }
        assert_eq!(manager.active_count(), 0);
        assert_eq!(manager.statistics().aborted, 1);
    }
}
