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

//! Database
//!
//! The process-wide coordinator. One `Database` owns the transaction manager,
//! every collection's schema, version store and indexes, and the commit lock
//! that serializes conflict check and install. Reads and queries never take
//! the commit lock.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::error::{KataError, KataResult};
use crate::indices::{IndexManager, IndexStats, ScoredKey};
use crate::query::{Query, QueryExecutor, QueryHit, QueryPlan, QueryPlanner};
use crate::record::{Fields, PrimaryKey, Record, Value};
use crate::schema::{CollectionSchema, FieldSpec, SchemaChange};
use crate::snapshot::{CollectionImage, SnapshotImage};
use crate::storage_engine::{
    ConflictDetector, GcStats, MVCCStatistics, OCCStatistics, StagedWrite, Timestamp, Transaction, TransactionManager, TransactionState,
    TransactionStatistics, VersionInfo, VersionStore,
};

/// Schema, versions and indexes of one collection
#[derive(Debug)]
struct Collection {
    schema: RwLock<Arc<CollectionSchema>>,
    store: VersionStore,
    indexes: RwLock<IndexManager>,
}

impl Collection {
    fn schema(&self) -> Arc<CollectionSchema> {
        Arc::clone(&self.schema.read())
    }
}

#[derive(Debug, Default)]
struct Counters {
    occ: OCCStatistics,
    gc_runs: u64,
    versions_reclaimed: u64,
    retired_pruned: u64,
}

/// Per-collection statistics
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionStatistics {
    pub mvcc: MVCCStatistics,
    pub indexes: Vec<IndexStats>,
}

/// Store-wide statistics
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseStatistics {
    pub transactions: TransactionStatistics,
    pub occ: OCCStatistics,
    pub gc_runs: u64,
    pub versions_reclaimed: u64,
    pub retired_pruned: u64,
    pub retained_versions: usize,
    pub live_keys: usize,
    pub last_commit_ts: Timestamp,
    pub watermark: Timestamp,
    pub halted: bool,
    pub collections: BTreeMap<String, CollectionStatistics>,
}

pub struct Database {
    config: StoreConfig,
    transactions: Arc<TransactionManager>,
    collections: RwLock<BTreeMap<String, Arc<Collection>>>,
    /// Serializes conflict check + install, schema changes and GC
    commit_lock: Mutex<()>,
    /// Reason the store stopped accepting mutations
    halted: RwLock<Option<String>>,
    detector: ConflictDetector,
    planner: QueryPlanner,
    counters: Mutex<Counters>,
}

impl Database {
    pub fn new(config: StoreConfig) -> Self {
        info!(
            granularity = ?config.conflict_granularity,
            scan_fallback = ?config.scan_fallback,
            strict_fields = config.strict_fields,
            auto_gc_threshold = config.auto_gc_threshold,
            "opening in-memory store"
        );
        Self {
            detector: ConflictDetector::new(config.conflict_granularity),
            planner: QueryPlanner::new(config.scan_fallback),
            config,
            transactions: Arc::new(TransactionManager::new()),
            collections: RwLock::new(BTreeMap::new()),
            commit_lock: Mutex::new(()),
            halted: RwLock::new(None),
            counters: Mutex::new(Counters::default()),
        }
    }

    /// Store with default configuration
    pub fn in_memory() -> Self {
        Self::new(StoreConfig::default())
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn collection(&self, name: &str) -> KataResult<Arc<Collection>> {
        self.collections
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| KataError::UnknownCollection(name.to_string()))
    }

    fn ensure_running(&self) -> KataResult<()> {
        match self.halted.read().as_ref() {
            Some(reason) => Err(KataError::Halted(reason.clone())),
            None => Ok(()),
        }
    }

    /// Record a fatal invariant violation; every later mutation fails with `Halted`
    fn halt(&self, err: KataError) -> KataError {
        error!(error = %err, "internal invariant violated, refusing further mutations");
        self.halted.write().get_or_insert_with(|| err.to_string());
        err
    }

    pub fn is_halted(&self) -> bool {
        self.halted.read().is_some()
    }

    // ---- Schema ----

    /// Declare a collection, or extend an existing one.
    ///
    /// New indexes on an existing collection are back-filled from the latest
    /// committed versions inside the commit critical section.
    pub fn define_schema<I>(&self, name: &str, specs: I) -> KataResult<SchemaChange>
    where
        I: IntoIterator<Item = (String, FieldSpec)>,
    {
        self.ensure_running()?;
        let _guard = self.commit_lock.lock();
        self.ensure_running()?;

        let existing = self.collections.read().get(name).cloned();
        if let Some(collection) = existing {
            let (merged, change) = collection.schema().merge(specs)?;
            if change.needs_backfill() {
                let latest = collection.store.latest_committed();
                collection
                    .indexes
                    .write()
                    .sync_schema(&merged, &latest, self.transactions.last_commit_ts());
            }
            *collection.schema.write() = Arc::new(merged);
            info!(
                collection = name,
                added = ?change.added_fields,
                indexed = ?change.newly_indexed,
                text_indexed = ?change.newly_text_indexed,
                "schema extended"
            );
            return Ok(change);
        }

        let schema = CollectionSchema::new(name, specs)?;
        let mut indexes = IndexManager::new(name);
        indexes.sync_schema(&schema, &[], 0);
        let change = SchemaChange {
            added_fields: schema.fields().map(|(field, _)| field.clone()).collect(),
            newly_indexed: schema.indexed_fields().map(str::to_string).collect(),
            newly_text_indexed: schema.text_fields().map(str::to_string).collect(),
        };

        info!(collection = name, fields = change.added_fields.len(), "collection defined");
        self.collections.write().insert(
            name.to_string(),
            Arc::new(Collection {
                schema: RwLock::new(Arc::new(schema)),
                store: VersionStore::new(name),
                indexes: RwLock::new(indexes),
            }),
        );
        Ok(change)
    }

    pub fn schema(&self, collection: &str) -> KataResult<Arc<CollectionSchema>> {
        Ok(self.collection(collection)?.schema())
    }

    pub fn collections(&self) -> Vec<String> {
        self.collections.read().keys().cloned().collect()
    }

    // ---- Transactions ----

    pub fn begin(&self) -> Transaction {
        self.transactions.begin()
    }

    /// Read `key` under the transaction's snapshot, own writes included
    pub fn read(&self, txn: &Transaction, collection: &str, key: &str) -> KataResult<Option<Record>> {
        txn.ensure_active()?;
        Ok(self.collection(collection)?.store.read(txn, key))
    }

    /// Validate and stage a full replacement of `key`
    pub fn write(&self, txn: &mut Transaction, collection: &str, key: impl Into<PrimaryKey>, fields: Fields) -> KataResult<()> {
        txn.ensure_active()?;
        let schema = self.collection(collection)?.schema();
        schema.validate(&fields, self.config.strict_fields)?;
        txn.stage_write(collection, key.into(), StagedWrite::Put(Arc::new(fields)))
    }

    /// Stage a record under a fresh UUID key and return the key
    pub fn insert(&self, txn: &mut Transaction, collection: &str, fields: Fields) -> KataResult<PrimaryKey> {
        let key = Uuid::new_v4().to_string();
        self.write(txn, collection, key.clone(), fields)?;
        Ok(key)
    }

    /// Stage a tombstone for `key`.
    ///
    /// Fails with `NotFound` if the transaction cannot see the key. Deleting a
    /// key this transaction created without any committed version just drops
    /// the staged write.
    pub fn delete(&self, txn: &mut Transaction, collection: &str, key: &str) -> KataResult<()> {
        txn.ensure_active()?;
        let store = &self.collection(collection)?.store;
        let committed = store.read_at(key, txn.start_ts()).is_some();

        let not_found = || KataError::NotFound {
            collection: collection.to_string(),
            key: key.to_string(),
        };
        match txn.staged(collection, key) {
            Some(StagedWrite::Delete) => Err(not_found()),
            Some(StagedWrite::Put(_)) if !committed => {
                txn.unstage(collection, key);
                debug!(txn = txn.id(), collection, key, "unstaged own insert");
                Ok(())
            }
            None if !committed => Err(not_found()),
            _ => txn.stage_write(collection, key.to_string(), StagedWrite::Delete),
        }
    }

    /// Commit all staged writes atomically and return the commit timestamp.
    ///
    /// Inside the commit lock: re-validate against the current schemas, check
    /// every write for conflicts, and only then install versions and index
    /// entries. A conflict aborts the transaction without touching shared state.
    pub fn commit(&self, txn: &mut Transaction) -> KataResult<Timestamp> {
        txn.ensure_active()?;
        if let Err(err) = self.ensure_running() {
            txn.mark_aborted();
            return Err(err);
        }

        if txn.write_set().is_empty() {
            let commit_ts = self.transactions.last_commit_ts();
            txn.mark_committed(commit_ts);
            debug!(txn = txn.id(), commit_ts, "read-only transaction committed");
            return Ok(commit_ts);
        }

        let _guard = self.commit_lock.lock();
        if let Err(err) = self.ensure_running() {
            txn.mark_aborted();
            return Err(err);
        }

        let mut pending = Vec::with_capacity(txn.write_set().len());
        for ((name, key), write) in txn.write_set() {
            let collection = self.collection(name)?;
            if let StagedWrite::Put(fields) = write {
                collection.schema().validate(fields, self.config.strict_fields)?;
            }
            pending.push((collection, key.clone(), write.clone()));
        }

        let mut resolved = Vec::with_capacity(pending.len());
        for (collection, key, write) in pending {
            match self.detector.validate(&collection.store, txn.start_ts(), &key, &write) {
                Ok(resolution) => resolved.push((collection, key, resolution)),
                Err(err) => {
                    txn.mark_aborted();
                    if !err.is_retryable() {
                        return Err(self.halt(err));
                    }
                    let mut counters = self.counters.lock();
                    counters.occ.validations += resolved.len() as u64 + 1;
                    counters.occ.conflicts += 1;
                    return Err(err);
                }
            }
        }

        let commit_ts = self.transactions.next_commit_ts();
        let mut touched = BTreeSet::new();
        for (collection, key, resolution) in &resolved {
            let outcome = match collection.store.install(commit_ts, key, &resolution.write) {
                Ok(outcome) => outcome,
                Err(err) => {
                    txn.mark_aborted();
                    return Err(self.halt(err));
                }
            };
            collection
                .indexes
                .write()
                .on_install(commit_ts, key, outcome.old.as_deref(), outcome.new.as_deref());
            touched.insert(collection.store.collection().to_string());
        }
        self.transactions.publish(commit_ts);
        txn.mark_committed(commit_ts);

        let merges = resolved.iter().filter(|(_, _, r)| r.merged).count() as u64;
        {
            let mut counters = self.counters.lock();
            counters.occ.validations += resolved.len() as u64;
            counters.occ.merges += merges;
        }
        info!(txn = txn.id(), commit_ts, writes = resolved.len(), merges, "transaction committed");

        self.after_commit(&touched);
        Ok(commit_ts)
    }

    /// Prune retired index entries of the touched collections and run GC when
    /// enough superseded versions have piled up. Runs under the commit lock.
    fn after_commit(&self, touched: &BTreeSet<String>) {
        let watermark = self.transactions.watermark();
        let collections = self.collections.read().clone();

        let mut pruned = 0;
        for name in touched {
            if let Some(collection) = collections.get(name) {
                pruned += collection.indexes.write().prune_retired(watermark);
            }
        }
        self.counters.lock().retired_pruned += pruned as u64;

        let threshold = self.config.auto_gc_threshold;
        if threshold == 0 {
            return;
        }
        let garbage: usize = collections
            .values()
            .map(|c| {
                let stats = c.store.statistics();
                stats.total_versions.saturating_sub(stats.live_keys)
            })
            .sum();
        if garbage > threshold {
            debug!(garbage, threshold, "automatic gc");
            if let Err(err) = self.sweep(watermark) {
                warn!(error = %err, "automatic gc failed");
            }
        }
    }

    /// Discard staged writes. Aborting twice is fine; aborting a committed transaction is not.
    pub fn abort(&self, txn: &mut Transaction) -> KataResult<()> {
        match txn.state() {
            TransactionState::Active => {
                let staged = txn.write_set().len();
                txn.mark_aborted();
                info!(txn = txn.id(), staged, "transaction aborted");
                Ok(())
            }
            TransactionState::Aborted => Ok(()),
            TransactionState::Committed => Err(KataError::InvalidState {
                txn: txn.id(),
                state: TransactionState::Committed,
            }),
        }
    }

    // ---- Queries ----

    /// Run a structured query and return matching records
    pub fn query(&self, txn: &Transaction, query: &Query) -> KataResult<Vec<Record>> {
        Ok(self.search(txn, query)?.into_iter().map(|hit| hit.record).collect())
    }

    /// Like `query`, with the text score of every hit
    pub fn search(&self, txn: &Transaction, query: &Query) -> KataResult<Vec<QueryHit>> {
        txn.ensure_active()?;
        let collection = self.collection(&query.collection)?;
        let schema = collection.schema();
        let executor = QueryExecutor::new(&collection.store, txn, schema.text_fields().map(str::to_string).collect());

        let (plan, candidates) = {
            let indexes = collection.indexes.read();
            let plan = self
                .planner
                .plan(query, &schema, &indexes, collection.store.key_count(), txn.start_ts())?;
            let candidates = executor.candidates(&plan, &indexes);
            (plan, candidates)
        };

        Ok(executor.execute(query, &plan, candidates).0)
    }

    /// Plan `query` for a transaction that would begin now, without running it
    pub fn explain(&self, query: &Query) -> KataResult<QueryPlan> {
        let collection = self.collection(&query.collection)?;
        let schema = collection.schema();
        let indexes = collection.indexes.read();
        self.planner
            .plan(query, &schema, &indexes, collection.store.key_count(), self.transactions.last_commit_ts())
    }

    /// Keys whose latest committed `field` lies in `[low, high]`, ordered by value then key.
    ///
    /// Reflects the latest committed state, not a snapshot.
    pub fn range_query(&self, collection: &str, field: &str, low: &Value, high: &Value) -> KataResult<Vec<PrimaryKey>> {
        let collection = self.collection(collection)?;
        let schema = collection.schema();
        let spec = schema
            .field(field)
            .ok_or_else(|| KataError::InvalidQuery(format!("field {field} is not declared in {}", schema.name())))?;
        for value in [low, high] {
            if !spec.field_type.is_comparable_with(value.field_type()) {
                return Err(KataError::InvalidQuery(format!(
                    "range on {field} compares {} field with a {} value",
                    spec.field_type,
                    value.field_type()
                )));
            }
        }
        collection.indexes.read().range_query(field, low, high)
    }

    /// Keys containing every token in some text field, ranked by term frequency.
    ///
    /// Reflects the latest committed state, not a snapshot.
    pub fn text_search<S: AsRef<str>>(&self, collection: &str, tokens: &[S]) -> KataResult<Vec<ScoredKey>> {
        let collection = self.collection(collection)?;
        let indexes = collection.indexes.read();
        if !indexes.has_text_index() {
            return Err(KataError::InvalidQuery(format!(
                "collection {} has no text-indexed field",
                collection.store.collection()
            )));
        }
        Ok(indexes.text_search(tokens))
    }

    // ---- Maintenance ----

    /// Reclaim versions no active snapshot can observe
    pub fn gc(&self) -> KataResult<GcStats> {
        self.ensure_running()?;
        let _guard = self.commit_lock.lock();
        self.ensure_running()?;
        self.sweep(self.transactions.watermark())
    }

    /// GC body; callers hold the commit lock
    fn sweep(&self, watermark: Timestamp) -> KataResult<GcStats> {
        let collections = self.collections.read().clone();
        let mut total = GcStats::default();
        let mut pruned = 0;

        for collection in collections.values() {
            let stats = collection.store.gc_sweep(watermark).map_err(|err| self.halt(err))?;
            total.merge(&stats);
            pruned += collection.indexes.write().prune_retired(watermark);
        }

        let mut counters = self.counters.lock();
        counters.gc_runs += 1;
        counters.versions_reclaimed += total.versions_reclaimed as u64;
        counters.retired_pruned += pruned as u64;
        drop(counters);

        if total.versions_reclaimed > 0 || pruned > 0 {
            info!(watermark, reclaimed = total.versions_reclaimed, keys_removed = total.keys_removed, pruned, "gc sweep finished");
        }
        Ok(total)
    }

    /// Oldest snapshot still in use
    pub fn watermark(&self) -> Timestamp {
        self.transactions.watermark()
    }

    /// Retained committed versions of `key` visible at or before the transaction's snapshot, newest first
    pub fn history(&self, txn: &Transaction, collection: &str, key: &str) -> KataResult<Vec<VersionInfo>> {
        txn.ensure_active()?;
        Ok(self.collection(collection)?.store.history(key, txn.start_ts()))
    }

    /// Check every version chain and every index against the latest committed versions
    pub fn verify(&self) -> KataResult<()> {
        let _guard = self.commit_lock.lock();
        for collection in self.collections.read().values() {
            collection.store.check_chains()?;
            collection.indexes.read().verify(&collection.store.latest_committed())?;
        }
        Ok(())
    }

    pub fn statistics(&self) -> DatabaseStatistics {
        let collections: BTreeMap<String, CollectionStatistics> = self
            .collections
            .read()
            .iter()
            .map(|(name, c)| {
                let stats = CollectionStatistics {
                    mvcc: c.store.statistics(),
                    indexes: c.indexes.read().stats(),
                };
                (name.clone(), stats)
            })
            .collect();
        let counters = self.counters.lock();

        DatabaseStatistics {
            transactions: self.transactions.statistics(),
            occ: counters.occ.clone(),
            gc_runs: counters.gc_runs,
            versions_reclaimed: counters.versions_reclaimed,
            retired_pruned: counters.retired_pruned,
            retained_versions: collections.values().map(|c| c.mvcc.total_versions).sum(),
            live_keys: collections.values().map(|c| c.mvcc.live_keys).sum(),
            last_commit_ts: self.transactions.last_commit_ts(),
            watermark: self.transactions.watermark(),
            halted: self.is_halted(),
            collections,
        }
    }

    // ---- Snapshots ----

    /// Encode every schema and the committed records visible to `txn`
    pub fn export_snapshot(&self, txn: &Transaction) -> KataResult<Vec<u8>> {
        txn.ensure_active()?;
        let collections = self.collections.read().clone();

        let image = SnapshotImage {
            snapshot_ts: txn.start_ts(),
            created_at: Utc::now(),
            collections: collections
                .iter()
                .map(|(name, c)| CollectionImage {
                    name: name.clone(),
                    fields: c.schema().fields().map(|(field, spec)| (field.clone(), *spec)).collect(),
                    records: c.store.scan_at(txn.start_ts(), |_| true).map(|r| (r.key, r.fields)).collect(),
                })
                .collect(),
        };

        let bytes = image.encode()?;
        info!(
            txn = txn.id(),
            snapshot_ts = image.snapshot_ts,
            collections = image.collections.len(),
            records = image.record_count(),
            bytes = bytes.len(),
            "snapshot exported"
        );
        Ok(bytes)
    }

    /// Build a store from a snapshot image. Every record becomes one committed
    /// version at the image's snapshot timestamp.
    pub fn restore(config: StoreConfig, bytes: &[u8]) -> KataResult<Database> {
        let image = SnapshotImage::decode(bytes)?;
        let db = Database::new(config);
        for collection in &image.collections {
            db.define_schema(&collection.name, collection.fields.iter().cloned())?;
        }

        let restore_ts = image.snapshot_ts.max(1);
        {
            let _guard = db.commit_lock.lock();
            for image_collection in &image.collections {
                let collection = db.collection(&image_collection.name)?;
                let schema = collection.schema();
                let mut indexes = collection.indexes.write();
                for (key, fields) in &image_collection.records {
                    schema.validate(fields, db.config.strict_fields)?;
                    let outcome = collection
                        .store
                        .install(restore_ts, key, &StagedWrite::Put(Arc::new(fields.clone())))?;
                    indexes.on_install(restore_ts, key, None, outcome.new.as_deref());
                }
            }
            db.transactions.publish(restore_ts);
        }

        info!(snapshot_ts = restore_ts, records = image.record_count(), "store restored from snapshot");
        Ok(db)
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("collections", &self.collections())
            .field("last_commit_ts", &self.transactions.last_commit_ts())
            .field("halted", &self.is_halted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConflictGranularity;
    use crate::query::QueryPredicate;
    use crate::record::FieldType;

    fn tickets(db: &Database) {
        db.define_schema(
            "tickets",
            [
                ("status".to_string(), FieldSpec::new(FieldType::String).indexed()),
                ("body".to_string(), FieldSpec::new(FieldType::Text).text_indexed()),
                ("priority".to_string(), FieldSpec::new(FieldType::Integer)),
            ],
        )
        .unwrap();
    }

    fn ticket(status: &str, body: &str) -> Fields {
        Fields::from([
            ("status".to_string(), Value::from(status)),
            ("body".to_string(), Value::text(body)),
        ])
    }

    fn put(db: &Database, key: &str, fields: Fields) -> Timestamp {
        let mut txn = db.begin();
        db.write(&mut txn, "tickets", key, fields).unwrap();
        db.commit(&mut txn).unwrap()
    }

    #[test]
    fn test_commit_timestamps_increase() {
        let db = Database::in_memory();
        tickets(&db);
        let t1 = put(&db, "a", ticket("open", "x"));
        let t2 = put(&db, "b", ticket("open", "y"));
        assert!(t2 > t1);
        assert_eq!(db.statistics().last_commit_ts, t2);
    }

    #[test]
    fn test_unknown_collection() {
        let db = Database::in_memory();
        let mut txn = db.begin();
        assert!(matches!(db.write(&mut txn, "nope", "a", Fields::new()), Err(KataError::UnknownCollection(_))));
    }

    #[test]
    fn test_schema_violation_keeps_transaction_usable() {
        let db = Database::in_memory();
        tickets(&db);
        let mut txn = db.begin();
        let bad = Fields::from([("status".to_string(), Value::Integer(1))]);

        assert!(matches!(db.write(&mut txn, "tickets", "a", bad), Err(KataError::SchemaViolation { .. })));
        db.write(&mut txn, "tickets", "a", ticket("open", "ok")).unwrap();
        db.commit(&mut txn).unwrap();
    }

    #[test]
    fn test_delete_semantics() {
        let db = Database::in_memory();
        tickets(&db);
        put(&db, "a", ticket("open", "x"));

        let mut txn = db.begin();
        assert!(matches!(db.delete(&mut txn, "tickets", "missing"), Err(KataError::NotFound { .. })));
        db.write(&mut txn, "tickets", "new", ticket("open", "y")).unwrap();
        db.delete(&mut txn, "tickets", "new").unwrap();
        assert!(txn.write_set().is_empty());

        db.delete(&mut txn, "tickets", "a").unwrap();
        assert!(matches!(db.delete(&mut txn, "tickets", "a"), Err(KataError::NotFound { .. })));
        db.commit(&mut txn).unwrap();

        let reader = db.begin();
        assert!(db.read(&reader, "tickets", "a").unwrap().is_none());
    }

    #[test]
    fn test_abort_rules() {
        let db = Database::in_memory();
        tickets(&db);
        let mut txn = db.begin();
        db.abort(&mut txn).unwrap();
        db.abort(&mut txn).unwrap();
        assert!(matches!(db.read(&txn, "tickets", "a"), Err(KataError::InvalidState { .. })));

        let mut done = db.begin();
        db.commit(&mut done).unwrap();
        assert!(matches!(db.abort(&mut done), Err(KataError::InvalidState { .. })));
        assert!(matches!(db.commit(&mut done), Err(KataError::InvalidState { .. })));
    }

    #[test]
    fn test_insert_generates_uuid_keys() {
        let db = Database::in_memory();
        tickets(&db);
        let mut txn = db.begin();
        let k1 = db.insert(&mut txn, "tickets", ticket("open", "x")).unwrap();
        let k2 = db.insert(&mut txn, "tickets", ticket("open", "y")).unwrap();
        assert_ne!(k1, k2);
        assert!(Uuid::parse_str(&k1).is_ok());
        db.commit(&mut txn).unwrap();
    }

    #[test]
    fn test_field_granularity_merges_disjoint_updates() {
        let db = Database::new(StoreConfig {
            conflict_granularity: ConflictGranularity::Field,
            ..StoreConfig::default()
        });
        tickets(&db);
        let mut base = ticket("open", "x");
        base.insert("priority".to_string(), Value::Integer(1));
        put(&db, "a", base.clone());

        let mut t1 = db.begin();
        let mut t2 = db.begin();
        let mut status_change = base.clone();
        status_change.insert("status".to_string(), Value::from("closed"));
        let mut priority_change = base.clone();
        priority_change.insert("priority".to_string(), Value::Integer(5));

        db.write(&mut t1, "tickets", "a", status_change).unwrap();
        db.write(&mut t2, "tickets", "a", priority_change).unwrap();
        db.commit(&mut t1).unwrap();
        db.commit(&mut t2).unwrap();

        let reader = db.begin();
        let record = db.read(&reader, "tickets", "a").unwrap().unwrap();
        assert_eq!(record.get("status"), Some(&Value::from("closed")));
        assert_eq!(record.get("priority"), Some(&Value::Integer(5)));
        assert_eq!(db.statistics().occ.merges, 1);
        db.verify().unwrap();
    }

    #[test]
    fn test_schema_evolution_backfills_index() {
        let db = Database::in_memory();
        tickets(&db);
        let mut fields = ticket("open", "x");
        fields.insert("priority".to_string(), Value::Integer(3));
        put(&db, "a", fields);

        let early = db.begin();
        let change = db
            .define_schema("tickets", [("priority".to_string(), FieldSpec::new(FieldType::Integer).indexed())])
            .unwrap();
        assert_eq!(change.newly_indexed, vec!["priority"]);
        assert_eq!(db.range_query("tickets", "priority", &Value::Integer(3), &Value::Integer(3)).unwrap(), vec!["a"]);

        let query = Query::new("tickets").filter(QueryPredicate::eq("priority", 3i64));
        assert_eq!(db.query(&early, &query).unwrap().len(), 1);
        assert!(db.explain(&query).unwrap().access_path.uses_index());
        db.verify().unwrap();
    }

    #[test]
    fn test_retyping_a_field_is_rejected() {
        let db = Database::in_memory();
        tickets(&db);
        let result = db.define_schema("tickets", [("status".to_string(), FieldSpec::new(FieldType::Integer))]);
        assert!(matches!(result, Err(KataError::InvalidSchema(_))));
    }

    #[test]
    fn test_history_lists_versions_newest_first() {
        let db = Database::in_memory();
        tickets(&db);
        let t1 = put(&db, "a", ticket("open", "x"));
        let t2 = put(&db, "a", ticket("closed", "x"));

        let reader = db.begin();
        let history = db.history(&reader, "tickets", "a").unwrap();
        assert_eq!(history.iter().map(|v| v.created_at).collect::<Vec<_>>(), vec![t2, t1]);
        assert_eq!(db.read(&reader, "tickets", "a").unwrap().unwrap().version, 2);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let db = Database::in_memory();
        tickets(&db);
        put(&db, "a", ticket("open", "hello world"));
        put(&db, "b", ticket("closed", "bye"));

        let txn = db.begin();
        let bytes = db.export_snapshot(&txn).unwrap();
        let restored = Database::restore(StoreConfig::default(), &bytes).unwrap();

        let reader = restored.begin();
        assert_eq!(
            restored.read(&reader, "tickets", "a").unwrap().map(|r| r.fields),
            Some(ticket("open", "hello world"))
        );
        assert_eq!(restored.text_search("tickets", &["hello"]).unwrap().len(), 1);
        restored.verify().unwrap();
    }

    #[test]
    fn test_auto_gc_reclaims_superseded_versions() {
        let db = Database::new(StoreConfig {
            auto_gc_threshold: 4,
            ..StoreConfig::default()
        });
        tickets(&db);
        for i in 0..10 {
            put(&db, "a", ticket(if i % 2 == 0 { "open" } else { "closed" }, "x"));
        }
        let stats = db.statistics();
        assert!(stats.gc_runs >= 1);
        assert!(stats.retained_versions <= 5);
        db.verify().unwrap();
    }

    #[test]
    fn test_halt_while_waiting_for_commit_lock_refuses_maintenance() {
        let db = Database::in_memory();
        tickets(&db);

        std::thread::scope(|scope| {
            let guard = db.commit_lock.lock();
            let gc = scope.spawn(|| db.gc());
            let schema = scope.spawn(|| db.define_schema("later", [("n".to_string(), FieldSpec::new(FieldType::Integer))]));
            std::thread::sleep(std::time::Duration::from_millis(20));
            db.halt(KataError::Internal("chain corrupted".into()));
            drop(guard);

            assert!(matches!(gc.join().unwrap(), Err(KataError::Halted(_))));
            assert!(matches!(schema.join().unwrap(), Err(KataError::Halted(_))));
        });
        assert!(db.collection("later").is_err());
    }
}
