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

//! Query execution under a transaction snapshot.
//!
//! Index lookups only propose candidate keys. Every candidate is re-read
//! through the version store with the caller's snapshot and own writes, and
//! re-checked against all predicates and text tokens; sorting and pagination
//! run on that validated set.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use tracing::debug;

use super::planner::{AccessPath, QueryPlan};
use super::predicate::Query;
use crate::indices::{IndexManager, term_frequencies};
use crate::record::{PrimaryKey, Record};
use crate::storage_engine::mvcc::VersionStore;
use crate::storage_engine::transaction::{StagedWrite, Transaction};

/// A validated query hit
#[derive(Debug, Clone, PartialEq)]
pub struct QueryHit {
    pub record: Record,
    /// Summed term frequency of the query tokens in this record's text fields
    pub score: u32,
}

/// Counters of one execution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionStats {
    pub candidates: usize,
    pub matched: usize,
    pub returned: usize,
}

pub struct QueryExecutor<'a> {
    store: &'a VersionStore,
    txn: &'a Transaction,
    text_fields: Vec<String>,
}

impl<'a> QueryExecutor<'a> {
    pub fn new(store: &'a VersionStore, txn: &'a Transaction, text_fields: Vec<String>) -> Self {
        Self { store, txn, text_fields }
    }

    /// Collect candidate keys for an index plan, `None` for a full scan.
    ///
    /// Takes the index manager only for the lookup; validation happens later
    /// without holding it.
    pub fn candidates(&self, plan: &QueryPlan, indexes: &IndexManager) -> Option<BTreeSet<PrimaryKey>> {
        let snapshot_ts = self.txn.start_ts();
        let mut keys = match &plan.access_path {
            AccessPath::FullScan => return None,
            AccessPath::IndexScan { field, range } => indexes.candidates(field, range, snapshot_ts)?,
            AccessPath::TextSearch { tokens } => indexes.text_candidates(tokens, snapshot_ts)?,
            AccessPath::IndexAndText { field, range, tokens } => {
                let by_range = indexes.candidates(field, range, snapshot_ts)?;
                let by_text = indexes.text_candidates(tokens, snapshot_ts)?;
                by_range.intersection(&by_text).cloned().collect()
            }
        };

        // Own staged writes are invisible to the shared indexes
        keys.extend(
            self.txn
                .staged_in(self.store.collection())
                .filter(|(_, write)| matches!(write, StagedWrite::Put(_)))
                .map(|(key, _)| key.clone()),
        );
        Some(keys)
    }

    /// Run `plan`, given the candidates produced by `candidates`
    pub fn execute(&self, query: &Query, plan: &QueryPlan, candidates: Option<BTreeSet<PrimaryKey>>) -> (Vec<QueryHit>, ExecutionStats) {
        let mut stats = ExecutionStats::default();
        let mut hits = Vec::new();

        let mut consider = |record: Record, stats: &mut ExecutionStats| {
            stats.candidates += 1;
            if !query.matches_predicates(&record) {
                return;
            }
            if let Some(score) = self.text_score(&record, &plan.tokens) {
                stats.matched += 1;
                hits.push(QueryHit { record, score });
            }
        };

        match candidates {
            Some(keys) => {
                for key in keys {
                    if let Some(record) = self.store.read(self.txn, &key) {
                        consider(record, &mut stats);
                    }
                }
            }
            None => {
                for record in self.store.scan(self.txn, |_| true) {
                    consider(record, &mut stats);
                }
            }
        }

        sort_hits(&mut hits, query, !plan.tokens.is_empty());
        let page: Vec<QueryHit> = hits.into_iter().skip(query.offset).take(query.limit.unwrap_or(usize::MAX)).collect();
        stats.returned = page.len();

        debug!(
            txn = self.txn.id(),
            collection = %plan.collection,
            candidates = stats.candidates,
            matched = stats.matched,
            returned = stats.returned,
            "query executed"
        );
        (page, stats)
    }

    /// Score of `record` for `tokens`, `None` unless every token occurs in some text field
    fn text_score(&self, record: &Record, tokens: &[String]) -> Option<u32> {
        if tokens.is_empty() {
            return Some(0);
        }
        let frequencies: Vec<_> = self
            .text_fields
            .iter()
            .filter_map(|field| record.get(field).and_then(|value| value.as_str()))
            .map(term_frequencies)
            .collect();

        let mut score = 0;
        for token in tokens {
            let tf: u32 = frequencies.iter().filter_map(|tf| tf.get(token)).sum();
            if tf == 0 {
                return None;
            }
            score += tf;
        }
        Some(score)
    }
}

/// Explicit sort field first, then text score when searching, then primary key
fn sort_hits(hits: &mut [QueryHit], query: &Query, by_score: bool) {
    hits.sort_by(|a, b| {
        let primary = match &query.sort {
            Some(sort) => sort.compare(&a.record, &b.record),
            None if by_score => b.score.cmp(&a.score),
            None => Ordering::Equal,
        };
        primary.then_with(|| a.record.key.cmp(&b.record.key))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::ScanFallback;
    use crate::query::planner::QueryPlanner;
    use crate::query::predicate::{QueryPredicate, SortOrder};
    use crate::record::{FieldType, Fields, Value};
    use crate::schema::{CollectionSchema, FieldSpec};
    use crate::storage_engine::transaction::TransactionManager;

    struct Fixture {
        schema: CollectionSchema,
        store: VersionStore,
        indexes: IndexManager,
        manager: Arc<TransactionManager>,
    }

    impl Fixture {
        fn new() -> Self {
            let schema = CollectionSchema::new(
                "tickets",
                [
                    ("status".to_string(), FieldSpec::new(FieldType::String).indexed()),
                    ("priority".to_string(), FieldSpec::new(FieldType::Integer)),
                    ("body".to_string(), FieldSpec::new(FieldType::Text).text_indexed()),
                ],
            )
            .unwrap();
            let mut indexes = IndexManager::new("tickets");
            indexes.sync_schema(&schema, &[], 0);
            Self {
                schema,
                store: VersionStore::new("tickets"),
                indexes,
                manager: Arc::new(TransactionManager::new()),
            }
        }

        fn commit(&mut self, key: &str, status: &str, priority: Option<i64>, body: &str) {
            let ts = self.manager.next_commit_ts();
            let mut fields = Fields::from([
                ("status".to_string(), Value::from(status)),
                ("body".to_string(), Value::text(body)),
            ]);
            if let Some(p) = priority {
                fields.insert("priority".to_string(), Value::Integer(p));
            }
            let outcome = self.store.install(ts, key, &StagedWrite::Put(Arc::new(fields))).unwrap();
            self.indexes.on_install(ts, key, outcome.old.as_deref(), outcome.new.as_deref());
            self.manager.publish(ts);
        }

        fn run(&self, txn: &Transaction, query: &Query) -> Vec<QueryHit> {
            let plan = QueryPlanner::new(ScanFallback::Allow)
                .plan(query, &self.schema, &self.indexes, self.store.keys().len(), txn.start_ts())
                .unwrap();
            let executor = QueryExecutor::new(&self.store, txn, vec!["body".to_string()]);
            let candidates = executor.candidates(&plan, &self.indexes);
            executor.execute(query, &plan, candidates).0
        }
    }

    fn keys(hits: &[QueryHit]) -> Vec<&str> {
        hits.iter().map(|h| h.record.key.as_str()).collect()
    }

    #[test]
    fn test_index_and_scan_plans_agree() {
        let mut fx = Fixture::new();
        fx.commit("a", "open", Some(2), "printer jam");
        fx.commit("b", "closed", Some(1), "login issue");
        fx.commit("c", "open", None, "printer offline");
        let txn = fx.manager.begin();

        let indexed = Query::new("tickets").filter(QueryPredicate::eq("status", "open"));
        let scanned = Query::new("tickets").filter(QueryPredicate::ge("priority", 0i64));
        assert_eq!(keys(&fx.run(&txn, &indexed)), vec!["a", "c"]);
        assert_eq!(keys(&fx.run(&txn, &scanned)), vec!["a", "b"]);
    }

    #[test]
    fn test_snapshot_sees_rows_moved_off_index_value_later() {
        let mut fx = Fixture::new();
        fx.commit("a", "open", Some(1), "x");
        let txn = fx.manager.begin();
        fx.commit("a", "closed", Some(1), "x");

        let query = Query::new("tickets").filter(QueryPredicate::eq("status", "open"));
        assert_eq!(keys(&fx.run(&txn, &query)), vec!["a"]);

        let fresh = fx.manager.begin();
        assert!(fx.run(&fresh, &query).is_empty());
    }

    #[test]
    fn test_own_writes_are_candidates() {
        let mut fx = Fixture::new();
        fx.commit("a", "closed", Some(1), "x");
        let mut txn = fx.manager.begin();
        let staged = Fields::from([
            ("status".to_string(), Value::from("open")),
            ("body".to_string(), Value::text("draft")),
        ]);
        txn.stage_write("tickets", "z".to_string(), StagedWrite::Put(Arc::new(staged))).unwrap();

        let query = Query::new("tickets").filter(QueryPredicate::eq("status", "open"));
        let hits = fx.run(&txn, &query);
        assert_eq!(keys(&hits), vec!["z"]);
        assert!(hits[0].record.is_staged());
    }

    #[test]
    fn test_text_query_orders_by_score_then_key() {
        let mut fx = Fixture::new();
        fx.commit("a", "open", None, "printer");
        fx.commit("b", "open", None, "printer printer");
        fx.commit("c", "open", None, "printer");
        let txn = fx.manager.begin();

        let hits = fx.run(&txn, &Query::new("tickets").text(["Printer"]));
        assert_eq!(keys(&hits), vec!["b", "a", "c"]);
        assert_eq!(hits[0].score, 2);
    }

    #[test]
    fn test_sort_and_pagination_after_validation() {
        let mut fx = Fixture::new();
        fx.commit("a", "open", Some(3), "x");
        fx.commit("b", "open", None, "x");
        fx.commit("c", "open", Some(9), "x");
        fx.commit("d", "open", Some(3), "x");
        let txn = fx.manager.begin();

        let query = Query::new("tickets")
            .filter(QueryPredicate::eq("status", "open"))
            .sort_by("priority", SortOrder::Descending);
        assert_eq!(keys(&fx.run(&txn, &query)), vec!["c", "a", "d", "b"]);

        let page = query.clone().offset(1).limit(2);
        assert_eq!(keys(&fx.run(&txn, &page)), vec!["a", "d"]);
    }
}
