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

//! Index Manager
//!
//! Owns the ordered and inverted indexes of one collection and keeps them in
//! step with the version store. `on_install` runs inside the commit critical
//! section right after the store installs a version, so index state always
//! reflects the latest committed version of every key.
//!
//! Lookups come in two flavours:
//!
//! - `range_query` / `text_search` report the latest committed state only.
//! - `candidates` / `text_candidates` also include retired entries newer than
//!   a snapshot. The query engine uses these and re-validates every key
//!   against the snapshot, so index order or staleness never leaks into results.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, info};

use super::inverted_index::InvertedIndex;
use super::lib::{IndexKey, IndexStats, KeyRange, ScoredKey, SecondaryIndex, rank_hits};
use super::ordered_index::OrderedIndex;
use super::tokenizer::{normalize_query, term_frequencies};
use crate::error::{KataError, KataResult};
use crate::record::{Fields, PrimaryKey, Value};
use crate::schema::CollectionSchema;
use crate::storage_engine::mvcc::Timestamp;

#[derive(Debug, Default)]
pub struct IndexManager {
    collection: String,
    ordered: BTreeMap<String, OrderedIndex>,
    inverted: BTreeMap<String, InvertedIndex>,
}

impl IndexManager {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            ..Self::default()
        }
    }

    /// Create indexes for every field `schema` declares indexed or text-indexed
    /// that has none yet, back-filled from `latest`. Returns the fields that got
    /// a new index.
    pub fn sync_schema(&mut self, schema: &CollectionSchema, latest: &[(PrimaryKey, Arc<Fields>)], built_at: Timestamp) -> Vec<String> {
        let mut created = Vec::new();

        for field in schema.indexed_fields() {
            if self.ordered.contains_key(field) {
                continue;
            }
            let mut index = OrderedIndex::new(field, built_at);
            for (key, fields) in latest {
                if let Some(value) = fields.get(field) {
                    index.insert(IndexKey::from(value), key.clone());
                }
            }
            debug!(collection = %self.collection, field, entries = index.len(), "built ordered index");
            self.ordered.insert(field.to_string(), index);
            created.push(field.to_string());
        }

        for field in schema.text_fields() {
            if self.inverted.contains_key(field) {
                continue;
            }
            let mut index = InvertedIndex::new(field, built_at);
            for (key, fields) in latest {
                index.apply(built_at, key, None, fields.get(field));
            }
            debug!(collection = %self.collection, field, entries = index.len(), "built inverted index");
            self.inverted.insert(field.to_string(), index);
            created.push(format!("{field} (text)"));
        }

        if !created.is_empty() && !latest.is_empty() {
            info!(collection = %self.collection, indexes = ?created, records = latest.len(), "back-filled indexes");
        }
        created
    }

    /// Move every index from `old` to `new` for `key` at `commit_ts`
    pub fn on_install(&mut self, commit_ts: Timestamp, key: &str, old: Option<&Fields>, new: Option<&Fields>) {
        for (field, index) in self.ordered.iter_mut() {
            index.apply(commit_ts, key, old.and_then(|f| f.get(field)), new.and_then(|f| f.get(field)));
        }
        for (field, index) in self.inverted.iter_mut() {
            index.apply(commit_ts, key, old.and_then(|f| f.get(field)), new.and_then(|f| f.get(field)));
        }
    }

    fn ordered_index(&self, field: &str) -> KataResult<&OrderedIndex> {
        self.ordered
            .get(field)
            .ok_or_else(|| KataError::InvalidQuery(format!("field {field} of {} is not indexed", self.collection)))
    }

    /// Keys whose latest committed `field` lies in `[low, high]`, ordered by value then key.
    ///
    /// This is a candidate generator; callers re-validate under their snapshot.
    pub fn range_query(&self, field: &str, low: &Value, high: &Value) -> KataResult<Vec<PrimaryKey>> {
        self.range(field, &KeyRange::inclusive(IndexKey::from(low), IndexKey::from(high)))
    }

    pub fn range(&self, field: &str, range: &KeyRange) -> KataResult<Vec<PrimaryKey>> {
        Ok(self.ordered_index(field)?.range(range))
    }

    /// Whether `field` has an ordered index complete for snapshots at `snapshot_ts`
    pub fn ordered_usable(&self, field: &str, snapshot_ts: Timestamp) -> bool {
        self.ordered.get(field).is_some_and(|index| index.built_at() <= snapshot_ts)
    }

    /// Whether every text index is complete for snapshots at `snapshot_ts`
    pub fn text_usable(&self, snapshot_ts: Timestamp) -> bool {
        !self.inverted.is_empty() && self.inverted.values().all(|index| index.built_at() <= snapshot_ts)
    }

    /// Snapshot candidates of a range predicate, `None` without a usable index
    pub fn candidates(&self, field: &str, range: &KeyRange, snapshot_ts: Timestamp) -> Option<BTreeSet<PrimaryKey>> {
        self.ordered
            .get(field)
            .filter(|index| index.built_at() <= snapshot_ts)
            .map(|index| index.candidates(range, snapshot_ts))
    }

    /// Live entries inside `range`, `None` when `field` is not indexed
    pub fn estimate(&self, field: &str, range: &KeyRange) -> Option<usize> {
        self.ordered.get(field).map(|index| index.estimate(range))
    }

    /// Upper bound on text hits: the rarest token's document frequency across text fields
    pub fn estimate_text(&self, tokens: &[String]) -> usize {
        tokens
            .iter()
            .map(|token| self.inverted.values().map(|index| index.document_frequency(token)).sum::<usize>())
            .min()
            .unwrap_or(0)
    }

    /// Keys containing every token in some text field, ranked by summed term
    /// frequency across all text fields. Ties go to the smaller key.
    pub fn text_search<S: AsRef<str>>(&self, tokens: &[S]) -> Vec<ScoredKey> {
        let tokens = normalize_query(tokens);
        if tokens.is_empty() {
            return Vec::new();
        }

        let mut scores: Option<BTreeMap<PrimaryKey, u32>> = None;
        for token in &tokens {
            let mut per_token: BTreeMap<PrimaryKey, u32> = BTreeMap::new();
            for index in self.inverted.values() {
                for (key, tf) in index.postings(token).into_iter().flatten() {
                    *per_token.entry(key.clone()).or_insert(0) += tf;
                }
            }
            scores = Some(match scores {
                None => per_token,
                Some(acc) => acc
                    .into_iter()
                    .filter_map(|(key, score)| per_token.get(&key).map(|tf| (key, score + tf)))
                    .collect(),
            });
        }

        let mut hits: Vec<ScoredKey> = scores
            .unwrap_or_default()
            .into_iter()
            .map(|(key, score)| ScoredKey { key, score })
            .collect();
        rank_hits(&mut hits);
        hits
    }

    /// `text_search` restricted to one text field
    pub fn text_search_field<S: AsRef<str>>(&self, field: &str, tokens: &[S]) -> KataResult<Vec<ScoredKey>> {
        let index = self
            .inverted
            .get(field)
            .ok_or_else(|| KataError::InvalidQuery(format!("field {field} of {} is not text-indexed", self.collection)))?;
        Ok(index.search(&normalize_query(tokens)))
    }

    /// Snapshot candidates for normalized `tokens`, `None` without usable text indexes
    pub fn text_candidates(&self, tokens: &[String], snapshot_ts: Timestamp) -> Option<BTreeSet<PrimaryKey>> {
        if !self.text_usable(snapshot_ts) {
            return None;
        }
        let mut result: Option<BTreeSet<PrimaryKey>> = None;
        for token in tokens {
            let keys: BTreeSet<PrimaryKey> = self.inverted.values().flat_map(|index| index.candidates(token, snapshot_ts)).collect();
            result = Some(match result {
                None => keys,
                Some(acc) => acc.intersection(&keys).cloned().collect(),
            });
        }
        Some(result.unwrap_or_default())
    }

    pub fn has_text_index(&self) -> bool {
        !self.inverted.is_empty()
    }

    pub fn is_indexed(&self, field: &str) -> bool {
        self.ordered.contains_key(field)
    }

    /// Drop retired entries every snapshot at or after `watermark` has moved past
    pub fn prune_retired(&mut self, watermark: Timestamp) -> usize {
        let ordered: usize = self.ordered.values_mut().map(|index| index.prune_retired(watermark)).sum();
        let inverted: usize = self.inverted.values_mut().map(|index| index.prune_retired(watermark)).sum();
        ordered + inverted
    }

    /// Check that live entries match `latest` exactly: one ordered entry per
    /// (value, key) and one posting per (token, key) with its term frequency
    pub fn verify(&self, latest: &[(PrimaryKey, Arc<Fields>)]) -> KataResult<()> {
        for (field, index) in &self.ordered {
            let mut expected = 0;
            for (key, fields) in latest {
                let Some(value) = fields.get(field) else { continue };
                expected += 1;
                if !index.contains(&IndexKey::from(value), key) {
                    return Err(KataError::Internal(format!("ordered index {field} of {} misses {key}", self.collection)));
                }
            }
            if index.len() != expected {
                return Err(KataError::Internal(format!(
                    "ordered index {field} of {} has {} entries, expected {expected}",
                    self.collection,
                    index.len()
                )));
            }
        }

        for (field, index) in &self.inverted {
            let mut expected = 0;
            for (key, fields) in latest {
                let Some(text) = fields.get(field).and_then(Value::as_str) else { continue };
                for (token, tf) in term_frequencies(text) {
                    expected += 1;
                    if index.postings(&token).and_then(|p| p.get(key)) != Some(&tf) {
                        return Err(KataError::Internal(format!("inverted index {field} of {} is stale for {key}", self.collection)));
                    }
                }
            }
            if index.len() != expected {
                return Err(KataError::Internal(format!(
                    "inverted index {field} of {} has {} postings, expected {expected}",
                    self.collection,
                    index.len()
                )));
            }
        }
        Ok(())
    }

    pub fn stats(&self) -> Vec<IndexStats> {
        self.ordered
            .values()
            .map(SecondaryIndex::stats)
            .chain(self.inverted.values().map(SecondaryIndex::stats))
            .collect()
    }
}
