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

//! Inverted full-text index over one text field.

use std::collections::{BTreeMap, BTreeSet};

use super::lib::{IndexStats, IndexType, ScoredKey, SecondaryIndex, rank_hits};
use super::tokenizer::term_frequencies;
use crate::record::{PrimaryKey, Value};
use crate::storage_engine::mvcc::Timestamp;

/// Token postings with per-key term frequency
#[derive(Debug, Clone, Default)]
pub struct InvertedIndex {
    field: String,
    postings: BTreeMap<String, BTreeMap<PrimaryKey, u32>>,
    retired: BTreeMap<String, BTreeMap<PrimaryKey, Timestamp>>,
    retirement_log: BTreeMap<Timestamp, Vec<(String, PrimaryKey)>>,
    entry_count: usize,
    retired_count: usize,
    built_at: Timestamp,
}

fn frequencies(value: Option<&Value>) -> BTreeMap<String, u32> {
    value.and_then(Value::as_str).map(term_frequencies).unwrap_or_default()
}

impl InvertedIndex {
    pub fn new(field: impl Into<String>, built_at: Timestamp) -> Self {
        Self {
            field: field.into(),
            built_at,
            ..Self::default()
        }
    }

    /// Live postings of a normalized token
    pub fn postings(&self, token: &str) -> Option<&BTreeMap<PrimaryKey, u32>> {
        self.postings.get(token)
    }

    /// Keys containing every token, ranked by summed term frequency
    pub fn search(&self, tokens: &[String]) -> Vec<ScoredKey> {
        let Some((first, rest)) = tokens.split_first() else {
            return Vec::new();
        };
        let Some(seed) = self.postings.get(first) else {
            return Vec::new();
        };

        let mut hits: Vec<ScoredKey> = seed
            .iter()
            .filter_map(|(key, tf)| {
                let mut score = *tf;
                for token in rest {
                    score += *self.postings.get(token)?.get(key)?;
                }
                Some(ScoredKey { key: key.clone(), score })
            })
            .collect();
        rank_hits(&mut hits);
        hits
    }

    /// Keys whose version visible at `snapshot_ts` may contain `token`
    pub fn candidates(&self, token: &str, snapshot_ts: Timestamp) -> BTreeSet<PrimaryKey> {
        let mut keys: BTreeSet<PrimaryKey> = self.postings.get(token).map(|p| p.keys().cloned().collect()).unwrap_or_default();
        if let Some(retired) = self.retired.get(token) {
            keys.extend(retired.iter().filter(|(_, at)| **at > snapshot_ts).map(|(key, _)| key.clone()));
        }
        keys
    }

    /// Number of live keys containing `token`
    pub fn document_frequency(&self, token: &str) -> usize {
        self.postings.get(token).map_or(0, BTreeMap::len)
    }

    fn retire(&mut self, token: String, key: PrimaryKey, retired_at: Timestamp) {
        let previous = self.retired.entry(token.clone()).or_default().insert(key.clone(), retired_at);
        self.retired_count += usize::from(previous.is_none());
        self.retirement_log.entry(retired_at).or_default().push((token, key));
    }
}

impl SecondaryIndex for InvertedIndex {
    fn field(&self) -> &str {
        &self.field
    }

    fn index_type(&self) -> IndexType {
        IndexType::Inverted
    }

    fn apply(&mut self, commit_ts: Timestamp, key: &str, old: Option<&Value>, new: Option<&Value>) {
        let old_tf = frequencies(old);
        let new_tf = frequencies(new);

        for token in old_tf.keys().filter(|token| !new_tf.contains_key(*token)) {
            let Some(posting) = self.postings.get_mut(token) else { continue };
            if posting.remove(key).is_some() {
                self.entry_count -= 1;
                if posting.is_empty() {
                    self.postings.remove(token);
                }
                self.retire(token.clone(), key.to_string(), commit_ts);
            }
        }

        for (token, tf) in new_tf {
            if self.postings.entry(token).or_default().insert(key.to_string(), tf).is_none() {
                self.entry_count += 1;
            }
        }
    }

    fn prune_retired(&mut self, watermark: Timestamp) -> usize {
        let keep = self.retirement_log.split_off(&watermark.saturating_add(1));
        let expired = std::mem::replace(&mut self.retirement_log, keep);

        let mut pruned = 0;
        for (token, key) in expired.into_values().flatten() {
            let Some(retired) = self.retired.get_mut(&token) else { continue };
            if retired.get(&key).is_some_and(|at| *at <= watermark) {
                retired.remove(&key);
                pruned += 1;
            }
            if retired.is_empty() {
                self.retired.remove(&token);
            }
        }
        self.retired_count -= pruned;
        pruned
    }

    fn built_at(&self) -> Timestamp {
        self.built_at
    }

    fn stats(&self) -> IndexStats {
        IndexStats {
            entry_count: self.entry_count,
            distinct_keys: self.postings.len(),
            retired_count: self.retired_count,
            ..IndexStats::new(self.field.clone(), IndexType::Inverted, self.built_at)
        }
    }

    fn len(&self) -> usize {
        self.entry_count
    }
}
