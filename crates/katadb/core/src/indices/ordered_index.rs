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

//! Ordered secondary index over one field.
//!
//! Live entries map a field value to the keys whose latest committed version
//! carries it. When a commit moves a key off a value, the pair is retired at
//! that commit timestamp instead of vanishing, so readers with older
//! snapshots still find it as a candidate until GC passes the retirement.

use std::collections::{BTreeMap, BTreeSet};

use super::lib::{IndexKey, IndexStats, IndexType, KeyRange, SecondaryIndex};
use crate::record::{PrimaryKey, Value};
use crate::storage_engine::mvcc::Timestamp;

#[derive(Debug, Clone, Default)]
pub struct OrderedIndex {
    field: String,
    live: BTreeMap<IndexKey, BTreeSet<PrimaryKey>>,
    retired: BTreeMap<IndexKey, BTreeMap<PrimaryKey, Timestamp>>,
    /// Retirements by timestamp, for pruning
    retirement_log: BTreeMap<Timestamp, Vec<(IndexKey, PrimaryKey)>>,
    entry_count: usize,
    retired_count: usize,
    built_at: Timestamp,
}

impl OrderedIndex {
    pub fn new(field: impl Into<String>, built_at: Timestamp) -> Self {
        Self {
            field: field.into(),
            built_at,
            ..Self::default()
        }
    }

    pub fn insert(&mut self, value: IndexKey, key: PrimaryKey) -> bool {
        let inserted = self.live.entry(value).or_default().insert(key);
        self.entry_count += usize::from(inserted);
        inserted
    }

    pub fn remove(&mut self, value: &IndexKey, key: &str) -> bool {
        let Some(keys) = self.live.get_mut(value) else {
            return false;
        };
        let removed = keys.remove(key);
        if keys.is_empty() {
            self.live.remove(value);
        }
        self.entry_count -= usize::from(removed);
        removed
    }

    fn retire(&mut self, value: IndexKey, key: PrimaryKey, retired_at: Timestamp) {
        let previous = self.retired.entry(value.clone()).or_default().insert(key.clone(), retired_at);
        self.retired_count += usize::from(previous.is_none());
        self.retirement_log.entry(retired_at).or_default().push((value, key));
    }

    /// Live keys with a value inside `range`, ordered by value then key
    pub fn range(&self, range: &KeyRange) -> Vec<PrimaryKey> {
        if range.is_empty() {
            return Vec::new();
        }
        self.live.range(range.as_bounds()).flat_map(|(_, keys)| keys.iter().cloned()).collect()
    }

    /// Keys whose value inside `range` may be visible to a snapshot at `snapshot_ts`
    pub fn candidates(&self, range: &KeyRange, snapshot_ts: Timestamp) -> BTreeSet<PrimaryKey> {
        if range.is_empty() {
            return BTreeSet::new();
        }
        let mut keys: BTreeSet<PrimaryKey> = self.live.range(range.as_bounds()).flat_map(|(_, keys)| keys.iter().cloned()).collect();
        for (_, retired) in self.retired.range(range.as_bounds()) {
            keys.extend(retired.iter().filter(|(_, at)| **at > snapshot_ts).map(|(key, _)| key.clone()));
        }
        keys
    }

    /// Number of live entries inside `range`
    pub fn estimate(&self, range: &KeyRange) -> usize {
        if range.is_empty() {
            return 0;
        }
        self.live.range(range.as_bounds()).map(|(_, keys)| keys.len()).sum()
    }

    pub fn contains(&self, value: &IndexKey, key: &str) -> bool {
        self.live.get(value).is_some_and(|keys| keys.contains(key))
    }
}

impl SecondaryIndex for OrderedIndex {
    fn field(&self) -> &str {
        &self.field
    }

    fn index_type(&self) -> IndexType {
        IndexType::Ordered
    }

    fn apply(&mut self, commit_ts: Timestamp, key: &str, old: Option<&Value>, new: Option<&Value>) {
        let old = old.map(IndexKey::from);
        let new = new.map(IndexKey::from);
        if old == new {
            return;
        }
        if let Some(old) = old {
            if self.remove(&old, key) {
                self.retire(old, key.to_string(), commit_ts);
            }
        }
        if let Some(new) = new {
            self.insert(new, key.to_string());
        }
    }

    fn prune_retired(&mut self, watermark: Timestamp) -> usize {
        let keep = self.retirement_log.split_off(&watermark.saturating_add(1));
        let expired = std::mem::replace(&mut self.retirement_log, keep);

        let mut pruned = 0;
        for (value, key) in expired.into_values().flatten() {
            let Some(retired) = self.retired.get_mut(&value) else { continue };
            if retired.get(&key).is_some_and(|at| *at <= watermark) {
                retired.remove(&key);
                pruned += 1;
            }
            if retired.is_empty() {
                self.retired.remove(&value);
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
            distinct_keys: self.live.len(),
            retired_count: self.retired_count,
            ..IndexStats::new(self.field.clone(), IndexType::Ordered, self.built_at)
        }
    }

    fn len(&self) -> usize {
        self.entry_count
    }
}
