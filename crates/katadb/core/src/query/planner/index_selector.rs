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

use std::collections::BTreeMap;
use std::fmt;

use crate::indices::{IndexManager, KeyRange};
use crate::query::predicate::QueryPredicate;
use crate::storage_engine::mvcc::Timestamp;

/// How the executor produces candidate keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessPath {
    /// Visit every key visible to the snapshot
    FullScan,
    /// Ordered index range lookup on one field
    IndexScan { field: String, range: KeyRange },
    /// Posting list intersection over every text index
    TextSearch { tokens: Vec<String> },
    /// Index range lookup intersected with text postings
    IndexAndText { field: String, range: KeyRange, tokens: Vec<String> },
}

impl AccessPath {
    pub fn uses_index(&self) -> bool {
        !matches!(self, AccessPath::FullScan)
    }
}

impl fmt::Display for AccessPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessPath::FullScan => f.write_str("full scan"),
            AccessPath::IndexScan { field, range } => write!(f, "index scan on {field} {range}"),
            AccessPath::TextSearch { tokens } => write!(f, "text search {tokens:?}"),
            AccessPath::IndexAndText { field, range, tokens } => write!(f, "index scan on {field} {range} intersected with text search {tokens:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexRecommendation {
    pub access_path: AccessPath,
    /// Live index entries the chosen path is expected to yield; the key count for a full scan
    pub estimated_candidates: usize,
    pub reasoning: String,
}

/// Picks the access path for a query under one snapshot.
///
/// Predicates on the same field are folded into a single range. Among indexed
/// fields whose index covers the snapshot, the range with the fewest live
/// entries wins; ties go to the field that sorts first.
pub struct IndexSelector<'a> {
    indexes: &'a IndexManager,
    snapshot_ts: Timestamp,
}

impl<'a> IndexSelector<'a> {
    pub fn new(indexes: &'a IndexManager, snapshot_ts: Timestamp) -> Self {
        Self { indexes, snapshot_ts }
    }

    /// Fold predicates into one key range per field
    pub fn field_ranges(predicates: &[QueryPredicate]) -> BTreeMap<&str, KeyRange> {
        let mut ranges: BTreeMap<&str, KeyRange> = BTreeMap::new();
        for predicate in predicates {
            let range = predicate.key_range();
            ranges
                .entry(predicate.field.as_str())
                .and_modify(|existing| *existing = existing.intersect(&range))
                .or_insert(range);
        }
        ranges
    }

    pub fn select_best_index(&self, predicates: &[QueryPredicate], tokens: &[String], total_keys: usize) -> IndexRecommendation {
        let mut best: Option<(&str, KeyRange, usize)> = None;
        for (field, range) in Self::field_ranges(predicates) {
            if !range.is_bounded() || !self.indexes.ordered_usable(field, self.snapshot_ts) {
                continue;
            }
            let estimate = self.indexes.estimate(field, &range).unwrap_or(usize::MAX);
            if best.as_ref().is_none_or(|(_, _, current)| estimate < *current) {
                best = Some((field, range, estimate));
            }
        }

        let text = (!tokens.is_empty() && self.indexes.text_usable(self.snapshot_ts)).then(|| self.indexes.estimate_text(tokens));

        match (best, text) {
            (Some((field, range, estimate)), Some(text_estimate)) => IndexRecommendation {
                reasoning: format!("index on {field} ({estimate} entries) intersected with text postings ({text_estimate})"),
                access_path: AccessPath::IndexAndText {
                    field: field.to_string(),
                    range,
                    tokens: tokens.to_vec(),
                },
                estimated_candidates: estimate.min(text_estimate),
            },
            (Some((field, range, estimate)), None) => IndexRecommendation {
                reasoning: format!("index on {field} narrows to {estimate} of {total_keys} keys"),
                access_path: AccessPath::IndexScan { field: field.to_string(), range },
                estimated_candidates: estimate,
            },
            (None, Some(text_estimate)) => IndexRecommendation {
                reasoning: format!("text postings narrow to at most {text_estimate} keys"),
                access_path: AccessPath::TextSearch { tokens: tokens.to_vec() },
                estimated_candidates: text_estimate,
            },
            (None, None) => IndexRecommendation {
                reasoning: if predicates.is_empty() && tokens.is_empty() {
                    "no predicates, full scan required".to_string()
                } else {
                    "no usable index for the predicates".to_string()
                },
                access_path: AccessPath::FullScan,
                estimated_candidates: total_keys,
            },
        }
    }
}
