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

use std::cmp::Ordering;
use std::fmt;
use std::ops::Bound;

use chrono::{DateTime, Utc};

use crate::record::{PrimaryKey, Value};
use crate::storage_engine::mvcc::Timestamp;

/// Types of indices available
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    /// Ordered secondary index for equality and range lookups
    Ordered,
    /// Inverted full-text index over tokenized text
    Inverted,
}

impl fmt::Display for IndexType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexType::Ordered => f.write_str("ordered"),
            IndexType::Inverted => f.write_str("inverted"),
        }
    }
}

/// Ordering key of an indexed field value.
///
/// Values order by type first and by value within a type. Strings and text
/// share one key space, floats use IEEE total ordering with `-0.0` folded
/// into `0.0`.
#[derive(Debug, Clone)]
pub enum IndexKey {
    Integer(i64),
    Float(f64),
    Str(String),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
}

impl IndexKey {
    fn rank(&self) -> u8 {
        match self {
            IndexKey::Boolean(_) => 0,
            IndexKey::Integer(_) => 1,
            IndexKey::Float(_) => 2,
            IndexKey::Timestamp(_) => 3,
            IndexKey::Str(_) => 4,
        }
    }
}

impl From<&Value> for IndexKey {
    fn from(value: &Value) -> Self {
        match value {
            Value::Integer(v) => IndexKey::Integer(*v),
            Value::Float(v) => IndexKey::Float(if *v == 0.0 { 0.0 } else { *v }),
            Value::String(s) | Value::Text(s) => IndexKey::Str(s.clone()),
            Value::Boolean(b) => IndexKey::Boolean(*b),
            Value::Timestamp(t) => IndexKey::Timestamp(*t),
        }
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (IndexKey::Integer(a), IndexKey::Integer(b)) => a.cmp(b),
            (IndexKey::Float(a), IndexKey::Float(b)) => a.total_cmp(b),
            (IndexKey::Str(a), IndexKey::Str(b)) => a.cmp(b),
            (IndexKey::Boolean(a), IndexKey::Boolean(b)) => a.cmp(b),
            (IndexKey::Timestamp(a), IndexKey::Timestamp(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for IndexKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IndexKey {}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexKey::Integer(v) => write!(f, "{v}"),
            IndexKey::Float(v) => write!(f, "{v}"),
            IndexKey::Str(s) => write!(f, "{s:?}"),
            IndexKey::Boolean(b) => write!(f, "{b}"),
            IndexKey::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
        }
    }
}

/// A range of index keys with independent bounds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub low: Bound<IndexKey>,
    pub high: Bound<IndexKey>,
}

impl KeyRange {
    pub fn new(low: Bound<IndexKey>, high: Bound<IndexKey>) -> Self {
        Self { low, high }
    }

    /// Single-value range
    pub fn point(key: IndexKey) -> Self {
        Self::new(Bound::Included(key.clone()), Bound::Included(key))
    }

    /// Inclusive range `[low, high]`
    pub fn inclusive(low: IndexKey, high: IndexKey) -> Self {
        Self::new(Bound::Included(low), Bound::Included(high))
    }

    pub fn unbounded() -> Self {
        Self::new(Bound::Unbounded, Bound::Unbounded)
    }

    /// Whether at least one side is finite
    pub fn is_bounded(&self) -> bool {
        !matches!((&self.low, &self.high), (Bound::Unbounded, Bound::Unbounded))
    }

    /// Whether no key can fall inside the range
    pub fn is_empty(&self) -> bool {
        match (&self.low, &self.high) {
            (Bound::Included(a), Bound::Included(b)) => a > b,
            (Bound::Included(a), Bound::Excluded(b)) | (Bound::Excluded(a), Bound::Included(b)) | (Bound::Excluded(a), Bound::Excluded(b)) => a >= b,
            _ => false,
        }
    }

    pub fn contains(&self, key: &IndexKey) -> bool {
        let above = match &self.low {
            Bound::Included(low) => key >= low,
            Bound::Excluded(low) => key > low,
            Bound::Unbounded => true,
        };
        let below = match &self.high {
            Bound::Included(high) => key <= high,
            Bound::Excluded(high) => key < high,
            Bound::Unbounded => true,
        };
        above && below
    }

    /// Narrow to the overlap of two ranges
    pub fn intersect(&self, other: &KeyRange) -> KeyRange {
        KeyRange {
            low: tighter(&self.low, &other.low, Ordering::Greater),
            high: tighter(&self.high, &other.high, Ordering::Less),
        }
    }

    /// Borrowed bounds for `BTreeMap::range`
    pub fn as_bounds(&self) -> (Bound<&IndexKey>, Bound<&IndexKey>) {
        (self.low.as_ref(), self.high.as_ref())
    }
}

/// Pick the more restrictive of two bounds; `prefer` is the ordering that makes `a` tighter
fn tighter(a: &Bound<IndexKey>, b: &Bound<IndexKey>, prefer: Ordering) -> Bound<IndexKey> {
    match (a, b) {
        (Bound::Unbounded, other) | (other, Bound::Unbounded) => other.clone(),
        (Bound::Included(ka) | Bound::Excluded(ka), Bound::Included(kb) | Bound::Excluded(kb)) => match ka.cmp(kb) {
            Ordering::Equal if matches!(a, Bound::Excluded(_)) => a.clone(),
            Ordering::Equal => b.clone(),
            ord if ord == prefer => a.clone(),
            _ => b.clone(),
        },
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.low {
            Bound::Included(k) => write!(f, "[{k}")?,
            Bound::Excluded(k) => write!(f, "({k}")?,
            Bound::Unbounded => f.write_str("(-inf")?,
        }
        f.write_str(", ")?;
        match &self.high {
            Bound::Included(k) => write!(f, "{k}]"),
            Bound::Excluded(k) => write!(f, "{k})"),
            Bound::Unbounded => f.write_str("+inf)"),
        }
    }
}

/// A text search hit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredKey {
    pub key: PrimaryKey,
    /// Summed term frequency of the query tokens
    pub score: u32,
}

/// Rank hits by score descending, then key ascending
pub fn rank_hits(hits: &mut [ScoredKey]) {
    hits.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.key.cmp(&b.key)));
}

/// Statistics about an index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexStats {
    pub field: String,
    pub index_type: IndexType,
    /// Live (value or token, key) entries
    pub entry_count: usize,
    /// Distinct values or tokens
    pub distinct_keys: usize,
    /// Entries kept for snapshots older than their retirement
    pub retired_count: usize,
    /// Commit timestamp from which the index covers every snapshot
    pub built_at: Timestamp,
}

impl IndexStats {
    pub fn new(field: impl Into<String>, index_type: IndexType, built_at: Timestamp) -> Self {
        Self {
            field: field.into(),
            index_type,
            entry_count: 0,
            distinct_keys: 0,
            retired_count: 0,
            built_at,
        }
    }
}

/// Common maintenance surface of the secondary indexes
pub trait SecondaryIndex: Send + Sync {
    /// Field this index covers
    fn field(&self) -> &str;

    fn index_type(&self) -> IndexType;

    /// Replace the entries contributed by `old` with those of `new` for `key`.
    /// Entries that disappear are retired at `commit_ts`.
    fn apply(&mut self, commit_ts: Timestamp, key: &str, old: Option<&Value>, new: Option<&Value>);

    /// Drop retired entries no snapshot at or after `watermark` needs
    fn prune_retired(&mut self, watermark: Timestamp) -> usize;

    /// Oldest snapshot this index is complete for
    fn built_at(&self) -> Timestamp;

    fn stats(&self) -> IndexStats;

    /// Number of live entries
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_key_orders_by_type_then_value() {
        let mut keys = vec![
            IndexKey::Str("b".into()),
            IndexKey::Float(1.5),
            IndexKey::Integer(10),
            IndexKey::Boolean(true),
            IndexKey::Integer(-3),
            IndexKey::Str("a".into()),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                IndexKey::Boolean(true),
                IndexKey::Integer(-3),
                IndexKey::Integer(10),
                IndexKey::Float(1.5),
                IndexKey::Str("a".into()),
                IndexKey::Str("b".into()),
            ]
        );
    }

    #[test]
    fn test_negative_zero_folds_into_zero() {
        assert_eq!(IndexKey::from(&Value::Float(-0.0)), IndexKey::from(&Value::Float(0.0)));
    }

    #[test]
    fn test_string_and_text_share_key_space() {
        assert_eq!(IndexKey::from(&Value::String("x".into())), IndexKey::from(&Value::text("x")));
    }

    #[test]
    fn test_key_range_contains_and_emptiness() {
        let range = KeyRange::new(Bound::Excluded(IndexKey::Integer(1)), Bound::Included(IndexKey::Integer(5)));
        assert!(!range.contains(&IndexKey::Integer(1)));
        assert!(range.contains(&IndexKey::Integer(5)));
        assert!(!range.is_empty());

        let empty = KeyRange::new(Bound::Excluded(IndexKey::Integer(3)), Bound::Excluded(IndexKey::Integer(3)));
        assert!(empty.is_empty());
        assert!(KeyRange::point(IndexKey::Integer(3)).contains(&IndexKey::Integer(3)));
    }

    #[test]
    fn test_key_range_intersection_takes_tighter_bounds() {
        let a = KeyRange::new(Bound::Included(IndexKey::Integer(1)), Bound::Unbounded);
        let b = KeyRange::new(Bound::Excluded(IndexKey::Integer(1)), Bound::Included(IndexKey::Integer(9)));
        let both = a.intersect(&b);
        assert_eq!(both.low, Bound::Excluded(IndexKey::Integer(1)));
        assert_eq!(both.high, Bound::Included(IndexKey::Integer(9)));
    }

    #[test]
    fn test_rank_hits_breaks_ties_by_key() {
        let mut hits = vec![
            ScoredKey { key: "b".into(), score: 2 },
            ScoredKey { key: "c".into(), score: 5 },
            ScoredKey { key: "a".into(), score: 2 },
        ];
        rank_hits(&mut hits);
        let keys: Vec<&str> = hits.iter().map(|h| h.key.as_str()).collect();
        assert_eq!(keys, vec!["c", "a", "b"]);
    }
}
