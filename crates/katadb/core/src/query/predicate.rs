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

//! Structured query form: field predicates, text tokens, sort and pagination.

use std::cmp::Ordering;
use std::fmt;
use std::ops::Bound;

use serde::{Deserialize, Serialize};

use crate::indices::{IndexKey, KeyRange};
use crate::record::{Record, Value};

/// Comparison applied to one field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredicateOperator {
    Eq(Value),
    Gt(Value),
    Ge(Value),
    Lt(Value),
    Le(Value),
    /// Inclusive on both ends
    Between(Value, Value),
}

/// A predicate on a single field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPredicate {
    pub field: String,
    pub operator: PredicateOperator,
}

impl QueryPredicate {
    pub fn new(field: impl Into<String>, operator: PredicateOperator) -> Self {
        Self { field: field.into(), operator }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, PredicateOperator::Eq(value.into()))
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, PredicateOperator::Gt(value.into()))
    }

    pub fn ge(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, PredicateOperator::Ge(value.into()))
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, PredicateOperator::Lt(value.into()))
    }

    pub fn le(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, PredicateOperator::Le(value.into()))
    }

    pub fn between(field: impl Into<String>, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        Self::new(field, PredicateOperator::Between(low.into(), high.into()))
    }

    /// Operand values of the predicate
    pub fn values(&self) -> Vec<&Value> {
        match &self.operator {
            PredicateOperator::Eq(v)
            | PredicateOperator::Gt(v)
            | PredicateOperator::Ge(v)
            | PredicateOperator::Lt(v)
            | PredicateOperator::Le(v) => vec![v],
            PredicateOperator::Between(low, high) => vec![low, high],
        }
    }

    /// Range of index keys satisfying the predicate
    pub fn key_range(&self) -> KeyRange {
        match &self.operator {
            PredicateOperator::Eq(v) => KeyRange::point(v.into()),
            PredicateOperator::Gt(v) => KeyRange::new(Bound::Excluded(v.into()), Bound::Unbounded),
            PredicateOperator::Ge(v) => KeyRange::new(Bound::Included(v.into()), Bound::Unbounded),
            PredicateOperator::Lt(v) => KeyRange::new(Bound::Unbounded, Bound::Excluded(v.into())),
            PredicateOperator::Le(v) => KeyRange::new(Bound::Unbounded, Bound::Included(v.into())),
            PredicateOperator::Between(low, high) => KeyRange::inclusive(low.into(), high.into()),
        }
    }

    /// Whether `record` satisfies the predicate. Absent fields never match.
    pub fn matches(&self, record: &Record) -> bool {
        record.get(&self.field).is_some_and(|value| self.key_range().contains(&IndexKey::from(value)))
    }
}

impl fmt::Display for QueryPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.operator {
            PredicateOperator::Eq(v) => write!(f, "{} = {v}", self.field),
            PredicateOperator::Gt(v) => write!(f, "{} > {v}", self.field),
            PredicateOperator::Ge(v) => write!(f, "{} >= {v}", self.field),
            PredicateOperator::Lt(v) => write!(f, "{} < {v}", self.field),
            PredicateOperator::Le(v) => write!(f, "{} <= {v}", self.field),
            PredicateOperator::Between(low, high) => write!(f, "{} BETWEEN {low} AND {high}", self.field),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    #[serde(default)]
    pub order: SortOrder,
}

impl SortSpec {
    /// Compare two records on the sort field. Absent values go last in either order.
    pub fn compare(&self, a: &Record, b: &Record) -> Ordering {
        let left = a.get(&self.field).map(IndexKey::from);
        let right = b.get(&self.field).map(IndexKey::from);
        match (left, right) {
            (Some(l), Some(r)) => match self.order {
                SortOrder::Ascending => l.cmp(&r),
                SortOrder::Descending => r.cmp(&l),
            },
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}

/// A structured query against one collection
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Query {
    pub collection: String,
    #[serde(default)]
    pub predicates: Vec<QueryPredicate>,
    /// Text search tokens, matched across every text-indexed field
    #[serde(default)]
    pub text: Vec<String>,
    #[serde(default)]
    pub sort: Option<SortSpec>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

impl Query {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            ..Self::default()
        }
    }

    pub fn filter(mut self, predicate: QueryPredicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn text<S: Into<String>>(mut self, tokens: impl IntoIterator<Item = S>) -> Self {
        self.text.extend(tokens.into_iter().map(Into::into));
        self
    }

    pub fn sort_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort = Some(SortSpec { field: field.into(), order });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Whether every predicate holds for `record`
    pub fn matches_predicates(&self, record: &Record) -> bool {
        self.predicates.iter().all(|p| p.matches(record))
    }
}
