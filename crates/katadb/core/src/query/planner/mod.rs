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

//! Query Planning
//!
//! Validates a structured query against its collection schema and picks an
//! access path. Plans are cheap to build and are produced per execution, under
//! the executing transaction's snapshot.

pub mod cost_model;
pub mod index_selector;

pub use cost_model::{CostEstimate, CostModel, OperationCost};
pub use index_selector::{AccessPath, IndexRecommendation, IndexSelector};

use std::fmt;

use tracing::debug;

use crate::config::ScanFallback;
use crate::error::{KataError, KataResult};
use crate::indices::{IndexManager, normalize_query};
use crate::query::predicate::{Query, SortSpec};
use crate::schema::CollectionSchema;
use crate::storage_engine::mvcc::Timestamp;

/// The chosen way to run one query
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub collection: String,
    pub access_path: AccessPath,
    pub estimated_candidates: usize,
    /// Keys in the collection when the plan was made
    pub collection_keys: usize,
    /// Predicates re-checked on every candidate
    pub residual_predicates: usize,
    /// Normalized text tokens
    pub tokens: Vec<String>,
    pub sort: Option<SortSpec>,
    pub cost: CostEstimate,
    pub snapshot_ts: Timestamp,
    pub reasoning: String,
}

impl fmt::Display for QueryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "collection:   {}", self.collection)?;
        writeln!(f, "snapshot:     {}", self.snapshot_ts)?;
        writeln!(f, "access path:  {}", self.access_path)?;
        writeln!(f, "candidates:   ~{} of {} keys", self.estimated_candidates, self.collection_keys)?;
        writeln!(f, "validation:   {} predicate(s), {} token(s) per candidate", self.residual_predicates, self.tokens.len())?;
        match &self.sort {
            Some(sort) => writeln!(f, "sort:         {} {:?}", sort.field, sort.order)?,
            None if !self.tokens.is_empty() => writeln!(f, "sort:         text score")?,
            None => writeln!(f, "sort:         primary key")?,
        }
        writeln!(f, "cost:         {:.2}", self.cost.total_cost)?;
        write!(f, "reason:       {}", self.reasoning)
    }
}

pub struct QueryPlanner {
    cost_model: CostModel,
    scan_fallback: ScanFallback,
}

impl QueryPlanner {
    pub fn new(scan_fallback: ScanFallback) -> Self {
        Self {
            cost_model: CostModel::new(),
            scan_fallback,
        }
    }

    /// Check a query against the schema, returning its normalized text tokens
    pub fn validate(query: &Query, schema: &CollectionSchema) -> KataResult<Vec<String>> {
        for predicate in &query.predicates {
            let spec = schema.field(&predicate.field).ok_or_else(|| {
                KataError::InvalidQuery(format!("field {} is not declared in {}", predicate.field, schema.name()))
            })?;
            for value in predicate.values() {
                if !spec.field_type.is_comparable_with(value.field_type()) {
                    return Err(KataError::InvalidQuery(format!(
                        "predicate {predicate} compares {} field with a {} value",
                        spec.field_type,
                        value.field_type()
                    )));
                }
            }
        }

        if let Some(sort) = &query.sort {
            if schema.field(&sort.field).is_none() {
                return Err(KataError::InvalidQuery(format!("sort field {} is not declared in {}", sort.field, schema.name())));
            }
        }

        if query.text.is_empty() {
            return Ok(Vec::new());
        }
        if schema.text_fields().next().is_none() {
            return Err(KataError::InvalidQuery(format!("collection {} has no text-indexed field", schema.name())));
        }
        let tokens = normalize_query(&query.text);
        if tokens.is_empty() {
            return Err(KataError::InvalidQuery(format!("text search {:?} contains no searchable token", query.text)));
        }
        Ok(tokens)
    }

    pub fn plan(
        &self,
        query: &Query,
        schema: &CollectionSchema,
        indexes: &IndexManager,
        collection_keys: usize,
        snapshot_ts: Timestamp,
    ) -> KataResult<QueryPlan> {
        let tokens = Self::validate(query, schema)?;
        let recommendation = IndexSelector::new(indexes, snapshot_ts).select_best_index(&query.predicates, &tokens, collection_keys);

        // Text search scans only when the snapshot predates its inverted index
        if recommendation.access_path == AccessPath::FullScan && self.scan_fallback == ScanFallback::Reject && tokens.is_empty() {
            return Err(KataError::InvalidQuery(format!(
                "query on {} cannot use an index and scan fallback is disabled",
                query.collection
            )));
        }

        let candidates = recommendation.estimated_candidates as u64;
        let mut operations = match &recommendation.access_path {
            AccessPath::FullScan => vec![OperationCost::FullScan { keys: collection_keys as u64 }],
            AccessPath::IndexScan { .. } => vec![OperationCost::IndexScan { entries: candidates }],
            AccessPath::TextSearch { .. } => vec![OperationCost::TextLookup { postings: candidates }],
            AccessPath::IndexAndText { .. } => vec![
                OperationCost::IndexScan { entries: candidates },
                OperationCost::TextLookup { postings: candidates },
            ],
        };
        if recommendation.access_path.uses_index() {
            operations.push(OperationCost::Validate { rows: candidates, predicates: query.predicates.len() });
        }
        operations.push(OperationCost::Sort { rows: candidates });

        let plan = QueryPlan {
            collection: query.collection.clone(),
            access_path: recommendation.access_path,
            estimated_candidates: recommendation.estimated_candidates,
            collection_keys,
            residual_predicates: query.predicates.len(),
            tokens,
            sort: query.sort.clone(),
            cost: self.cost_model.estimate_all(&operations),
            snapshot_ts,
            reasoning: recommendation.reasoning,
        };
        debug!(collection = %plan.collection, path = %plan.access_path, estimate = plan.estimated_candidates, "planned query");
        Ok(plan)
    }
}
