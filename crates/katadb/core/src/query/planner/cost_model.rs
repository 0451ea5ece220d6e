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

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    /// Work to produce candidate keys
    pub lookup_cost: f64,
    /// Snapshot reads and predicate checks on candidates
    pub validation_cost: f64,
    pub sort_cost: f64,
    pub total_cost: f64,
}

impl CostEstimate {
    pub fn new(lookup: f64, validation: f64, sort: f64) -> Self {
        Self {
            lookup_cost: lookup,
            validation_cost: validation,
            sort_cost: sort,
            total_cost: lookup + validation + sort,
        }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn add(&self, other: &CostEstimate) -> CostEstimate {
        CostEstimate::new(
            self.lookup_cost + other.lookup_cost,
            self.validation_cost + other.validation_cost,
            self.sort_cost + other.sort_cost,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OperationCost {
    /// Walk every key of the collection
    FullScan { keys: u64 },
    /// Range lookup in an ordered index
    IndexScan { entries: u64 },
    /// Posting list intersection
    TextLookup { postings: u64 },
    /// Snapshot read and predicate check per candidate
    Validate { rows: u64, predicates: usize },
    Sort { rows: u64 },
}

#[derive(Debug, Clone)]
pub struct CostModel {
    chain_read_cost: f64,
    index_entry_cost: f64,
    posting_cost: f64,
    predicate_cost: f64,
    sort_factor: f64,
}

impl CostModel {
    pub fn new() -> Self {
        Self {
            chain_read_cost: 1.0,
            index_entry_cost: 0.2,
            posting_cost: 0.3,
            predicate_cost: 0.05,
            sort_factor: 0.1,
        }
    }

    pub fn estimate_operation_cost(&self, operation: &OperationCost) -> CostEstimate {
        match operation {
            OperationCost::FullScan { keys } => CostEstimate::new(*keys as f64 * self.chain_read_cost, 0.0, 0.0),
            OperationCost::IndexScan { entries } => CostEstimate::new(*entries as f64 * self.index_entry_cost, 0.0, 0.0),
            OperationCost::TextLookup { postings } => CostEstimate::new(*postings as f64 * self.posting_cost, 0.0, 0.0),
            OperationCost::Validate { rows, predicates } => {
                let per_row = self.chain_read_cost + *predicates as f64 * self.predicate_cost;
                CostEstimate::new(0.0, *rows as f64 * per_row, 0.0)
            }
            OperationCost::Sort { rows } => {
                let n = (*rows).max(1) as f64;
                CostEstimate::new(0.0, 0.0, n * n.log2() * self.sort_factor)
            }
        }
    }

    /// Sum the cost of a sequence of operations
    pub fn estimate_all(&self, operations: &[OperationCost]) -> CostEstimate {
        operations
            .iter()
            .fold(CostEstimate::zero(), |acc, op| acc.add(&self.estimate_operation_cost(op)))
    }
}

impl Default for CostModel {
    fn default() -> Self {
        Self::new()
    }
}
