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

//! # Query Processing Module
//!
//! - `predicate`: the structured query form
//! - `planner`: validation, index selection and cost estimates
//! - `executor`: candidate generation and snapshot validation
//!
//! Pipeline: validate against the schema, choose an access path, collect
//! candidates, re-read each under the caller's snapshot, then sort and page.

pub mod executor;
pub mod planner;
pub mod predicate;

pub use executor::{ExecutionStats, QueryExecutor, QueryHit};
pub use planner::{AccessPath, CostEstimate, CostModel, IndexSelector, QueryPlan, QueryPlanner};
pub use predicate::{PredicateOperator, Query, QueryPredicate, SortOrder, SortSpec};
