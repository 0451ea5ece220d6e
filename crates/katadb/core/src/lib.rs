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

//! KataDB Core
//!
//! An in-memory multi-version document store. Transactions read a stable
//! snapshot, stage writes privately and commit through optimistic conflict
//! detection. Collections carry typed schemas with ordered and full-text
//! secondary indexes that stay consistent with every snapshot.

pub mod config;
pub mod db;
pub mod error;
pub mod indices;
pub mod query;
pub mod record;
pub mod schema;
pub mod snapshot;
pub mod storage_engine;

// Re-export the surface most callers need
pub use config::{ConflictGranularity, ScanFallback, StoreConfig};
pub use db::{CollectionStatistics, Database, DatabaseStatistics};
pub use error::{FieldViolation, KataError, KataResult};
pub use query::{PredicateOperator, Query, QueryHit, QueryPlan, QueryPredicate, SortOrder};
pub use record::{FieldType, Fields, PrimaryKey, Record, Value};
pub use schema::{CollectionSchema, FieldSpec, SchemaChange};
pub use storage_engine::{GcStats, Timestamp, Transaction, TransactionState, VersionInfo};
