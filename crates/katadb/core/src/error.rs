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

//! Error types shared by every layer of the store.

use std::fmt;

use crate::config::ConfigError;
use crate::record::FieldType;
use crate::storage_engine::transaction::{TransactionId, TransactionState};
use crate::storage_engine::mvcc::Timestamp;

/// A single reason a record was rejected by its collection schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldViolation {
    /// The value's runtime type differs from the declared type
    TypeMismatch { field: String, expected: FieldType, found: FieldType },
    /// A field declared as required is absent
    MissingRequired { field: String },
    /// The record carries a field the schema does not declare
    UndeclaredField { field: String },
    /// An external value has no typed representation (JSON arrays, objects)
    Unrepresentable { field: String },
}

impl FieldViolation {
    /// Name of the offending field
    pub fn field(&self) -> &str {
        match self {
            FieldViolation::TypeMismatch { field, .. }
            | FieldViolation::MissingRequired { field }
            | FieldViolation::UndeclaredField { field }
            | FieldViolation::Unrepresentable { field } => field,
        }
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldViolation::TypeMismatch { field, expected, found } => write!(f, "{field}: expected {expected}, found {found}"),
            FieldViolation::MissingRequired { field } => write!(f, "{field}: required field is missing"),
            FieldViolation::UndeclaredField { field } => write!(f, "{field}: field is not declared"),
            FieldViolation::Unrepresentable { field } => write!(f, "{field}: value has no typed representation"),
        }
    }
}

fn join_violations(violations: &[FieldViolation]) -> String {
    violations.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

/// Errors returned by the store
#[derive(Debug, thiserror::Error)]
pub enum KataError {
    #[error("Schema violation in collection {collection}: {}", join_violations(.violations))]
    SchemaViolation { collection: String, violations: Vec<FieldViolation> },

    #[error("Write-write conflict on {collection}/{key}: committed at {committed_ts}, transaction started at {start_ts}")]
    Conflict {
        collection: String,
        key: String,
        start_ts: Timestamp,
        committed_ts: Timestamp,
    },

    #[error("Transaction {txn} is {state:?}")]
    InvalidState { txn: TransactionId, state: TransactionState },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Record not found: {collection}/{key}")]
    NotFound { collection: String, key: String },

    #[error("Collection not found: {0}")]
    UnknownCollection(String),

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Store halted after internal failure: {0}")]
    Halted(String),

    #[error("Internal invariant violated: {0}")]
    Internal(String),

    #[error("Snapshot image error: {0}")]
    Snapshot(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl KataError {
    /// Whether the caller may retry the whole transaction from `begin`
    pub fn is_retryable(&self) -> bool {
        matches!(self, KataError::Conflict { .. })
    }
}

/// Result type for store operations
pub type KataResult<T> = Result<T, KataError>;
