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

//! Record & Version Model
//!
//! A record is a mapping from field name to a typed `Value`, identified by a
//! primary key that is unique within its collection. Records are never
//! mutated in place: each commit produces a new immutable `Version`.

pub mod value;
pub mod version;

pub use value::{FieldType, Fields, Value, fields_to_json};
pub use version::{ChainIter, Version, VersionArena, VersionId};

use serde::{Deserialize, Serialize};

use crate::storage_engine::mvcc::Timestamp;

/// Primary key of a record within a collection
pub type PrimaryKey = String;

/// A record as seen by one transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Primary key
    pub key: PrimaryKey,
    /// Field values
    pub fields: Fields,
    /// Commit timestamp of the version read; `None` for the reader's own staged write
    pub committed_at: Option<Timestamp>,
    /// Per-key ordinal of the committed version read, assigned at install; 0 for a staged write
    pub version: usize,
}

impl Record {
    /// Look up a field value
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Whether this record reflects an uncommitted write of the reader
    pub fn is_staged(&self) -> bool {
        self.committed_at.is_none()
    }

    /// Render as a plain JSON object including the key
    pub fn to_json(&self) -> serde_json::Value {
        let mut json = fields_to_json(&self.fields);
        if let serde_json::Value::Object(map) = &mut json {
            map.insert("_key".to_string(), serde_json::Value::String(self.key.clone()));
        }
        json
    }
}
