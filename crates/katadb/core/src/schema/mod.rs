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

//! Schema Layer
//!
//! Per-collection field declarations. Every write is validated here before it
//! is staged, and the declared `indexed` / `text_indexed` flags drive which
//! indexes the Index Manager maintains.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FieldViolation, KataError, KataResult};
use crate::record::{FieldType, Fields, Value};

/// Declaration of a single field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Maintain an ordered secondary index on this field
    #[serde(default)]
    pub indexed: bool,
    /// Maintain an inverted full-text index on this field
    #[serde(default)]
    pub text_indexed: bool,
    /// Reject writes that omit this field
    #[serde(default)]
    pub required: bool,
}

impl FieldSpec {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            indexed: false,
            text_indexed: false,
            required: false,
        }
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn text_indexed(mut self) -> Self {
        self.text_indexed = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Fields whose indexing was switched on by a schema change
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaChange {
    pub added_fields: Vec<String>,
    pub newly_indexed: Vec<String>,
    pub newly_text_indexed: Vec<String>,
}

impl SchemaChange {
    pub fn needs_backfill(&self) -> bool {
        !self.newly_indexed.is_empty() || !self.newly_text_indexed.is_empty()
    }
}

/// Field declarations of one collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSchema {
    name: String,
    fields: BTreeMap<String, FieldSpec>,
}

impl CollectionSchema {
    /// Create a schema, rejecting malformed declarations
    pub fn new(name: impl Into<String>, specs: impl IntoIterator<Item = (String, FieldSpec)>) -> KataResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(KataError::InvalidSchema("collection name must not be empty".to_string()));
        }

        let mut fields = BTreeMap::new();
        for (field, spec) in specs {
            check_spec(&field, &spec)?;
            fields.insert(field, spec);
        }

        Ok(Self { name, fields })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &FieldSpec)> {
        self.fields.iter()
    }

    pub fn indexed_fields(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().filter(|(_, spec)| spec.indexed).map(|(name, _)| name.as_str())
    }

    pub fn text_fields(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().filter(|(_, spec)| spec.text_indexed).map(|(name, _)| name.as_str())
    }

    /// Extend this schema with new declarations.
    ///
    /// New fields are added, `indexed`/`text_indexed`/`required` flags of
    /// existing fields may be switched on, and a declared type never changes.
    pub fn merge(&self, specs: impl IntoIterator<Item = (String, FieldSpec)>) -> KataResult<(CollectionSchema, SchemaChange)> {
        let mut merged = self.clone();
        let mut change = SchemaChange::default();

        for (field, spec) in specs {
            check_spec(&field, &spec)?;
            match merged.fields.get_mut(&field) {
                Some(existing) => {
                    if existing.field_type != spec.field_type {
                        return Err(KataError::InvalidSchema(format!(
                            "field {field} of {} is declared as {}, cannot redeclare as {}",
                            self.name, existing.field_type, spec.field_type
                        )));
                    }
                    if spec.indexed && !existing.indexed {
                        existing.indexed = true;
                        change.newly_indexed.push(field.clone());
                    }
                    if spec.text_indexed && !existing.text_indexed {
                        existing.text_indexed = true;
                        change.newly_text_indexed.push(field.clone());
                    }
                    existing.required |= spec.required;
                }
                None => {
                    if spec.indexed {
                        change.newly_indexed.push(field.clone());
                    }
                    if spec.text_indexed {
                        change.newly_text_indexed.push(field.clone());
                    }
                    change.added_fields.push(field.clone());
                    merged.fields.insert(field, spec);
                }
            }
        }

        Ok((merged, change))
    }

    /// Validate a record, reporting every offending field
    pub fn validate(&self, fields: &Fields, strict_fields: bool) -> KataResult<()> {
        let mut violations = Vec::new();

        for (name, spec) in &self.fields {
            match fields.get(name) {
                Some(value) if value.field_type() != spec.field_type => violations.push(FieldViolation::TypeMismatch {
                    field: name.clone(),
                    expected: spec.field_type,
                    found: value.field_type(),
                }),
                Some(_) => {}
                None if spec.required => violations.push(FieldViolation::MissingRequired { field: name.clone() }),
                None => {}
            }
        }

        if strict_fields {
            for name in fields.keys().filter(|name| !self.fields.contains_key(*name)) {
                violations.push(FieldViolation::UndeclaredField { field: name.clone() });
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            violations.sort_by(|a, b| a.field().cmp(b.field()));
            Err(KataError::SchemaViolation {
                collection: self.name.clone(),
                violations,
            })
        }
    }

    /// Convert a JSON object into typed fields, guided by the declared types.
    ///
    /// Nulls are treated as absent. Undeclared fields get an inferred type and
    /// are left for `validate` to accept or reject.
    pub fn fields_from_json(&self, json: &serde_json::Value) -> KataResult<Fields> {
        let object = json
            .as_object()
            .ok_or_else(|| KataError::InvalidSchema(format!("records of {} must be JSON objects", self.name)))?;

        let mut fields = Fields::new();
        let mut violations = Vec::new();

        for (name, raw) in object {
            if raw.is_null() {
                continue;
            }
            let declared = self.fields.get(name).map(|spec| spec.field_type);
            match coerce_json(raw, declared) {
                Some(value) => {
                    fields.insert(name.clone(), value);
                }
                None => match (declared, infer_json(raw)) {
                    (Some(expected), Some(found)) => violations.push(FieldViolation::TypeMismatch {
                        field: name.clone(),
                        expected,
                        found: found.field_type(),
                    }),
                    _ => violations.push(FieldViolation::Unrepresentable { field: name.clone() }),
                },
            }
        }

        if violations.is_empty() {
            Ok(fields)
        } else {
            Err(KataError::SchemaViolation {
                collection: self.name.clone(),
                violations,
            })
        }
    }
}

fn check_spec(field: &str, spec: &FieldSpec) -> KataResult<()> {
    if field.is_empty() {
        return Err(KataError::InvalidSchema("field name must not be empty".to_string()));
    }
    if spec.text_indexed && !spec.field_type.is_textual() {
        return Err(KataError::InvalidSchema(format!("field {field} is {} and cannot be text indexed", spec.field_type)));
    }
    Ok(())
}

fn coerce_json(raw: &serde_json::Value, declared: Option<FieldType>) -> Option<Value> {
    let Some(field_type) = declared else {
        return infer_json(raw);
    };

    match field_type {
        FieldType::Integer => raw.as_i64().map(Value::Integer),
        FieldType::Float => raw.as_f64().map(Value::Float),
        FieldType::Boolean => raw.as_bool().map(Value::Boolean),
        FieldType::String => raw.as_str().map(|s| Value::String(s.to_string())),
        FieldType::Text => raw.as_str().map(|s| Value::Text(s.to_string())),
        FieldType::Timestamp => raw
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|ts| Value::Timestamp(ts.with_timezone(&Utc))),
    }
}

fn infer_json(raw: &serde_json::Value) -> Option<Value> {
    match raw {
        serde_json::Value::Bool(b) => Some(Value::Boolean(*b)),
        serde_json::Value::Number(n) => n.as_i64().map(Value::Integer).or_else(|| n.as_f64().map(Value::Float)),
        serde_json::Value::String(s) => Some(Value::String(s.clone())),
        _ => None,
    }
}
