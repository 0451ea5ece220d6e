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

//! Store configuration
//!
//! Policies that the storage engine and query engine consult at runtime.
//! Loaded from TOML, from the path in `KATADB_CONFIG`, or left at defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Environment variable naming a TOML configuration file
pub const CONFIG_ENV_VAR: &str = "KATADB_CONFIG";

/// Unit at which two concurrent writes to the same key are considered conflicting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictGranularity {
    /// Any committed write to the key after the transaction started conflicts
    #[default]
    Record,
    /// Only committed writes that changed a field this transaction also changed conflict
    Field,
}

/// What the query engine does when no index can serve a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanFallback {
    /// Silently fall back to a full snapshot scan
    #[default]
    Allow,
    /// Fail with `InvalidQuery`
    Reject,
}

/// Configuration for a `Database`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Conflict detection granularity used at commit
    pub conflict_granularity: ConflictGranularity,
    /// Full-scan policy for queries without a usable index
    pub scan_fallback: ScanFallback,
    /// Reject records carrying fields the schema does not declare
    pub strict_fields: bool,
    /// Superseded version count (retained versions minus live keys) that triggers
    /// an inline GC sweep after commit (0 disables)
    pub auto_gc_threshold: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            conflict_granularity: ConflictGranularity::Record,
            scan_fallback: ScanFallback::Allow,
            strict_fields: true,
            auto_gc_threshold: 1024,
        }
    }
}

/// Errors raised while loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

impl StoreConfig {
    /// Parse a configuration from TOML text. Missing keys keep their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load a configuration file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&content)
    }

    /// Resolve the effective configuration: explicit path, then `KATADB_CONFIG`, then defaults
    pub fn resolve(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load_from_file(path);
        }

        match std::env::var(CONFIG_ENV_VAR) {
            Ok(path) if !path.is_empty() => Self::load_from_file(path),
            _ => Ok(Self::default()),
        }
    }

    /// Render the configuration as TOML
    pub fn to_toml_string(&self) -> String {
        // Plain enums and scalars always serialize.
        toml::to_string_pretty(self).unwrap_or_default()
    }
}
