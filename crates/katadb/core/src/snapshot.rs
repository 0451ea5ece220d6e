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

//! Snapshot images
//!
//! A self-contained binary image of every collection's schema and the records
//! visible to one snapshot. Layout:
//!
//! ```text
//! magic "KATA" (4) | format version u16 LE | CRC32 of payload u32 LE | payload length u64 LE | payload
//! ```
//!
//! The payload is the bincode (serde) encoding of `SnapshotImage`. Field type
//! tags are part of the encoding, so integers, floats, strings, text and
//! timestamps round-trip without loss.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{KataError, KataResult};
use crate::record::{Fields, PrimaryKey};
use crate::schema::FieldSpec;
use crate::storage_engine::mvcc::Timestamp;

const SNAPSHOT_MAGIC: [u8; 4] = *b"KATA";
const SNAPSHOT_VERSION: u16 = 1;
const HEADER_SIZE: usize = 18;

/// Schema and records of one collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionImage {
    pub name: String,
    pub fields: Vec<(String, FieldSpec)>,
    /// Records in primary key order
    pub records: Vec<(PrimaryKey, Fields)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotImage {
    /// Snapshot timestamp the records were read at
    pub snapshot_ts: Timestamp,
    /// Wall-clock time of the export
    pub created_at: DateTime<Utc>,
    pub collections: Vec<CollectionImage>,
}

impl SnapshotImage {
    pub fn record_count(&self) -> usize {
        self.collections.iter().map(|c| c.records.len()).sum()
    }

    /// Encode with header and checksum
    pub fn encode(&self) -> KataResult<Vec<u8>> {
        let payload = bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| KataError::Snapshot(format!("encode failed: {e}")))?;

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&payload);
        let checksum = hasher.finalize();

        let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
        bytes.extend_from_slice(&SNAPSHOT_MAGIC);
        bytes.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&checksum.to_le_bytes());
        bytes.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&payload);
        Ok(bytes)
    }

    /// Decode and verify an image produced by `encode`
    pub fn decode(bytes: &[u8]) -> KataResult<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(KataError::Snapshot(format!("image too short: {} bytes", bytes.len())));
        }
        if bytes[0..4] != SNAPSHOT_MAGIC {
            return Err(KataError::Snapshot("not a snapshot image".to_string()));
        }

        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != SNAPSHOT_VERSION {
            return Err(KataError::Snapshot(format!("unsupported snapshot version {version}")));
        }

        let checksum = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]);
        let length = u64::from_le_bytes(
            bytes[10..18]
                .try_into()
                .map_err(|_| KataError::Snapshot("invalid length bytes".to_string()))?,
        );
        let payload = &bytes[HEADER_SIZE..];
        if payload.len() as u64 != length {
            return Err(KataError::Snapshot(format!("payload is {} bytes, header says {length}", payload.len())));
        }

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(payload);
        if hasher.finalize() != checksum {
            return Err(KataError::Snapshot("checksum mismatch".to_string()));
        }

        bincode::serde::decode_from_slice(payload, bincode::config::standard())
            .map(|(image, _)| image)
            .map_err(|e| KataError::Snapshot(format!("decode failed: {e}")))
    }
}
