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

//! Versions and the arena that owns them
//!
//! Every committed state of a record is an immutable `Version`. Versions of the
//! same key form a singly linked chain, newest first, through `prev` ids.
//! Ids are generational slot indices, so dropping a version invalidates every
//! stale id that still refers to it instead of leaving a dangling reference.

use std::sync::Arc;

use super::Fields;
use crate::storage_engine::mvcc::Timestamp;

/// Handle to a version slot in a `VersionArena`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VersionId {
    slot: u32,
    generation: u32,
}

impl std::fmt::Display for VersionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}v{}", self.slot, self.generation)
    }
}

/// Immutable snapshot of a record's fields
#[derive(Debug, Clone)]
pub struct Version {
    /// Field values, shared with any reader holding this version
    pub fields: Arc<Fields>,
    /// Commit timestamp of the transaction that produced this version
    pub created_ts: Timestamp,
    /// Position of this version in its key's history, starting at 1
    pub ordinal: usize,
    /// Commit timestamp that superseded or tombstoned this version; `None` while open
    pub deleted_ts: Option<Timestamp>,
    /// Next older version of the same key
    pub prev: Option<VersionId>,
}

impl Version {
    pub fn new(fields: Arc<Fields>, created_ts: Timestamp, ordinal: usize, prev: Option<VersionId>) -> Self {
        Self {
            fields,
            created_ts,
            ordinal,
            deleted_ts: None,
            prev,
        }
    }

    /// Whether a snapshot taken at `snapshot_ts` observes this version
    pub fn is_visible_at(&self, snapshot_ts: Timestamp) -> bool {
        self.created_ts <= snapshot_ts && self.deleted_ts.is_none_or(|deleted| deleted > snapshot_ts)
    }

    pub fn is_open(&self) -> bool {
        self.deleted_ts.is_none()
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    version: Option<Version>,
}

/// Slot arena holding every retained version of one collection
#[derive(Debug, Default)]
pub struct VersionArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl VersionArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a version and return its id
    pub fn insert(&mut self, version: Version) -> VersionId {
        self.live += 1;
        if let Some(slot) = self.free.pop() {
            let entry = &mut self.slots[slot as usize];
            entry.version = Some(version);
            return VersionId { slot, generation: entry.generation };
        }

        let slot = self.slots.len() as u32;
        self.slots.push(Slot { generation: 0, version: Some(version) });
        VersionId { slot, generation: 0 }
    }

    pub fn get(&self, id: VersionId) -> Option<&Version> {
        self.slots.get(id.slot as usize).filter(|s| s.generation == id.generation).and_then(|s| s.version.as_ref())
    }

    pub fn get_mut(&mut self, id: VersionId) -> Option<&mut Version> {
        self.slots.get_mut(id.slot as usize).filter(|s| s.generation == id.generation).and_then(|s| s.version.as_mut())
    }

    /// Drop a version. The slot's generation is bumped so `id` no longer resolves.
    pub fn remove(&mut self, id: VersionId) -> Option<Version> {
        let entry = self.slots.get_mut(id.slot as usize)?;
        if entry.generation != id.generation {
            return None;
        }
        let version = entry.version.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(id.slot);
        self.live -= 1;
        Some(version)
    }

    /// Number of retained versions
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Iterate a chain from `head` towards older versions
    pub fn chain(&self, head: VersionId) -> ChainIter<'_> {
        ChainIter { arena: self, next: Some(head) }
    }
}

/// Iterator over a version chain, newest first
pub struct ChainIter<'a> {
    arena: &'a VersionArena,
    next: Option<VersionId>,
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = (VersionId, &'a Version);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        let version = self.arena.get(id)?;
        self.next = version.prev;
        Some((id, version))
    }
}
