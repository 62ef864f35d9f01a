//! Point-in-time snapshots of an entity
//!
//! Snapshots are rebuilt on every read unless the cache holds one for the
//! same key. They are never persisted.

use crate::temporal::Span;
use crate::types::{EntityId, TypeName};
use crate::value::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reconstructed view of one entity at one (valid, database) instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectSnapshot {
    /// Entity the snapshot describes
    pub entity: EntityId,
    /// Registered type of the entity
    pub type_name: TypeName,
    /// Attribute values active at the requested instants
    pub attributes: BTreeMap<String, Value>,
    /// Resolved relations, keyed by attribute name
    pub related: BTreeMap<String, ObjectSnapshot>,
    /// Intersection of every contributing fact's valid span
    pub valid: Span,
    /// Intersection of every contributing fact's database span
    pub database: Span,
    /// Recorded existence of the entity
    pub existence: Option<Span>,
    /// Valid instant the snapshot was taken at
    pub valid_at: DateTime<Utc>,
    /// Database instant the snapshot was taken at
    pub database_at: DateTime<Utc>,
}

impl ObjectSnapshot {
    /// Value of an attribute, if present
    pub fn get(&self, attribute: &str) -> Option<&Value> {
        self.attributes.get(attribute)
    }

    /// Resolved related snapshot, if present
    pub fn related(&self, attribute: &str) -> Option<&ObjectSnapshot> {
        self.related.get(attribute)
    }

    /// Key this snapshot is cached under
    pub fn key(&self) -> SnapshotKey {
        SnapshotKey::new(self.type_name.clone(), self.entity, self.valid_at, self.database_at)
    }
}

/// Composite cache key for a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotKey {
    /// Registered type the snapshot was read as
    pub type_name: TypeName,
    /// Entity
    pub entity: EntityId,
    /// Valid instant
    pub valid_at: DateTime<Utc>,
    /// Database instant
    pub database_at: DateTime<Utc>,
}

impl SnapshotKey {
    /// Create a key
    pub fn new(
        type_name: TypeName,
        entity: EntityId,
        valid_at: DateTime<Utc>,
        database_at: DateTime<Utc>,
    ) -> Self {
        Self {
            type_name,
            entity,
            valid_at,
            database_at,
        }
    }
}
