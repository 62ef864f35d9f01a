//! Error types for Tempora
//!
//! Each layer has its own error enum so callers can match on exactly the
//! failures a given operation can produce. We use `thiserror` for automatic
//! `Display` and `Error` trait implementations.

use crate::temporal::{Span, TemporalScope};
use crate::types::{EntityId, FactId, TypeName};
use crate::value::{Value, ValueType};
use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

// ============================================================================
// Temporal
// ============================================================================

/// Errors from constructing or normalizing temporals
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemporalError {
    /// Database-scope temporals are always intervals
    #[error("database temporal cannot be a point")]
    DatabasePoint,

    /// Interval end precedes (or equals) its start
    #[error("interval end {to} is not after start {from}")]
    InvertedInterval {
        /// Normalized start
        from: DateTime<Utc>,
        /// Normalized end
        to: DateTime<Utc>,
    },

    /// A temporal of one scope was used where another was required
    #[error("expected {expected} temporal, got {actual}")]
    WrongScope {
        /// Scope the operation requires
        expected: TemporalScope,
        /// Scope that was supplied
        actual: TemporalScope,
    },

    /// Time value cannot be represented after normalization
    #[error("time value out of range: {0}")]
    OutOfRange(String),

    /// Zone string could not be parsed
    #[error("invalid zone: {0}")]
    InvalidZone(String),
}

// ============================================================================
// Store
// ============================================================================

/// Errors surfaced by a fact store
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A concurrent transaction committed a change to an entity this
    /// transaction read
    #[error("write conflict on entity {entity}")]
    Conflict {
        /// Entity whose version moved underneath the transaction
        entity: EntityId,
    },

    /// A nested scope aborted, so the enclosing transaction can only roll back
    #[error("transaction {0} is marked rollback-only")]
    RollbackOnly(u64),

    /// Write attempted through a read-only transaction
    #[error("transaction {0} is read-only")]
    ReadOnlyTransaction(u64),

    /// Transaction already finished or unknown to this store
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    /// Entity creation attempted for an id that is already taken
    #[error("entity {0} already exists")]
    EntityExists(EntityId),

    /// Entity does not exist
    #[error("entity {0} not found")]
    MissingEntity(EntityId),

    /// A merge script referenced a fact the store does not hold
    #[error("unknown {fact} on entity {entity}")]
    UnknownFact {
        /// Owning entity
        entity: EntityId,
        /// Fact that was not found
        fact: FactId,
    },

    /// Any other backend failure
    #[error("store error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Whether retrying the whole transaction may succeed
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

// ============================================================================
// Merge
// ============================================================================

/// Why a merge could not reconcile proposed facts with existing ones
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// Existing fact disagrees and the strategy forbids overriding it
    Divergent,
    /// Several existing facts overlap the proposal and disagree with each other
    Ambiguous,
    /// Two proposals for the same attribute overlap with different starts
    OverlappingProposals,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictKind::Divergent => f.write_str("divergent value"),
            ConflictKind::Ambiguous => f.write_str("ambiguous existing facts"),
            ConflictKind::OverlappingProposals => f.write_str("overlapping proposals"),
        }
    }
}

/// Errors produced while computing a merge script
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MergeError {
    /// Proposed and existing facts cannot be reconciled
    #[error("merge conflict ({kind}) on {entity}.{attribute}: existing {existing:?}, proposed {proposed:?}")]
    MergeConflict {
        /// Entity being written
        entity: EntityId,
        /// Attribute in conflict
        attribute: String,
        /// Kind of conflict
        kind: ConflictKind,
        /// Existing value involved, when there is one
        existing: Option<Value>,
        /// Proposed value
        proposed: Value,
    },

    /// A proposed fact starts outside the entity's existence
    #[error("fact {entity}.{attribute} valid {fact} lies outside existence {existence}")]
    ExistenceViolation {
        /// Entity being written
        entity: EntityId,
        /// Attribute of the offending fact
        attribute: String,
        /// Valid span of the offending fact
        fact: Span,
        /// Recorded existence of the entity
        existence: Span,
    },

    /// Write would close a version at or before the time it was recorded
    #[error("database time {database_at} does not follow version recorded at {recorded_at} on {entity}")]
    DatabaseTimeRegression {
        /// Entity being written
        entity: EntityId,
        /// Database time of the write
        database_at: DateTime<Utc>,
        /// Database start of the version that would be closed
        recorded_at: DateTime<Utc>,
    },

    /// Temporal normalization failed
    #[error(transparent)]
    Temporal(#[from] TemporalError),
}

// ============================================================================
// Construction and registry
// ============================================================================

/// Errors from building a typed object out of named arguments
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstructError {
    /// A required attribute had no value
    #[error("{type_name}: missing attribute '{attribute}'")]
    MissingAttribute {
        /// Type being constructed
        type_name: TypeName,
        /// Attribute that was absent
        attribute: String,
    },

    /// An attribute had a value of the wrong type
    #[error("{type_name}.{attribute}: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Type being constructed
        type_name: TypeName,
        /// Attribute with the wrong value
        attribute: String,
        /// Declared attribute type
        expected: ValueType,
        /// Type of the supplied value
        actual: ValueType,
    },

    /// Object-specific validation failed
    #[error("{type_name}: {reason}")]
    Invalid {
        /// Type being constructed
        type_name: TypeName,
        /// Validation message
        reason: String,
    },
}

/// Errors from the snapshot cache
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// Cache is full and cannot accept the entry
    #[error("cache capacity of {0} entries exceeded")]
    CapacityExceeded(usize),
}

/// Errors from registering types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Type name registered twice
    #[error("type '{0}' is already registered")]
    DuplicateType(TypeName),

    /// Attribute declared twice within one schema
    #[error("type '{type_name}' declares attribute '{attribute}' twice")]
    DuplicateAttribute {
        /// Offending type
        type_name: TypeName,
        /// Repeated attribute
        attribute: String,
    },

    /// Schema with no attributes
    #[error("type '{0}' declares no attributes")]
    EmptySchema(TypeName),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_error_display_database_point() {
        assert_eq!(
            TemporalError::DatabasePoint.to_string(),
            "database temporal cannot be a point"
        );
    }

    #[test]
    fn test_error_display_wrong_scope() {
        let err = TemporalError::WrongScope {
            expected: TemporalScope::Exists,
            actual: TemporalScope::Valid,
        };
        assert_eq!(err.to_string(), "expected exists temporal, got valid");
    }

    #[test]
    fn test_store_error_is_conflict() {
        let entity = EntityId::new();
        assert!(StoreError::Conflict { entity }.is_conflict());
        assert!(!StoreError::MissingEntity(entity).is_conflict());
        assert!(!StoreError::RollbackOnly(1).is_conflict());
    }

    #[test]
    fn test_error_display_unknown_fact() {
        let entity = EntityId::from_bytes([0u8; 16]);
        let err = StoreError::UnknownFact {
            entity,
            fact: FactId::new(3),
        };
        assert_eq!(
            err.to_string(),
            "unknown fact#3 on entity 00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn test_error_display_merge_conflict() {
        let err = MergeError::MergeConflict {
            entity: EntityId::from_bytes([0u8; 16]),
            attribute: "name".to_string(),
            kind: ConflictKind::Divergent,
            existing: Some(Value::from("A")),
            proposed: Value::from("B"),
        };
        let msg = err.to_string();
        assert!(msg.contains("divergent value"));
        assert!(msg.contains(".name"));
    }

    #[test]
    fn test_error_display_regression() {
        let at = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        let err = MergeError::DatabaseTimeRegression {
            entity: EntityId::from_bytes([0u8; 16]),
            database_at: at,
            recorded_at: at,
        };
        assert!(err.to_string().contains("does not follow version recorded at"));
    }

    #[test]
    fn test_merge_error_from_temporal() {
        let err: MergeError = TemporalError::DatabasePoint.into();
        assert!(matches!(err, MergeError::Temporal(TemporalError::DatabasePoint)));
        assert_eq!(err.to_string(), "database temporal cannot be a point");
    }

    #[test]
    fn test_error_display_construct() {
        let err = ConstructError::TypeMismatch {
            type_name: TypeName::new("province"),
            attribute: "name".to_string(),
            expected: ValueType::String,
            actual: ValueType::Int,
        };
        assert_eq!(err.to_string(), "province.name: expected String, got Int");
    }

    #[test]
    fn test_error_display_cache_capacity() {
        assert_eq!(
            CacheError::CapacityExceeded(8).to_string(),
            "cache capacity of 8 entries exceeded"
        );
    }
}
