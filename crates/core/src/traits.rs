//! Core traits for object mapping and snapshot caching
//!
//! These traits are the seams between the engine and the two collaborators
//! it does not own: caller-defined object types and the snapshot cache.

use crate::error::{CacheError, ConstructError};
use crate::schema::{NamedArguments, TypeSchema};
use crate::snapshot::{ObjectSnapshot, SnapshotKey};
use crate::temporal::Temporal;
use crate::types::EntityId;
use crate::value::Value;

/// A caller-defined type that the engine can write as facts and rebuild
/// from a snapshot
///
/// Implementations declare their attribute layout once through
/// [`TemporalObject::schema`]; the registry checks it at startup.
///
/// # Examples
///
/// ```
/// use tempora_core::{
///     ConstructError, EntityId, NamedArguments, Temporal, TemporalObject, TemporalScope,
///     TypeSchema, Value, ValueType,
/// };
///
/// struct City {
///     id: EntityId,
///     valid: Temporal,
///     name: String,
/// }
///
/// impl TemporalObject for City {
///     fn schema() -> TypeSchema {
///         TypeSchema::builder("city")
///             .required("name", ValueType::String)
///             .build()
///     }
///
///     fn entity_id(&self) -> EntityId {
///         self.id
///     }
///
///     fn valid_temporal(&self) -> Temporal {
///         self.valid
///     }
///
///     fn facts(&self) -> Vec<(String, Value)> {
///         vec![("name".to_string(), Value::from(self.name.as_str()))]
///     }
///
///     fn construct(args: &NamedArguments<'_>) -> Result<Self, ConstructError> {
///         Ok(City {
///             id: args.entity_id(),
///             valid: Temporal::from_span(TemporalScope::Valid, &args.valid()),
///             name: args.string("name")?,
///         })
///     }
/// }
/// ```
pub trait TemporalObject: Sized + Send + Sync {
    /// Attribute layout of the type
    fn schema() -> TypeSchema;

    /// Stable identifier of this object's entity
    fn entity_id(&self) -> EntityId;

    /// Valid-time the object's facts describe
    ///
    /// For a new entity this also becomes its existence.
    fn valid_temporal(&self) -> Temporal;

    /// Attribute values to record as facts
    fn facts(&self) -> Vec<(String, Value)>;

    /// Rebuild the object from a snapshot's attributes
    fn construct(args: &NamedArguments<'_>) -> Result<Self, ConstructError>;
}

/// Snapshot cache collaborator
///
/// Thread safety: all methods may be called concurrently. Invalidation may
/// race with population; a repopulated stale entry is acceptable only until
/// the next invalidation for the same entity.
pub trait SnapshotCache: Send + Sync {
    /// Cached snapshot for `key`, if any
    fn get(&self, key: &SnapshotKey) -> Option<ObjectSnapshot>;

    /// Store a snapshot
    ///
    /// # Errors
    ///
    /// Returns an error if the cache refuses the entry. Callers treat this
    /// as non-fatal.
    fn put(&self, key: SnapshotKey, snapshot: ObjectSnapshot) -> Result<(), CacheError>;

    /// Drop every cached snapshot of `entity`
    fn invalidate(&self, entity: EntityId);
}
