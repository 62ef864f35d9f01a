//! Engine error types
//!
//! `ReadError` and `WriteError` are what the orchestrators return. Both wrap
//! the lower-layer errors they can encounter; callers branch on
//! [`WriteError::is_conflict`] to decide whether a retry may help.

use chrono::{DateTime, Utc};
use tempora_core::{
    ConstructError, EntityId, MergeError, RegistryError, StoreError, TemporalError, TypeName,
    ValueType,
};
use thiserror::Error;

/// Errors from reading an object or snapshot
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReadError {
    /// The entity does not exist at all
    #[error("entity {0} not found")]
    MissingEntity(EntityId),

    /// No consistent state exists at the requested instants
    #[error("no valid state for {entity} at valid {valid_at}, database {database_at}")]
    NoValidState {
        /// Entity read
        entity: EntityId,
        /// Requested valid instant
        valid_at: DateTime<Utc>,
        /// Requested database instant
        database_at: DateTime<Utc>,
    },

    /// The entity exists under a different type
    #[error("entity {entity} is a {actual}, not a {expected}")]
    TypeMismatch {
        /// Entity read
        entity: EntityId,
        /// Type the caller asked for
        expected: TypeName,
        /// Type the entity was created as
        actual: TypeName,
    },

    /// The type was never registered
    #[error("type '{0}' is not registered")]
    UnregisteredType(TypeName),

    /// The type's constructor rejected the snapshot
    #[error(transparent)]
    Construct(#[from] ConstructError),

    /// Store failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Temporal normalization failed
    #[error(transparent)]
    Temporal(#[from] TemporalError),
}

/// Errors from writing an object or fact
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WriteError {
    /// The entity does not exist
    #[error("entity {0} not found")]
    MissingEntity(EntityId),

    /// The merge engine refused the write
    #[error(transparent)]
    Merge(#[from] MergeError),

    /// Store failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Temporal normalization failed
    #[error(transparent)]
    Temporal(#[from] TemporalError),

    /// The type was never registered
    #[error("type '{0}' is not registered")]
    UnregisteredType(TypeName),

    /// The attribute is not declared by the type
    #[error("type '{type_name}' has no attribute '{attribute}'")]
    UnknownAttribute {
        /// Type written
        type_name: TypeName,
        /// Undeclared attribute
        attribute: String,
    },

    /// The value does not match the attribute's declared type
    #[error("{type_name}.{attribute}: expected {expected}, got {actual}")]
    AttributeTypeMismatch {
        /// Type written
        type_name: TypeName,
        /// Attribute written
        attribute: String,
        /// Declared type
        expected: ValueType,
        /// Supplied type
        actual: ValueType,
    },

    /// The entity exists under a different type
    #[error("entity {entity} is a {actual}, not a {expected}")]
    TypeMismatch {
        /// Entity written
        entity: EntityId,
        /// Type the caller wrote as
        expected: TypeName,
        /// Type the entity was created as
        actual: TypeName,
    },

    /// The write pool queue is full
    #[error("write pool queue is full")]
    Backpressure,

    /// The write pool has been shut down
    #[error("write pool is shut down")]
    PoolShutdown,

    /// A pooled write panicked before reporting a result
    #[error("pooled write panicked")]
    Panicked,
}

impl WriteError {
    /// Whether a concurrent commit caused the failure
    pub fn is_conflict(&self) -> bool {
        matches!(self, WriteError::Store(e) if e.is_conflict())
    }

    /// Whether retrying the same write may succeed
    ///
    /// Conflicts clear once the competing commit is visible; a full queue
    /// drains. Merge and existence failures are deterministic.
    pub fn is_retryable(&self) -> bool {
        self.is_conflict() || matches!(self, WriteError::Backpressure)
    }
}

/// Errors from loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read or written
    #[error("config file '{path}': {source}")]
    Io {
        /// Offending path
        path: String,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Config document is not valid TOML for this schema
    #[error("failed to parse config: {0}")]
    Parse(String),

    /// A value is out of range
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Errors from building an [`ObjectStore`](crate::ObjectStore)
#[derive(Debug, Error)]
pub enum BuildError {
    /// No store was supplied
    #[error("no fact store configured")]
    MissingStore,

    /// Configuration was rejected
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Type registration was rejected
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Worker threads could not be spawned
    #[error("failed to start write pool: {0}")]
    Pool(#[from] std::io::Error),
}
