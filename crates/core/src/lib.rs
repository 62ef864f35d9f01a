//! Core types and traits for Tempora
//!
//! This crate defines the foundational types used throughout the system:
//! - EntityId, TypeName, FactId, EntityRef: identity types
//! - Temporal, Span: the temporal model and its canonical UTC form
//! - Value, ValueType: typed attribute values
//! - Fact, FactRow: bitemporal attribute values
//! - MergeScript: precomputed write plans and merge policy
//! - ObjectSnapshot, SnapshotKey: point-in-time entity views
//! - TypeSchema, NamedArguments: schema-driven object mapping
//! - Traits: TemporalObject and SnapshotCache
//! - Error: error taxonomy shared by every layer

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod fact;
pub mod schema;
pub mod script;
pub mod snapshot;
pub mod temporal;
pub mod traits;
pub mod types;
pub mod value;

pub use error::{
    CacheError, ConflictKind, ConstructError, MergeError, RegistryError, StoreError,
    TemporalError,
};
pub use fact::{Fact, FactRow};
pub use schema::{AttributeDef, NamedArguments, TypeSchema, TypeSchemaBuilder};
pub use script::{
    ExistenceDirective, ExistenceStrategy, LifecycleMarker, MergeScript, MergeStrategy,
    VersionClosure,
};
pub use snapshot::{ObjectSnapshot, SnapshotKey};
pub use temporal::{
    compare_ends, parse_zone, CanonicalTemporal, Span, Temporal, TemporalScope, TemporalShape,
    TimeValue, FAR_FUTURE,
};
pub use traits::{SnapshotCache, TemporalObject};
pub use types::{EntityId, EntityRef, FactId, TypeName};
pub use value::{Value, ValueType};
