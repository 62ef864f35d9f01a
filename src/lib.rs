//! Tempora - bitemporal object store
//!
//! Objects are decomposed into facts: one value of one attribute, valid over
//! a span of real-world time and recorded over a span of database time.
//! Writes reconcile new facts with stored versions through the merge engine;
//! reads rebuild an object as it was known at a database instant about a
//! valid instant.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use tempora::{MemoryStore, ObjectStore, ReadOptions};
//!
//! let store = ObjectStore::builder()
//!     .store(Arc::new(MemoryStore::new()))
//!     .register::<Province>()
//!     .build()?;
//!
//! store.write(&province)?;
//! let now: Province = store.read(province.id, &ReadOptions::now())?;
//! let then: Province = store.read(province.id, &ReadOptions::at(valid_at, database_at))?;
//! ```
//!
//! # Architecture
//!
//! - `tempora-core`: temporals, facts, schemas, merge scripts, error types
//! - `tempora-concurrency`: optimistic transactions with nested handles
//! - `tempora-storage`: the `FactStore` trait and the in-memory store
//! - `tempora-engine`: merge engine, existence tracking, read/write
//!   orchestration, cache and the `ObjectStore` facade

pub use tempora_concurrency::{TransactionStats, Txn};
pub use tempora_core::{
    CacheError, ConflictKind, ConstructError, EntityId, EntityRef, ExistenceDirective,
    ExistenceStrategy, Fact, FactId, FactRow, LifecycleMarker, MergeError, MergeScript,
    MergeStrategy, NamedArguments, ObjectSnapshot, RegistryError, SnapshotCache, SnapshotKey,
    Span, StoreError, Temporal, TemporalError, TemporalObject, TemporalScope, TimeValue,
    TypeName, TypeSchema, Value, ValueType, FAR_FUTURE,
};
pub use tempora_engine::{
    BuildError, CacheConfig, Clock, ConfigError, EngineConfig, FactWrite, ManualClock,
    MemorySnapshotCache, NoopCache, ObjectReader, ObjectStore, ObjectStoreBuilder, ObjectWriter,
    ReadError, ReadOptions, RetryConfig, SystemClock, TypeRegistry, WriteError, WriteOptions,
    WritePoolConfig, WriteReport, WriteTicket, CONFIG_FILE_NAME,
};
pub use tempora_storage::{
    in_transaction, DatabaseFilter, FactQuery, FactStore, MemoryStore, ValidFilter,
};
