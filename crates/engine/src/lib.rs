//! Orchestration layer for tempora
//!
//! This crate turns objects into facts and facts back into objects:
//! - Merge engine: reconciles proposed facts with stored versions
//! - Existence tracker: keeps facts inside an entity's lifetime
//! - Read/write orchestrators over any [`tempora_storage::FactStore`]
//! - Snapshot cache keyed by (type, entity, valid instant, database instant)
//! - Type registry, clock, configuration and the bounded write pool
//!
//! [`ObjectStore`] wires everything together.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod existence;
pub mod merge;
pub mod pool;
pub mod reader;
pub mod registry;
pub mod store;
pub mod writer;

pub use cache::{CacheStats, MemorySnapshotCache, NoopCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, EngineConfig, RetryConfig, WritePoolConfig, CONFIG_FILE_NAME};
pub use error::{BuildError, ConfigError, ReadError, WriteError};
pub use existence::ExistenceTracker;
pub use merge::{MergeEngine, MergeRequest};
pub use pool::{PoolStats, WritePool, WriteTicket};
pub use reader::{ObjectReader, ReadOptions};
pub use registry::{TypeRegistry, TypeRegistryBuilder};
pub use store::{ObjectStore, ObjectStoreBuilder};
pub use writer::{FactWrite, ObjectWriter, WriteOptions, WriteReport};
