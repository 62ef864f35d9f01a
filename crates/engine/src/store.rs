//! The `ObjectStore` facade
//!
//! Wires a fact store, the type registry, the snapshot cache, a clock and the
//! write pool into one handle. All collaborators are injected through
//! [`ObjectStoreBuilder`]; nothing is global.
//!
//! ```ignore
//! let store = ObjectStore::builder()
//!     .store(Arc::new(MemoryStore::new()))
//!     .register::<Province>()
//!     .config(EngineConfig::from_file(Path::new("tempora.toml"))?)
//!     .build()?;
//!
//! store.write(&province)?;
//! let read: Province = store.read(province.id, &ReadOptions::now())?;
//! ```

use crate::cache::{MemorySnapshotCache, NoopCache};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::{BuildError, ReadError, WriteError};
use crate::pool::{PoolStats, WritePool, WriteTicket};
use crate::reader::{ObjectReader, ReadOptions};
use crate::registry::{TypeRegistry, TypeRegistryBuilder};
use crate::writer::{FactWrite, ObjectWriter, WriteOptions, WriteReport};
use rustc_hash::FxHashSet;
use std::fmt::Display;
use std::sync::Arc;
use tempora_concurrency::{PendingWrite, Txn};
use tempora_core::{
    EntityId, FactRow, LifecycleMarker, ObjectSnapshot, SnapshotCache, Span, StoreError,
    Temporal, TemporalObject, TimeValue, TypeName, TypeSchema, Value,
};
use tempora_storage::{in_transaction, FactStore};
use tracing::info;

/// Builder for [`ObjectStore`]
#[derive(Default)]
pub struct ObjectStoreBuilder {
    store: Option<Arc<dyn FactStore>>,
    types: TypeRegistryBuilder,
    registry: Option<TypeRegistry>,
    config: EngineConfig,
    cache: Option<Arc<dyn SnapshotCache>>,
    clock: Option<Arc<dyn Clock>>,
}

impl ObjectStoreBuilder {
    /// Empty builder with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Fact store to persist through (required)
    pub fn store(mut self, store: Arc<dyn FactStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Register an object type
    pub fn register<T: TemporalObject>(mut self) -> Self {
        self.types = self.types.register::<T>();
        self
    }

    /// Register a bare schema
    pub fn register_schema(mut self, schema: TypeSchema) -> Self {
        self.types = self.types.register_schema(schema);
        self
    }

    /// Use a prebuilt registry instead of the registered types
    pub fn registry(mut self, registry: TypeRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Engine configuration
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Snapshot cache; overrides `[cache]` in the configuration
    pub fn cache(mut self, cache: Arc<dyn SnapshotCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Clock for database time and defaulted read instants
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate everything and start the write pool
    ///
    /// # Errors
    ///
    /// - `MissingStore` if no store was given
    /// - `Config` if the configuration is invalid
    /// - `Registry` if a schema is rejected
    /// - `Pool` if worker threads cannot be spawned
    pub fn build(self) -> Result<ObjectStore, BuildError> {
        let store = self.store.ok_or(BuildError::MissingStore)?;
        let config = self.config;
        config.validate()?;
        let zone = config.zone()?;

        let registry = Arc::new(match self.registry {
            Some(registry) => registry,
            None => self.types.build()?,
        });
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()));

        let cache: Option<Arc<dyn SnapshotCache>> = match self.cache {
            Some(cache) => Some(cache),
            None if config.cache.enabled => {
                Some(Arc::new(MemorySnapshotCache::new(config.cache.capacity)))
            }
            None => None,
        };

        let mut reader = ObjectReader::new(Arc::clone(&store), Arc::clone(&registry))
            .with_clock(Arc::clone(&clock));
        if let Some(cache) = &cache {
            reader = reader.with_cache(Arc::clone(cache));
        }
        let cache = cache.unwrap_or_else(|| Arc::new(NoopCache));

        let writer = ObjectWriter::new(Arc::clone(&store), Arc::clone(&registry))
            .with_cache(Arc::clone(&cache))
            .with_clock(Arc::clone(&clock))
            .with_zone(zone)
            .with_strategies(config.merge_strategy, config.existence_strategy)
            .with_retry(config.retry.clone());

        let pool = WritePool::new(config.write_pool.threads, config.write_pool.queue_depth)?;

        info!(
            target: "tempora::db",
            types = registry.len(),
            merge_strategy = %config.merge_strategy,
            existence_strategy = %config.existence_strategy,
            zone = %zone,
            "object store ready"
        );

        Ok(ObjectStore {
            store,
            registry,
            cache,
            config,
            reader,
            writer,
            pool,
        })
    }
}

/// Bitemporal object store
pub struct ObjectStore {
    store: Arc<dyn FactStore>,
    registry: Arc<TypeRegistry>,
    cache: Arc<dyn SnapshotCache>,
    config: EngineConfig,
    reader: ObjectReader,
    writer: ObjectWriter,
    pool: WritePool,
}

impl ObjectStore {
    /// Start building a store
    pub fn builder() -> ObjectStoreBuilder {
        ObjectStoreBuilder::new()
    }

    /// Configuration in force
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Type registry
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Reader, for reads inside a caller's transaction
    pub fn reader(&self) -> &ObjectReader {
        &self.reader
    }

    /// Writer, for writes inside a caller's transaction
    pub fn writer(&self) -> &ObjectWriter {
        &self.writer
    }

    /// Run `f` in one transaction, committing on `Ok` and aborting on `Err`
    ///
    /// Pass the handle to [`ObjectReader`] and [`ObjectWriter`] calls to
    /// compose them atomically. Every entity written inside the transaction
    /// has its cached snapshots dropped once it has committed or aborted.
    pub fn transaction<R, E, F>(&self, write: bool, f: F) -> Result<R, E>
    where
        E: From<StoreError> + Display,
        F: FnOnce(&Txn) -> Result<R, E>,
    {
        let mut touched: FxHashSet<EntityId> = FxHashSet::default();
        let result = in_transaction(&*self.store, None, write, |txn| {
            let result = f(txn);
            touched = txn.with(|ctx| {
                ctx.pending().iter().map(PendingWrite::entity).collect()
            });
            result
        });
        for entity in touched {
            self.cache.invalidate(entity);
        }
        result
    }

    /// Read a typed object
    pub fn read<T: TemporalObject>(
        &self,
        entity: EntityId,
        options: &ReadOptions,
    ) -> Result<T, ReadError> {
        self.reader.read(entity, options, None)
    }

    /// Read an entity's snapshot
    pub fn read_snapshot(
        &self,
        type_name: &TypeName,
        entity: EntityId,
        options: &ReadOptions,
    ) -> Result<ObjectSnapshot, ReadError> {
        self.reader.read_snapshot(type_name, entity, options, None)
    }

    /// Write an object with the configured strategies at the clock's time
    pub fn write<T: TemporalObject>(&self, object: &T) -> Result<WriteReport, WriteError> {
        self.writer.write(object, &WriteOptions::default(), None)
    }

    /// Write an object with per-write overrides
    pub fn write_with<T: TemporalObject>(
        &self,
        object: &T,
        options: &WriteOptions,
    ) -> Result<WriteReport, WriteError> {
        self.writer.write(object, options, None)
    }

    /// Record one attribute value on an existing entity
    ///
    /// `database_from` defaults to the clock.
    pub fn add_fact(
        &self,
        type_name: impl Into<TypeName>,
        entity: EntityId,
        attribute: &str,
        value: impl Into<Value>,
        valid: Temporal,
        database_from: Option<TimeValue>,
    ) -> Result<WriteReport, WriteError> {
        let options = WriteOptions {
            database: database_from.map(Temporal::database_from),
            ..WriteOptions::default()
        };
        let fact = FactWrite::new(type_name, entity, attribute, value, valid);
        self.writer.add_fact(&fact, &options, None)
    }

    /// Record one attribute value with per-write overrides
    pub fn add_fact_with(
        &self,
        fact: &FactWrite,
        options: &WriteOptions,
    ) -> Result<WriteReport, WriteError> {
        self.writer.add_fact(fact, options, None)
    }

    /// Queue a write on the bounded write pool
    ///
    /// # Errors
    ///
    /// `Backpressure` when the queue is full, `PoolShutdown` after shutdown.
    pub fn submit_write<T>(
        &self,
        object: T,
        options: WriteOptions,
    ) -> Result<WriteTicket<WriteReport>, WriteError>
    where
        T: TemporalObject + 'static,
    {
        let writer = self.writer.clone();
        self.pool.submit(move || writer.write(&object, &options, None))
    }

    /// Block until every queued write has finished
    pub fn drain_writes(&self) {
        self.pool.drain();
    }

    /// Write pool counters
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Recorded existence of an entity
    pub fn existence(&self, entity: EntityId) -> Result<Option<Span>, ReadError> {
        self.transaction(false, |txn| {
            if !self.store.exists(txn, entity)? {
                return Err(ReadError::MissingEntity(entity));
            }
            Ok(self.store.query_existence(txn, entity)?)
        })
    }

    /// Lifecycle markers of an entity, oldest first
    pub fn lifecycle(&self, entity: EntityId) -> Result<Vec<LifecycleMarker>, ReadError> {
        self.transaction(false, |txn| {
            if !self.store.exists(txn, entity)? {
                return Err(ReadError::MissingEntity(entity));
            }
            Ok(self.store.lifecycle(txn, entity)?)
        })
    }

    /// Every version of an entity's facts, optionally for one attribute
    pub fn fact_history(
        &self,
        entity: EntityId,
        attribute: Option<&str>,
    ) -> Result<Vec<FactRow>, ReadError> {
        self.transaction(false, |txn| {
            if !self.store.exists(txn, entity)? {
                return Err(ReadError::MissingEntity(entity));
            }
            Ok(self.store.fact_history(txn, entity, attribute)?)
        })
    }

    /// Drop every cached snapshot of an entity
    pub fn invalidate(&self, entity: EntityId) {
        self.cache.invalidate(entity);
    }

    /// Finish queued writes and stop the write pool
    ///
    /// Synchronous operations keep working; [`ObjectStore::submit_write`]
    /// fails with `PoolShutdown` afterwards.
    pub fn shutdown(&self) {
        self.pool.shutdown();
        info!(target: "tempora::db", "object store shut down");
    }
}
