//! Object read orchestrator
//!
//! A read reconstructs one entity at one (valid, database) instant:
//!
//! 1. Serve from the cache when the read is cacheable and the key is present
//! 2. Otherwise, inside one transaction scope, fetch the active facts, the
//!    recorded existence and the related entities concurrently
//! 3. Intersect the facts' valid spans and database spans into the
//!    snapshot's derived windows
//! 4. Check the attributes against the schema and construct the object
//! 5. Populate the cache and commit
//!
//! Only reads with both instants given explicitly are cached; a read that
//! defaulted to "now" would never be looked up again. Reads inside a caller's
//! transaction never touch the cache, since they may see writes that are
//! later rolled back.

use crate::cache::NoopCache;
use crate::clock::{Clock, SystemClock};
use crate::error::ReadError;
use crate::registry::TypeRegistry;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tempora_concurrency::Txn;
use tempora_core::{
    EntityId, FactRow, ObjectSnapshot, SnapshotCache, SnapshotKey, Span, TemporalObject,
    TypeName, TypeSchema, Value,
};
use tempora_storage::{in_transaction, FactQuery, FactStore};
use tracing::{debug, trace, warn};

/// Instants and cache policy of one read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// Valid instant, defaults to now
    pub valid_at: Option<DateTime<Utc>>,
    /// Database instant, defaults to now
    pub database_at: Option<DateTime<Utc>>,
    /// Skip the cache for both lookup and population
    pub bypass_cache: bool,
}

impl ReadOptions {
    /// Read at the current instant on both axes
    pub fn now() -> Self {
        Self::default()
    }

    /// Read at explicit instants
    pub fn at(valid_at: DateTime<Utc>, database_at: DateTime<Utc>) -> Self {
        Self {
            valid_at: Some(valid_at),
            database_at: Some(database_at),
            bypass_cache: false,
        }
    }

    /// Set the valid instant
    pub fn valid_at(mut self, at: DateTime<Utc>) -> Self {
        self.valid_at = Some(at);
        self
    }

    /// Set the database instant
    pub fn database_at(mut self, at: DateTime<Utc>) -> Self {
        self.database_at = Some(at);
        self
    }

    /// Skip the cache
    pub fn bypass_cache(mut self) -> Self {
        self.bypass_cache = true;
        self
    }
}

/// Reconstructs snapshots and typed objects from stored facts
#[derive(Clone)]
pub struct ObjectReader {
    store: Arc<dyn FactStore>,
    registry: Arc<TypeRegistry>,
    cache: Arc<dyn SnapshotCache>,
    clock: Arc<dyn Clock>,
    cache_enabled: bool,
}

impl ObjectReader {
    /// Reader without a cache, on the system clock
    pub fn new(store: Arc<dyn FactStore>, registry: Arc<TypeRegistry>) -> Self {
        Self {
            store,
            registry,
            cache: Arc::new(NoopCache),
            clock: Arc::new(SystemClock::new()),
            cache_enabled: false,
        }
    }

    /// Use `cache` for cacheable reads
    pub fn with_cache(mut self, cache: Arc<dyn SnapshotCache>) -> Self {
        self.cache = cache;
        self.cache_enabled = true;
        self
    }

    /// Take "now" from `clock`
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Read a typed object
    ///
    /// # Errors
    ///
    /// - `MissingEntity` if the entity does not exist
    /// - `TypeMismatch` if it exists under another type
    /// - `NoValidState` if no consistent state exists at the instants
    /// - `Construct` if the snapshot does not satisfy the type
    pub fn read<T: TemporalObject>(
        &self,
        entity: EntityId,
        options: &ReadOptions,
        parent: Option<&Txn>,
    ) -> Result<T, ReadError> {
        let type_name = T::schema().name;
        self.read_with(&type_name, entity, options, parent, |snapshot| {
            Ok(self.registry.construct::<T>(snapshot)?)
        })
    }

    /// Read the untyped snapshot of an entity
    pub fn read_snapshot(
        &self,
        type_name: &TypeName,
        entity: EntityId,
        options: &ReadOptions,
        parent: Option<&Txn>,
    ) -> Result<ObjectSnapshot, ReadError> {
        self.read_with(type_name, entity, options, parent, |snapshot| {
            Ok(snapshot.clone())
        })
    }

    fn read_with<R>(
        &self,
        type_name: &TypeName,
        entity: EntityId,
        options: &ReadOptions,
        parent: Option<&Txn>,
        build: impl FnOnce(&ObjectSnapshot) -> Result<R, ReadError>,
    ) -> Result<R, ReadError> {
        let schema = self
            .registry
            .schema(type_name)
            .ok_or_else(|| ReadError::UnregisteredType(type_name.clone()))?;

        let (valid_at, database_at, explicit) = match (options.valid_at, options.database_at) {
            (Some(valid_at), Some(database_at)) => (valid_at, database_at, true),
            (valid_at, database_at) => {
                let now = self.clock.now();
                (valid_at.unwrap_or(now), database_at.unwrap_or(now), false)
            }
        };

        let cacheable = explicit
            && parent.is_none()
            && self.cache_enabled
            && schema.cacheable
            && !options.bypass_cache;
        let key = SnapshotKey::new(type_name.clone(), entity, valid_at, database_at);
        if cacheable {
            if let Some(snapshot) = self.cache.get(&key) {
                trace!(target: "tempora::cache", entity = %entity, type_name = %type_name, "hit");
                return build(&snapshot);
            }
        }

        in_transaction(&*self.store, parent, false, |txn| {
            let snapshot = self.load(txn, schema, entity, valid_at, database_at, true)?;
            TypeRegistry::check_arguments(schema, &snapshot)?;
            let built = build(&snapshot)?;
            if cacheable {
                if let Err(e) = self.cache.put(key, snapshot) {
                    warn!(target: "tempora::cache", entity = %entity, error = %e, "cache population failed");
                }
            }
            Ok(built)
        })
    }

    /// Assemble a snapshot inside `txn`
    ///
    /// With `resolve` set, entity-valued attributes are loaded one hop deep;
    /// the nested loads never resolve their own relations.
    fn load(
        &self,
        txn: &Txn,
        schema: &TypeSchema,
        entity: EntityId,
        valid_at: DateTime<Utc>,
        database_at: DateTime<Utc>,
        resolve: bool,
    ) -> Result<ObjectSnapshot, ReadError> {
        match self.store.entity_type(txn, entity)? {
            None => return Err(ReadError::MissingEntity(entity)),
            Some(actual) if actual != schema.name => {
                return Err(ReadError::TypeMismatch {
                    entity,
                    expected: schema.name.clone(),
                    actual,
                })
            }
            Some(_) => {}
        }

        let query = FactQuery::at(entity, valid_at, database_at);
        let ((facts, existence), related) = rayon::join(
            || {
                rayon::join(
                    || self.store.query_facts(txn, &query),
                    || self.store.query_existence(txn, entity),
                )
            },
            || {
                if resolve {
                    self.resolve_relations(txn, schema, entity, valid_at, database_at)
                } else {
                    Ok(BTreeMap::new())
                }
            },
        );
        let mut facts = facts?;
        let existence = existence?;
        let related = related?;

        let no_state = || ReadError::NoValidState {
            entity,
            valid_at,
            database_at,
        };
        if facts.is_empty() {
            return Err(no_state());
        }
        let valid = Span::intersect_all(facts.iter().map(|r| &r.fact.valid)).ok_or_else(no_state)?;
        let database =
            Span::intersect_all(facts.iter().map(|r| &r.fact.database)).ok_or_else(no_state)?;

        facts.sort_by_key(|r| r.id);
        let attributes = facts
            .into_iter()
            .map(|FactRow { fact, .. }| (fact.attribute, fact.value))
            .collect();

        Ok(ObjectSnapshot {
            entity,
            type_name: schema.name.clone(),
            attributes,
            related,
            valid,
            database,
            existence,
            valid_at,
            database_at,
        })
    }

    fn resolve_relations(
        &self,
        txn: &Txn,
        schema: &TypeSchema,
        entity: EntityId,
        valid_at: DateTime<Utc>,
        database_at: DateTime<Utc>,
    ) -> Result<BTreeMap<String, ObjectSnapshot>, ReadError> {
        let names: Vec<&str> = schema.relations().map(|a| a.name.as_str()).collect();
        if names.is_empty() {
            return Ok(BTreeMap::new());
        }

        let query = FactQuery::at(entity, valid_at, database_at).attributes(names);
        let mut related = BTreeMap::new();
        for row in self.store.query_facts(txn, &query)? {
            let Value::Entity(target) = &row.fact.value else {
                continue;
            };
            if target.id == entity {
                continue;
            }
            let target_schema = self
                .registry
                .schema(&target.type_name)
                .ok_or_else(|| ReadError::UnregisteredType(target.type_name.clone()))?;
            match self.load(txn, target_schema, target.id, valid_at, database_at, false) {
                Ok(snapshot) => {
                    related.insert(row.fact.attribute.clone(), snapshot);
                }
                Err(e @ (ReadError::NoValidState { .. } | ReadError::MissingEntity(_))) => {
                    debug!(target: "tempora::read", entity = %entity, related = %target, reason = %e, "skipping unresolved relation");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(related)
    }
}
