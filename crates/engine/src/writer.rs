//! Object write orchestrator
//!
//! Turns a typed object (or a single attribute value) into proposed facts,
//! merges them with what the store holds, and applies the resulting script
//! inside one transaction scope. Every write, successful or not, drops the
//! entity's cached snapshots afterwards.
//!
//! A write that loses a commit race to a concurrent write on the same entity
//! is retried from scratch with exponential backoff; merge and existence
//! failures are returned immediately.

use crate::cache::NoopCache;
use crate::clock::{Clock, SystemClock};
use crate::config::RetryConfig;
use crate::error::WriteError;
use crate::merge::{MergeEngine, MergeRequest};
use crate::registry::TypeRegistry;
use chrono::{DateTime, FixedOffset, Offset, Utc};
use std::sync::Arc;
use tempora_concurrency::Txn;
use tempora_core::{
    EntityId, ExistenceDirective, ExistenceStrategy, Fact, LifecycleMarker, MergeScript,
    MergeStrategy, SnapshotCache, Span, Temporal, TemporalObject, TemporalScope, TypeName, Value,
};
use tempora_storage::{in_transaction, FactQuery, FactStore, ValidFilter};
use tracing::{debug, warn};

/// Per-write overrides of the configured defaults
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Database-scope temporal whose start is the write's database time.
    /// Defaults to the clock.
    pub database: Option<Temporal>,
    /// Merge strategy for this write
    pub merge_strategy: Option<MergeStrategy>,
    /// Existence strategy for this write
    pub existence_strategy: Option<ExistenceStrategy>,
}

impl WriteOptions {
    /// Use the configured defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the write at the start of `database`
    pub fn database(mut self, database: Temporal) -> Self {
        self.database = Some(database);
        self
    }

    /// Override the merge strategy
    pub fn merge_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.merge_strategy = Some(strategy);
        self
    }

    /// Override the existence strategy
    pub fn existence_strategy(mut self, strategy: ExistenceStrategy) -> Self {
        self.existence_strategy = Some(strategy);
        self
    }
}

/// A single attribute value to record on an existing entity
#[derive(Debug, Clone, PartialEq)]
pub struct FactWrite {
    /// Registered type of the entity
    pub type_name: TypeName,
    /// Entity written
    pub entity: EntityId,
    /// Attribute written
    pub attribute: String,
    /// Value written
    pub value: Value,
    /// Valid-scope temporal the value holds over
    pub valid: Temporal,
}

impl FactWrite {
    /// Describe a fact write
    pub fn new(
        type_name: impl Into<TypeName>,
        entity: EntityId,
        attribute: impl Into<String>,
        value: impl Into<Value>,
        valid: Temporal,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            entity,
            attribute: attribute.into(),
            value: value.into(),
            valid,
        }
    }
}

/// What a write changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteReport {
    /// Entity written
    pub entity: EntityId,
    /// Whether the write created the entity
    pub created: bool,
    /// Versions whose database span was closed
    pub closed: usize,
    /// Fact rows written, historical versions included
    pub written: usize,
    /// Whether existence was established or widened
    pub existence_changed: bool,
    /// Database time the write was recorded at
    pub database_at: DateTime<Utc>,
}

impl WriteReport {
    fn from_script(script: &MergeScript, created: bool) -> Self {
        Self {
            entity: script.entity,
            created,
            closed: script.versions_to_close.len(),
            written: script.new_version_count(),
            existence_changed: script.existence.is_some(),
            database_at: script.database_at,
        }
    }

    /// Whether the write changed nothing
    pub fn is_noop(&self) -> bool {
        !self.created && self.closed == 0 && self.written == 0 && !self.existence_changed
    }
}

/// Writes objects and facts through the merge engine
#[derive(Clone)]
pub struct ObjectWriter {
    store: Arc<dyn FactStore>,
    registry: Arc<TypeRegistry>,
    cache: Arc<dyn SnapshotCache>,
    clock: Arc<dyn Clock>,
    zone: FixedOffset,
    merge_strategy: MergeStrategy,
    existence_strategy: ExistenceStrategy,
    retry: RetryConfig,
}

impl ObjectWriter {
    /// Writer with default strategies, UTC zone, no cache and the system clock
    pub fn new(store: Arc<dyn FactStore>, registry: Arc<TypeRegistry>) -> Self {
        Self {
            store,
            registry,
            cache: Arc::new(NoopCache),
            clock: Arc::new(SystemClock::new()),
            zone: Utc.fix(),
            merge_strategy: MergeStrategy::default(),
            existence_strategy: ExistenceStrategy::default(),
            retry: RetryConfig::default(),
        }
    }

    /// Invalidate `cache` after every write
    pub fn with_cache(mut self, cache: Arc<dyn SnapshotCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Stamp database time from `clock`
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Normalize zone-less values in `zone`
    pub fn with_zone(mut self, zone: FixedOffset) -> Self {
        self.zone = zone;
        self
    }

    /// Default strategies for writes that do not override them
    pub fn with_strategies(mut self, merge: MergeStrategy, existence: ExistenceStrategy) -> Self {
        self.merge_strategy = merge;
        self.existence_strategy = existence;
        self
    }

    /// Retry policy for conflicting commits
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Write a typed object
    ///
    /// A new entity is created with the object's valid temporal as its
    /// existence, its facts are written as-is, and lifecycle markers are
    /// recorded. An existing entity goes through the merge engine.
    ///
    /// # Errors
    ///
    /// - `UnregisteredType`, `UnknownAttribute`, `AttributeTypeMismatch` for
    ///   objects that do not fit the registry
    /// - `TypeMismatch` if the entity exists under another type
    /// - `Merge` for conflicts, existence violations and time regressions
    /// - `Store` for store failures, including conflicts that outlived retries
    pub fn write<T: TemporalObject>(
        &self,
        object: &T,
        options: &WriteOptions,
        parent: Option<&Txn>,
    ) -> Result<WriteReport, WriteError> {
        let type_name = T::schema().name;
        let facts = object.facts();
        self.registry.validate_facts(&type_name, &facts)?;

        let valid = *object
            .valid_temporal()
            .expect_scope(TemporalScope::Valid)?;
        let valid_span = valid.to_span(&self.zone)?;
        let entity = object.entity_id();
        let merge = self.engine(options);

        let result = self.retrying(entity, parent, || {
            let database_at = self.database_time(options)?;
            in_transaction(&*self.store, parent, true, |txn| {
                match self.store.entity_type(txn, entity)? {
                    None => self.create(txn, entity, &type_name, &facts, valid_span, database_at),
                    Some(actual) if actual != type_name => Err(WriteError::TypeMismatch {
                        entity,
                        expected: type_name.clone(),
                        actual,
                    }),
                    Some(_) => {
                        let proposed = to_facts(entity, &facts, valid_span, database_at);
                        self.merge_existing(txn, &merge, entity, proposed, valid_span, None, database_at)
                    }
                }
            })
        });
        self.finish(entity, &type_name, result)
    }

    /// Record one attribute value on an existing entity
    ///
    /// # Errors
    ///
    /// As [`ObjectWriter::write`], plus `MissingEntity` if the entity does
    /// not exist.
    pub fn add_fact(
        &self,
        fact: &FactWrite,
        options: &WriteOptions,
        parent: Option<&Txn>,
    ) -> Result<WriteReport, WriteError> {
        let FactWrite {
            type_name,
            entity,
            attribute,
            value,
            valid,
        } = fact;
        let entity = *entity;
        let facts = [(attribute.clone(), value.clone())];
        self.registry.validate_facts(type_name, &facts)?;

        let valid = valid.expect_scope(TemporalScope::Valid)?;
        let valid_span = valid.to_span(&self.zone)?;
        let valid_at = valid.is_point().then(|| valid_span.from());
        let merge = self.engine(options);

        let result = self.retrying(entity, parent, || {
            let database_at = self.database_time(options)?;
            in_transaction(&*self.store, parent, true, |txn| {
                match self.store.entity_type(txn, entity)? {
                    None => return Err(WriteError::MissingEntity(entity)),
                    Some(actual) if actual != *type_name => {
                        return Err(WriteError::TypeMismatch {
                            entity,
                            expected: type_name.clone(),
                            actual,
                        })
                    }
                    Some(_) => {}
                }
                let proposed = to_facts(entity, &facts, valid_span, database_at);
                self.merge_existing(txn, &merge, entity, proposed, valid_span, valid_at, database_at)
            })
        });
        self.finish(entity, type_name, result)
    }

    fn engine(&self, options: &WriteOptions) -> MergeEngine {
        MergeEngine::new(
            options.merge_strategy.unwrap_or(self.merge_strategy),
            options.existence_strategy.unwrap_or(self.existence_strategy),
        )
    }

    fn database_time(&self, options: &WriteOptions) -> Result<DateTime<Utc>, WriteError> {
        match &options.database {
            Some(database) => {
                let database = database.expect_scope(TemporalScope::Database)?;
                Ok(database.to_span(&self.zone)?.from())
            }
            None => Ok(self.clock.now()),
        }
    }

    fn create(
        &self,
        txn: &Txn,
        entity: EntityId,
        type_name: &TypeName,
        facts: &[(String, Value)],
        valid: Span,
        database_at: DateTime<Utc>,
    ) -> Result<WriteReport, WriteError> {
        self.store.create_entity(txn, entity, type_name)?;

        let mut script = MergeScript::new(entity, database_at);
        script.new_facts = to_facts(entity, facts, valid, database_at);
        script.existence = Some(ExistenceDirective::Establish(valid));
        self.store.apply_merge_script(txn, &script)?;

        self.store
            .record_lifecycle(txn, entity, LifecycleMarker::Created { at: valid.from() })?;
        if let Some(to) = valid.to() {
            self.store
                .record_lifecycle(txn, entity, LifecycleMarker::Destroyed { at: to })?;
        }
        Ok(WriteReport::from_script(&script, true))
    }

    #[allow(clippy::too_many_arguments)]
    fn merge_existing(
        &self,
        txn: &Txn,
        merge: &MergeEngine,
        entity: EntityId,
        proposed: Vec<Fact>,
        valid: Span,
        valid_at: Option<DateTime<Utc>>,
        database_at: DateTime<Utc>,
    ) -> Result<WriteReport, WriteError> {
        let query = FactQuery::for_entity(entity)
            .attributes(proposed.iter().map(|f| f.attribute.as_str()))
            .valid(ValidFilter::Overlapping(valid));
        let (current, existence) = rayon::join(
            || self.store.query_facts(txn, &query),
            || self.store.query_existence(txn, entity),
        );
        let current = current?;
        let existence = existence?;

        let script = merge.merge(MergeRequest {
            entity,
            proposed,
            current: &current,
            valid_at,
            database_at,
            existence,
        })?;
        if !script.is_empty() {
            self.store.apply_merge_script(txn, &script)?;
        }
        Ok(WriteReport::from_script(&script, false))
    }

    /// Rerun `op` while it fails with a commit conflict
    ///
    /// Inside a caller's transaction nothing is retried: the conflict belongs
    /// to the enclosing scope.
    fn retrying<F>(
        &self,
        entity: EntityId,
        parent: Option<&Txn>,
        mut op: F,
    ) -> Result<WriteReport, WriteError>
    where
        F: FnMut() -> Result<WriteReport, WriteError>,
    {
        let attempts = if parent.is_some() { 0 } else { self.retry.attempts };
        let mut attempt = 0;
        loop {
            match op() {
                Err(e) if e.is_conflict() && attempt < attempts => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        target: "tempora::write",
                        entity = %entity,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "write conflict, retrying"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn finish(
        &self,
        entity: EntityId,
        type_name: &TypeName,
        result: Result<WriteReport, WriteError>,
    ) -> Result<WriteReport, WriteError> {
        self.cache.invalidate(entity);
        match &result {
            Ok(report) => debug!(
                target: "tempora::write",
                entity = %entity,
                type_name = %type_name,
                created = report.created,
                closed = report.closed,
                written = report.written,
                "write applied"
            ),
            Err(e) => debug!(target: "tempora::write", entity = %entity, type_name = %type_name, error = %e, "write failed"),
        }
        result
    }
}

fn to_facts(
    entity: EntityId,
    facts: &[(String, Value)],
    valid: Span,
    database_at: DateTime<Utc>,
) -> Vec<Fact> {
    facts
        .iter()
        .map(|(attribute, value)| {
            Fact::new(
                entity,
                attribute.clone(),
                value.clone(),
                valid,
                Span::continuing(database_at),
            )
        })
        .collect()
}
