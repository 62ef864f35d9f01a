//! ObjectStore integration tests
//!
//! Exercise the facade end to end over a MemoryStore:
//! - Builder validation
//! - Relations and type checks on read
//! - Cache population and invalidation
//! - Caller-owned transactions
//! - The bounded write pool

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use std::sync::Arc;
use tempora_core::{
    CacheError, ConstructError, EntityId, EntityRef, NamedArguments, ObjectSnapshot,
    RegistryError, SnapshotCache, SnapshotKey, Span, Temporal, TemporalObject, TemporalScope,
    TypeName, TypeSchema, Value, ValueType,
};
use tempora_engine::{
    BuildError, Clock, ConfigError, EngineConfig, FactWrite, ManualClock, MemorySnapshotCache,
    ObjectStore, ReadError, ReadOptions, WriteError, WriteOptions,
};
use tempora_storage::MemoryStore;

#[derive(Debug, Clone, PartialEq)]
struct City {
    id: EntityId,
    valid: Span,
    name: String,
}

impl TemporalObject for City {
    fn schema() -> TypeSchema {
        TypeSchema::builder("city")
            .required("name", ValueType::String)
            .build()
    }

    fn entity_id(&self) -> EntityId {
        self.id
    }

    fn valid_temporal(&self) -> Temporal {
        Temporal::from_span(TemporalScope::Valid, &self.valid)
    }

    fn facts(&self) -> Vec<(String, Value)> {
        vec![("name".to_string(), Value::from(self.name.as_str()))]
    }

    fn construct(args: &NamedArguments<'_>) -> Result<Self, ConstructError> {
        Ok(City {
            id: args.entity_id(),
            valid: args.valid(),
            name: args.string("name")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Country {
    id: EntityId,
    valid: Span,
    name: String,
    capital: EntityRef,
    capital_name: Option<String>,
}

impl TemporalObject for Country {
    fn schema() -> TypeSchema {
        TypeSchema::builder("country")
            .required("name", ValueType::String)
            .required("capital", ValueType::Entity)
            .build()
    }

    fn entity_id(&self) -> EntityId {
        self.id
    }

    fn valid_temporal(&self) -> Temporal {
        Temporal::from_span(TemporalScope::Valid, &self.valid)
    }

    fn facts(&self) -> Vec<(String, Value)> {
        vec![
            ("name".to_string(), Value::from(self.name.as_str())),
            ("capital".to_string(), Value::from(self.capital.clone())),
        ]
    }

    fn construct(args: &NamedArguments<'_>) -> Result<Self, ConstructError> {
        let capital_name = args
            .related("capital")
            .and_then(|s| s.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(Country {
            id: args.entity_id(),
            valid: args.valid(),
            name: args.string("name")?,
            capital: args.entity("capital")?,
            capital_name,
        })
    }
}

fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
}

fn city(name: &str, from: DateTime<Utc>) -> City {
    City {
        id: EntityId::new(),
        valid: Span::continuing(from),
        name: name.to_string(),
    }
}

/// Cache whose every population fails
struct RejectingCache;

impl SnapshotCache for RejectingCache {
    fn get(&self, _key: &SnapshotKey) -> Option<ObjectSnapshot> {
        None
    }

    fn put(&self, _key: SnapshotKey, _snapshot: ObjectSnapshot) -> Result<(), CacheError> {
        Err(CacheError::CapacityExceeded(0))
    }

    fn invalidate(&self, _entity: EntityId) {}
}

fn open_cached(clock: Arc<ManualClock>, cache: Arc<dyn SnapshotCache>) -> ObjectStore {
    ObjectStore::builder()
        .store(Arc::new(MemoryStore::new()))
        .register::<City>()
        .clock(clock)
        .cache(cache)
        .build()
        .unwrap()
}

fn open(clock: Arc<ManualClock>) -> ObjectStore {
    ObjectStore::builder()
        .store(Arc::new(MemoryStore::new()))
        .register::<City>()
        .register::<Country>()
        .clock(clock)
        .build()
        .unwrap()
}

// ============================================================================
// Builder
// ============================================================================

#[test]
fn test_build_requires_store() {
    let result = ObjectStore::builder().register::<City>().build();
    assert!(matches!(result, Err(BuildError::MissingStore)));
}

#[test]
fn test_build_rejects_invalid_config() {
    let config = EngineConfig {
        default_zone: "somewhere".to_string(),
        ..EngineConfig::default()
    };
    let result = ObjectStore::builder()
        .store(Arc::new(MemoryStore::new()))
        .config(config)
        .build();
    assert!(matches!(result, Err(BuildError::Config(ConfigError::Invalid(_)))));
}

#[test]
fn test_build_rejects_duplicate_types() {
    let result = ObjectStore::builder()
        .store(Arc::new(MemoryStore::new()))
        .register::<City>()
        .register::<City>()
        .build();
    assert!(matches!(
        result,
        Err(BuildError::Registry(RegistryError::DuplicateType(_)))
    ));
}

// ============================================================================
// Reads
// ============================================================================

#[test]
fn test_read_resolves_related_entity() {
    let clock = Arc::new(ManualClock::new(utc(2020, 1, 1)));
    let store = open(Arc::clone(&clock));

    let rome = city("Rome", utc(1871, 7, 1));
    store.write(&rome).unwrap();
    let italy = Country {
        id: EntityId::new(),
        valid: Span::continuing(utc(1946, 6, 2)),
        name: "Italy".to_string(),
        capital: EntityRef::new("city", rome.id),
        capital_name: None,
    };
    store.write(&italy).unwrap();

    clock.advance(Duration::days(1));
    let read: Country = store
        .read(italy.id, &ReadOptions::at(utc(2000, 1, 1), clock.now()))
        .unwrap();
    assert_eq!(read.name, "Italy");
    assert_eq!(read.capital.id, rome.id);
    assert_eq!(read.capital_name.as_deref(), Some("Rome"));
}

#[test]
fn test_read_skips_relation_without_state() {
    let clock = Arc::new(ManualClock::new(utc(2020, 1, 1)));
    let store = open(Arc::clone(&clock));

    // Capital only exists from 1990, the country is read in 1960
    let capital = city("Berlin", utc(1990, 10, 3));
    store.write_with(&capital, &WriteOptions::new()).unwrap();
    let country = Country {
        id: EntityId::new(),
        valid: Span::continuing(utc(1949, 5, 23)),
        name: "Germany".to_string(),
        capital: EntityRef::new("city", capital.id),
        capital_name: None,
    };
    store.write(&country).unwrap();

    let read: Country = store
        .read(country.id, &ReadOptions::at(utc(1960, 1, 1), utc(2021, 1, 1)))
        .unwrap();
    assert_eq!(read.capital.id, capital.id);
    assert_eq!(read.capital_name, None);
}

#[test]
fn test_read_under_wrong_type() {
    let clock = Arc::new(ManualClock::new(utc(2020, 1, 1)));
    let store = open(clock);

    let paris = city("Paris", utc(1800, 1, 1));
    store.write(&paris).unwrap();

    let err = store
        .read::<Country>(paris.id, &ReadOptions::now())
        .unwrap_err();
    assert!(matches!(
        err,
        ReadError::TypeMismatch { ref expected, ref actual, .. }
            if expected.as_str() == "country" && actual.as_str() == "city"
    ));
}

#[test]
fn test_read_missing_entity() {
    let store = open(Arc::new(ManualClock::new(utc(2020, 1, 1))));
    let id = EntityId::new();
    let err = store.read::<City>(id, &ReadOptions::now()).unwrap_err();
    assert_eq!(err, ReadError::MissingEntity(id));
}

#[test]
fn test_read_before_existence_has_no_state() {
    let clock = Arc::new(ManualClock::new(utc(2020, 1, 1)));
    let store = open(Arc::clone(&clock));

    let oslo = city("Oslo", utc(1925, 1, 1));
    store.write(&oslo).unwrap();

    let err = store
        .read::<City>(oslo.id, &ReadOptions::at(utc(1900, 1, 1), utc(2021, 1, 1)))
        .unwrap_err();
    assert!(matches!(err, ReadError::NoValidState { .. }));

    // Database time before the write sees nothing either
    let err = store
        .read::<City>(oslo.id, &ReadOptions::at(utc(2000, 1, 1), utc(2019, 1, 1)))
        .unwrap_err();
    assert!(matches!(err, ReadError::NoValidState { .. }));
}

#[test]
fn test_read_snapshot_exposes_windows() {
    let clock = Arc::new(ManualClock::new(utc(2020, 1, 1)));
    let store = open(Arc::clone(&clock));

    let lima = city("Lima", utc(1535, 1, 18));
    store.write(&lima).unwrap();

    let snapshot = store
        .read_snapshot(
            &TypeName::new("city"),
            lima.id,
            &ReadOptions::at(utc(2000, 1, 1), utc(2021, 1, 1)),
        )
        .unwrap();
    assert_eq!(snapshot.get("name"), Some(&Value::from("Lima")));
    assert_eq!(snapshot.valid, Span::continuing(utc(1535, 1, 18)));
    assert_eq!(snapshot.database, Span::continuing(utc(2020, 1, 1)));
    assert_eq!(snapshot.existence, Some(Span::continuing(utc(1535, 1, 18))));
}

// ============================================================================
// Cache
// ============================================================================

#[test]
fn test_explicit_reads_are_cached_and_writes_invalidate() {
    let clock = Arc::new(ManualClock::new(utc(2020, 1, 1)));
    let cache = Arc::new(MemorySnapshotCache::new(16));
    let store = ObjectStore::builder()
        .store(Arc::new(MemoryStore::new()))
        .register::<City>()
        .clock(clock.clone())
        .cache(cache.clone())
        .build()
        .unwrap();

    let kyiv = city("Kiev", utc(1991, 8, 24));
    store.write(&kyiv).unwrap();
    clock.advance(Duration::days(1));

    let options = ReadOptions::at(utc(2000, 1, 1), clock.now());
    let first: City = store.read(kyiv.id, &options).unwrap();
    let second: City = store.read(kyiv.id, &options).unwrap();
    assert_eq!(first, second);
    let stats = cache.stats();
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 1);

    // Reads that default to now are never cached
    store.read::<City>(kyiv.id, &ReadOptions::now()).unwrap();
    assert_eq!(cache.stats().entries, 1);

    clock.advance(Duration::days(1));
    let renamed = City {
        name: "Kyiv".to_string(),
        valid: Span::continuing(utc(1995, 1, 1)),
        ..kyiv.clone()
    };
    store.write(&renamed).unwrap();
    assert!(cache.is_empty());

    // Same instants still see the old state, fetched again from the store
    let again: City = store.read(kyiv.id, &options).unwrap();
    assert_eq!(again.name, "Kiev");
    assert_eq!(cache.stats().misses, 2);
}

#[test]
fn test_bypass_cache() {
    let clock = Arc::new(ManualClock::new(utc(2020, 1, 1)));
    let cache = Arc::new(MemorySnapshotCache::new(16));
    let store = ObjectStore::builder()
        .store(Arc::new(MemoryStore::new()))
        .register::<City>()
        .clock(clock)
        .cache(cache.clone())
        .build()
        .unwrap();

    let quito = city("Quito", utc(1534, 12, 6));
    store.write(&quito).unwrap();
    let options = ReadOptions::at(utc(2000, 1, 1), utc(2021, 1, 1)).bypass_cache();
    store.read::<City>(quito.id, &options).unwrap();
    assert!(cache.is_empty());
}

#[test]
fn test_failed_cache_population_keeps_reads_working() {
    let clock = Arc::new(ManualClock::new(utc(2020, 1, 1)));
    let store = open_cached(clock, Arc::new(RejectingCache));

    let bern = city("Bern", utc(1848, 11, 28));
    let chur = city("Chur", utc(1803, 4, 19));
    store.write(&bern).unwrap();
    store.write(&chur).unwrap();

    let options = ReadOptions::at(utc(2000, 1, 1), utc(2021, 1, 1));
    let a: City = store.read(bern.id, &options).unwrap();
    let b: City = store.read(chur.id, &options).unwrap();
    assert_eq!(a.name, "Bern");
    assert_eq!(b.name, "Chur");
}

#[test]
fn test_full_cache_evicts_instead_of_refusing() {
    let clock = Arc::new(ManualClock::new(utc(2020, 1, 1)));
    let cache = Arc::new(MemorySnapshotCache::new(1));
    let store = open_cached(clock, cache.clone());

    let bern = city("Bern", utc(1848, 11, 28));
    let chur = city("Chur", utc(1803, 4, 19));
    store.write(&bern).unwrap();
    store.write(&chur).unwrap();

    let options = ReadOptions::at(utc(2000, 1, 1), utc(2021, 1, 1));
    assert_eq!(store.read::<City>(bern.id, &options).unwrap().name, "Bern");
    assert_eq!(store.read::<City>(chur.id, &options).unwrap().name, "Chur");

    let stats = cache.stats();
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.evictions, 1);
    assert_eq!(cache.entity_count(), 1);
}

#[test]
fn test_rolled_back_transaction_leaves_no_cached_state() {
    let clock = Arc::new(ManualClock::new(utc(2020, 1, 1)));
    let cache = Arc::new(MemorySnapshotCache::new(16));
    let store = open_cached(Arc::clone(&clock), cache.clone());

    let kyiv = city("Kiev", utc(1991, 8, 24));
    store.write(&kyiv).unwrap();
    clock.advance(Duration::days(1));

    let options = ReadOptions::at(utc(2010, 1, 1), utc(2030, 1, 1));
    let result: Result<(), Box<dyn std::error::Error>> = store.transaction(true, |txn| {
        store.writer().add_fact(
            &FactWrite::new(
                "city",
                kyiv.id,
                "name",
                "Kyiv",
                Temporal::valid_from(utc(1995, 1, 1)),
            ),
            &WriteOptions::new(),
            Some(txn),
        )?;
        let inside: City = store.reader().read(kyiv.id, &options, Some(txn))?;
        assert_eq!(inside.name, "Kyiv");
        Err("caller gave up".into())
    });
    assert!(result.is_err());
    assert!(cache.is_empty());

    let after: City = store.read(kyiv.id, &options).unwrap();
    assert_eq!(after.name, "Kiev");
    let bypassed: City = store.read(kyiv.id, &options.bypass_cache()).unwrap();
    assert_eq!(bypassed.name, "Kiev");
}

#[test]
fn test_committed_transaction_invalidates_after_commit() {
    let clock = Arc::new(ManualClock::new(utc(2020, 1, 1)));
    let cache = Arc::new(MemorySnapshotCache::new(16));
    let store = open_cached(Arc::clone(&clock), cache.clone());

    let kyiv = city("Kiev", utc(1991, 8, 24));
    store.write(&kyiv).unwrap();
    clock.advance(Duration::days(1));

    let options = ReadOptions::at(utc(2010, 1, 1), utc(2030, 1, 1));
    store
        .transaction(true, |txn| -> Result<(), WriteError> {
            store.writer().add_fact(
                &FactWrite::new(
                    "city",
                    kyiv.id,
                    "name",
                    "Kyiv",
                    Temporal::valid_from(utc(1995, 1, 1)),
                ),
                &WriteOptions::new(),
                Some(txn),
            )?;
            // An outside read still sees the committed state and caches it
            let outside: City = store.read(kyiv.id, &options).unwrap();
            assert_eq!(outside.name, "Kiev");
            assert_eq!(cache.len(), 1);
            Ok(())
        })
        .unwrap();
    assert!(cache.is_empty());

    let after: City = store.read(kyiv.id, &options).unwrap();
    assert_eq!(after.name, "Kyiv");
}

// ============================================================================
// Transactions
// ============================================================================

#[test]
fn test_caller_transaction_rolls_back_every_write() {
    let clock = Arc::new(ManualClock::new(utc(2020, 1, 1)));
    let store = open(clock);

    let a = city("Aachen", utc(1900, 1, 1));
    let b = city("Bonn", utc(1900, 1, 1));
    let result: Result<(), WriteError> = store.transaction(true, |txn| {
        store.writer().write(&a, &WriteOptions::new(), Some(txn))?;
        store.writer().write(&b, &WriteOptions::new(), Some(txn))?;
        Err(WriteError::MissingEntity(EntityId::new()))
    });
    assert!(result.is_err());

    assert_eq!(store.existence(a.id), Err(ReadError::MissingEntity(a.id)));
    assert_eq!(store.existence(b.id), Err(ReadError::MissingEntity(b.id)));
}

#[test]
fn test_caller_transaction_commits_together() {
    let clock = Arc::new(ManualClock::new(utc(2020, 1, 1)));
    let store = open(clock);

    let a = city("Aachen", utc(1900, 1, 1));
    let b = city("Bonn", utc(1900, 1, 1));
    store
        .transaction(true, |txn| -> Result<(), WriteError> {
            store.writer().write(&a, &WriteOptions::new(), Some(txn))?;
            store.writer().write(&b, &WriteOptions::new(), Some(txn))?;
            Ok(())
        })
        .unwrap();

    // A read inside the same kind of scope sees both
    let names: Vec<String> = store
        .transaction(false, |txn| -> Result<Vec<String>, ReadError> {
            let options = ReadOptions::now();
            let a: City = store.reader().read(a.id, &options, Some(txn))?;
            let b: City = store.reader().read(b.id, &options, Some(txn))?;
            Ok(vec![a.name, b.name])
        })
        .unwrap();
    assert_eq!(names, vec!["Aachen", "Bonn"]);
}

// ============================================================================
// History
// ============================================================================

#[test]
fn test_history_and_lifecycle() {
    let clock = Arc::new(ManualClock::new(utc(2020, 1, 1)));
    let store = open(Arc::clone(&clock));

    let city_v1 = City {
        id: EntityId::new(),
        valid: Span::new(utc(1900, 1, 1), Some(utc(1950, 1, 1))).unwrap(),
        name: "Königsberg".to_string(),
    };
    store.write(&city_v1).unwrap();

    clock.advance(Duration::days(1));
    store
        .add_fact(
            "city",
            city_v1.id,
            "name",
            "Kaliningrad",
            Temporal::valid_between(utc(1946, 7, 4), utc(1950, 1, 1)),
            None,
        )
        .unwrap();

    let history = store.fact_history(city_v1.id, Some("name")).unwrap();
    // Original, its surviving prefix, and the new value
    assert_eq!(history.len(), 3);
    let closed = history
        .iter()
        .filter(|row| !row.fact.database.is_continuing())
        .count();
    assert_eq!(closed, 1);

    let lifecycle = store.lifecycle(city_v1.id).unwrap();
    assert_eq!(lifecycle.len(), 2);
}

#[test]
fn test_add_fact_with_date_database_time() {
    let clock = Arc::new(ManualClock::new(utc(2020, 1, 1)));
    let store = open(clock);

    let turku = city("Åbo", utc(1229, 1, 1));
    store.write(&turku).unwrap();

    let report = store
        .add_fact(
            "city",
            turku.id,
            "name",
            "Turku",
            Temporal::valid_from(utc(1917, 12, 6)),
            Some(NaiveDate::from_ymd_opt(2021, 3, 1).unwrap().into()),
        )
        .unwrap();
    assert_eq!(report.database_at, utc(2021, 3, 1));
    assert_eq!(report.closed, 1);

    let err = store
        .add_fact(
            "city",
            EntityId::new(),
            "name",
            "Nowhere",
            Temporal::valid_from(utc(2000, 1, 1)),
            None,
        )
        .unwrap_err();
    assert!(matches!(err, WriteError::MissingEntity(_)));
}

// ============================================================================
// Write pool
// ============================================================================

#[test]
fn test_submitted_writes_complete() {
    let clock = Arc::new(ManualClock::new(utc(2020, 1, 1)));
    let store = open(clock);

    let tickets: Vec<_> = (0..8)
        .map(|i| {
            let c = city(&format!("city-{i}"), utc(1900, 1, 1));
            let id = c.id;
            (id, store.submit_write(c, WriteOptions::new()).unwrap())
        })
        .collect();

    for (id, ticket) in tickets {
        let report = ticket.wait().unwrap();
        assert!(report.created);
        assert_eq!(report.entity, id);
    }
    store.drain_writes();
    assert_eq!(store.pool_stats().jobs_completed, 8);
}

#[test]
fn test_submit_after_shutdown() {
    let store = open(Arc::new(ManualClock::new(utc(2020, 1, 1))));
    store.shutdown();

    let result = store.submit_write(city("Late", utc(1900, 1, 1)), WriteOptions::new());
    assert!(matches!(result, Err(WriteError::PoolShutdown)));

    // Synchronous writes are unaffected
    assert!(store.write(&city("Sync", utc(1900, 1, 1))).is_ok());
}
