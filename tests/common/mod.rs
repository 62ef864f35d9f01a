//! Shared fixtures for the root integration suites.
//!
//! Import via `mod common;`.

#![allow(dead_code)]

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use std::sync::Arc;
use tempora::{
    ConstructError, EngineConfig, EntityId, ManualClock, MemoryStore, NamedArguments,
    ObjectStore, Span, Temporal, TemporalObject, TemporalScope, TypeSchema, Value, ValueType,
};

/// A first-level administrative division
#[derive(Debug, Clone, PartialEq)]
pub struct Province {
    pub id: EntityId,
    pub valid: Span,
    pub name: String,
    pub capital: Option<String>,
    pub population: Option<i64>,
}

impl Province {
    pub fn new(name: &str, valid: Span) -> Self {
        Self {
            id: EntityId::new(),
            valid,
            name: name.to_string(),
            capital: None,
            population: None,
        }
    }

    pub fn with_capital(mut self, capital: &str) -> Self {
        self.capital = Some(capital.to_string());
        self
    }

    pub fn with_population(mut self, population: i64) -> Self {
        self.population = Some(population);
        self
    }
}

impl TemporalObject for Province {
    fn schema() -> TypeSchema {
        TypeSchema::builder("province")
            .required("name", ValueType::String)
            .optional("capital", ValueType::String)
            .optional("population", ValueType::Int)
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
            ("population".to_string(), Value::from(self.population)),
        ]
    }

    fn construct(args: &NamedArguments<'_>) -> Result<Self, ConstructError> {
        Ok(Province {
            id: args.entity_id(),
            valid: args.valid(),
            name: args.string("name")?,
            capital: args.get("capital").and_then(Value::as_str).map(str::to_string),
            population: args.get("population").and_then(Value::as_int),
        })
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn utc(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
}

/// Store over a fresh MemoryStore, clock starting on 2020-01-01
pub fn fixture() -> (ObjectStore, Arc<ManualClock>) {
    fixture_with(EngineConfig::default())
}

pub fn fixture_with(config: EngineConfig) -> (ObjectStore, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(utc(2020, 1, 1)));
    let store = ObjectStore::builder()
        .store(Arc::new(MemoryStore::new()))
        .register::<Province>()
        .config(config)
        .clock(clock.clone())
        .build()
        .unwrap();
    (store, clock)
}
