//! Fact model
//!
//! A fact is one attribute value of one entity, stamped with the span of
//! valid-time it describes and the span of database-time during which it was
//! the store's belief. Facts are never mutated: superseding a fact closes its
//! database span and writes a new row.

use crate::temporal::Span;
use crate::types::{EntityId, FactId};
use crate::value::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A bitemporal attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    /// Entity the fact describes
    pub entity: EntityId,
    /// Attribute name
    pub attribute: String,
    /// Attribute value
    pub value: Value,
    /// When the fact holds in the world
    pub valid: Span,
    /// When the fact is the recorded belief
    pub database: Span,
}

impl Fact {
    /// Create a fact
    pub fn new(
        entity: EntityId,
        attribute: impl Into<String>,
        value: impl Into<Value>,
        valid: Span,
        database: Span,
    ) -> Self {
        Self {
            entity,
            attribute: attribute.into(),
            value: value.into(),
            valid,
            database,
        }
    }

    /// Whether this is the currently recorded version (open database span)
    #[inline]
    pub fn is_active(&self) -> bool {
        self.database.is_continuing()
    }

    /// Whether the fact was believed at `database_at` and held at `valid_at`
    pub fn active_at(&self, valid_at: DateTime<Utc>, database_at: DateTime<Utc>) -> bool {
        self.valid.contains(valid_at) && self.database.contains(database_at)
    }

    /// Same fact with a different valid span
    pub fn with_valid(&self, valid: Span) -> Self {
        Self {
            valid,
            ..self.clone()
        }
    }
}

/// A fact as held by the store, tagged with its store-assigned id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactRow {
    /// Store-assigned identifier
    pub id: FactId,
    /// The fact itself
    pub fact: Fact,
}

impl FactRow {
    /// Wrap a fact with its id
    pub fn new(id: FactId, fact: Fact) -> Self {
        Self { id, fact }
    }

    /// Whether this is the currently recorded version
    #[inline]
    pub fn is_active(&self) -> bool {
        self.fact.is_active()
    }

    /// Whether the row was believed at `database_at` and held at `valid_at`
    #[inline]
    pub fn active_at(&self, valid_at: DateTime<Utc>, database_at: DateTime<Utc>) -> bool {
        self.fact.active_at(valid_at, database_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(day: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap() + Duration::days(day)
    }

    #[test]
    fn test_active_at_checks_both_axes() {
        let fact = Fact::new(
            EntityId::new(),
            "name",
            "Gallia",
            Span::new(t(0), Some(t(10))).unwrap(),
            Span::new(t(5), Some(t(8))).unwrap(),
        );
        assert!(fact.active_at(t(1), t(5)));
        assert!(!fact.active_at(t(10), t(5)));
        assert!(!fact.active_at(t(1), t(8)));
        assert!(!fact.active_at(t(1), t(4)));
        assert!(!fact.is_active());
    }

    #[test]
    fn test_row_active_when_database_open() {
        let fact = Fact::new(
            EntityId::new(),
            "name",
            "Gallia",
            Span::continuing(t(0)),
            Span::continuing(t(0)),
        );
        let row = FactRow::new(FactId::new(1), fact);
        assert!(row.is_active());
        assert!(row.active_at(t(100), t(100)));
    }
}
