//! Fact queries
//!
//! A [`FactQuery`] selects fact rows of one entity along both time axes.
//! Stores may evaluate it however they like; [`FactQuery::matches`] is the
//! reference predicate.

use chrono::{DateTime, Utc};
use tempora_core::{EntityId, FactRow, Span};

/// Valid-time selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidFilter {
    /// Rows whose valid span contains the instant
    At(DateTime<Utc>),
    /// Rows whose valid span overlaps the span
    Overlapping(Span),
    /// Every row
    Any,
}

/// Database-time selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseFilter {
    /// Rows whose database span is still open
    Active,
    /// Rows believed at the instant
    At(DateTime<Utc>),
    /// Every row, including superseded versions
    All,
}

/// Selection of fact rows of one entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactQuery {
    /// Entity whose rows are selected
    pub entity: EntityId,
    /// Attribute names to keep; empty keeps all
    pub attributes: Vec<String>,
    /// Valid-time selection
    pub valid: ValidFilter,
    /// Database-time selection
    pub database: DatabaseFilter,
}

impl FactQuery {
    /// Every active row of `entity`
    pub fn for_entity(entity: EntityId) -> Self {
        Self {
            entity,
            attributes: Vec::new(),
            valid: ValidFilter::Any,
            database: DatabaseFilter::Active,
        }
    }

    /// Rows held at `valid_at` as believed at `database_at`
    pub fn at(entity: EntityId, valid_at: DateTime<Utc>, database_at: DateTime<Utc>) -> Self {
        Self {
            entity,
            attributes: Vec::new(),
            valid: ValidFilter::At(valid_at),
            database: DatabaseFilter::At(database_at),
        }
    }

    /// Restrict to the given attributes
    pub fn attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes = attributes.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the valid-time selection
    pub fn valid(mut self, valid: ValidFilter) -> Self {
        self.valid = valid;
        self
    }

    /// Replace the database-time selection
    pub fn database(mut self, database: DatabaseFilter) -> Self {
        self.database = database;
        self
    }

    /// Whether `row` is selected
    pub fn matches(&self, row: &FactRow) -> bool {
        let fact = &row.fact;
        if fact.entity != self.entity {
            return false;
        }
        if !self.attributes.is_empty() && !self.attributes.iter().any(|a| *a == fact.attribute) {
            return false;
        }
        let valid_ok = match &self.valid {
            ValidFilter::At(at) => fact.valid.contains(*at),
            ValidFilter::Overlapping(span) => fact.valid.overlaps(span),
            ValidFilter::Any => true,
        };
        let database_ok = match &self.database {
            DatabaseFilter::Active => fact.is_active(),
            DatabaseFilter::At(at) => fact.database.contains(*at),
            DatabaseFilter::All => true,
        };
        valid_ok && database_ok
    }
}
