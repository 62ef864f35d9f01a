//! Merge scripts and merge policy
//!
//! A [`MergeScript`] is the plan the merge engine computes before anything is
//! written. The store applies it as one unit inside the writer's transaction,
//! so a script that fails to compute leaves no trace.

use crate::fact::Fact;
use crate::temporal::Span;
use crate::types::{EntityId, FactId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Strategies
// ============================================================================

/// How a proposed value that disagrees with a stored value is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeStrategy {
    /// Supersede the stored version, keeping its un-superseded valid-time
    #[default]
    ExistingFacts,
    /// Refuse to overwrite a differing stored value
    NoMerge,
}

impl fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeStrategy::ExistingFacts => f.write_str("existing-facts"),
            MergeStrategy::NoMerge => f.write_str("no-merge"),
        }
    }
}

/// How a fact outside the entity's existence is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExistenceStrategy {
    /// Reject the fact
    #[default]
    Strict,
    /// Widen existence to cover the fact
    Extend,
    /// Accept the fact and leave existence alone
    Ignore,
}

impl fmt::Display for ExistenceStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExistenceStrategy::Strict => f.write_str("strict"),
            ExistenceStrategy::Extend => f.write_str("extend"),
            ExistenceStrategy::Ignore => f.write_str("ignore"),
        }
    }
}

// ============================================================================
// Script
// ============================================================================

/// Stamp the database end of an existing version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionClosure {
    /// Version being closed
    pub fact_id: FactId,
    /// Attribute of the version, for diagnostics
    pub attribute: String,
    /// New database end
    pub database_to: DateTime<Utc>,
}

/// Change to an entity's existence interval
///
/// Existence only ever grows: applying a directive to a recorded interval
/// yields a span that covers the recorded one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExistenceDirective {
    /// Record existence for an entity that has none yet
    Establish(Span),
    /// Widen the recorded existence to cover the span
    Widen(Span),
}

impl ExistenceDirective {
    /// Span the directive carries
    pub fn span(&self) -> &Span {
        match self {
            ExistenceDirective::Establish(span) | ExistenceDirective::Widen(span) => span,
        }
    }

    /// Existence after applying this directive to `current`
    pub fn apply(&self, current: Option<&Span>) -> Span {
        match current {
            Some(current) => current.hull(self.span()),
            None => *self.span(),
        }
    }
}

/// Lifecycle event recorded alongside an entity's facts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleMarker {
    /// Entity came into existence
    Created {
        /// Valid-time of creation
        at: DateTime<Utc>,
    },
    /// Entity ceased to exist
    Destroyed {
        /// Valid-time of cessation
        at: DateTime<Utc>,
    },
}

/// Precomputed, atomically applied result of a merge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeScript {
    /// Entity the script applies to
    pub entity: EntityId,
    /// Valid instant the caller asked about, if any
    pub valid_at: Option<DateTime<Utc>>,
    /// Database time every new row starts at and every closure ends at
    pub database_at: DateTime<Utc>,
    /// Existing versions whose database span ends now
    pub versions_to_close: Vec<VersionClosure>,
    /// Old values re-asserted over valid-time the new facts do not cover
    pub historical_versions: Vec<Fact>,
    /// Facts with no prior conflicting version
    pub new_facts: Vec<Fact>,
    /// Existence change, if any
    pub existence: Option<ExistenceDirective>,
}

impl MergeScript {
    /// Empty script for `entity` at `database_at`
    pub fn new(entity: EntityId, database_at: DateTime<Utc>) -> Self {
        Self {
            entity,
            valid_at: None,
            database_at,
            versions_to_close: Vec::new(),
            historical_versions: Vec::new(),
            new_facts: Vec::new(),
            existence: None,
        }
    }

    /// Whether applying the script would change nothing
    pub fn is_empty(&self) -> bool {
        self.versions_to_close.is_empty()
            && self.historical_versions.is_empty()
            && self.new_facts.is_empty()
            && self.existence.is_none()
    }

    /// Number of fact rows the script writes
    pub fn new_version_count(&self) -> usize {
        self.historical_versions.len() + self.new_facts.len()
    }
}
