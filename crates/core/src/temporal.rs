//! Temporal model
//!
//! Every fact carries two temporals and every entity carries a third:
//!
//! - **Valid**: when the fact was true in the modelled world
//! - **Database**: when the fact was the recorded belief of the store
//! - **Exists**: when the entity itself existed
//!
//! A [`Temporal`] is what callers hand in: a scope plus a shape (a point, or
//! an interval that may be open-ended). Its time values may be bare dates,
//! zone-less local datetimes or zoned datetimes. Before anything is compared
//! the temporal is normalized against a zone into a [`Span`], the canonical
//! half-open `[from, to)` UTC interval that the rest of the system works in.
//!
//! ## Normalization rules
//!
//! - A bare date used as a start becomes start-of-day in the zone
//! - A bare date used as an end becomes `23:59:59.999999999` in the zone
//! - A point becomes the one-nanosecond span `[at, at + 1ns)`
//! - An interval whose ends normalize to the same instant becomes a point
//! - Database-scope temporals are always intervals
//!
//! Open-ended ("continuing") spans compare as if they ended at
//! [`FAR_FUTURE`], which keeps minimum/maximum computations over mixed
//! open and closed spans total.

use crate::error::TemporalError;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Sentinel used in place of an absent (continuing) end bound
pub const FAR_FUTURE: DateTime<Utc> = DateTime::<Utc>::MAX_UTC;

// ============================================================================
// Scope
// ============================================================================

/// Which time axis a temporal describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TemporalScope {
    /// When a fact was true in the world
    Valid,
    /// When a fact was the recorded belief of the store
    Database,
    /// When an entity existed
    Exists,
}

impl fmt::Display for TemporalScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemporalScope::Valid => f.write_str("valid"),
            TemporalScope::Database => f.write_str("database"),
            TemporalScope::Exists => f.write_str("exists"),
        }
    }
}

// ============================================================================
// Time values
// ============================================================================

/// A caller-supplied time, before zone normalization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeValue {
    /// Calendar date, interpreted in the normalization zone
    Date(NaiveDate),
    /// Wall-clock datetime, interpreted in the normalization zone
    Local(NaiveDateTime),
    /// Datetime with an explicit offset
    Zoned(DateTime<FixedOffset>),
    /// Datetime already in UTC
    Utc(DateTime<Utc>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BoundRole {
    Start,
    End,
}

impl TimeValue {
    /// Normalize this value as the start of a temporal
    pub fn to_canonical_start(&self, zone: &FixedOffset) -> Result<DateTime<Utc>, TemporalError> {
        self.normalize(zone, BoundRole::Start)
    }

    /// Normalize this value as the end of a temporal
    pub fn to_canonical_end(&self, zone: &FixedOffset) -> Result<DateTime<Utc>, TemporalError> {
        self.normalize(zone, BoundRole::End)
    }

    fn normalize(&self, zone: &FixedOffset, role: BoundRole) -> Result<DateTime<Utc>, TemporalError> {
        match self {
            TimeValue::Utc(dt) => Ok(*dt),
            TimeValue::Zoned(dt) => Ok(dt.with_timezone(&Utc)),
            TimeValue::Local(naive) => local_to_utc(zone, naive),
            TimeValue::Date(date) => {
                let naive = match role {
                    BoundRole::Start => date.and_hms_opt(0, 0, 0),
                    BoundRole::End => date.and_hms_nano_opt(23, 59, 59, 999_999_999),
                }
                .ok_or_else(|| TemporalError::OutOfRange(date.to_string()))?;
                local_to_utc(zone, &naive)
            }
        }
    }
}

fn local_to_utc(zone: &FixedOffset, naive: &NaiveDateTime) -> Result<DateTime<Utc>, TemporalError> {
    zone.from_local_datetime(naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| TemporalError::OutOfRange(naive.to_string()))
}

impl From<NaiveDate> for TimeValue {
    fn from(date: NaiveDate) -> Self {
        TimeValue::Date(date)
    }
}

impl From<NaiveDateTime> for TimeValue {
    fn from(dt: NaiveDateTime) -> Self {
        TimeValue::Local(dt)
    }
}

impl From<DateTime<FixedOffset>> for TimeValue {
    fn from(dt: DateTime<FixedOffset>) -> Self {
        TimeValue::Zoned(dt)
    }
}

impl From<DateTime<Utc>> for TimeValue {
    fn from(dt: DateTime<Utc>) -> Self {
        TimeValue::Utc(dt)
    }
}

/// Parse a UTC offset such as `"+02:00"`, `"-0530"`, `"Z"` or `"UTC"`
pub fn parse_zone(s: &str) -> Result<FixedOffset, TemporalError> {
    let trimmed = s.trim();
    if trimmed.eq_ignore_ascii_case("z") || trimmed.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0).ok_or_else(|| TemporalError::InvalidZone(s.to_string()));
    }

    let invalid = || TemporalError::InvalidZone(s.to_string());
    let (sign, rest) = match trimmed.as_bytes().first() {
        Some(b'+') => (1, &trimmed[1..]),
        Some(b'-') => (-1, &trimmed[1..]),
        _ => return Err(invalid()),
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let hours: i32 = digits[..2].parse().map_err(|_| invalid())?;
    let minutes: i32 = digits[2..].parse().map_err(|_| invalid())?;
    if hours > 23 || minutes > 59 {
        return Err(invalid());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

// ============================================================================
// Canonical span
// ============================================================================

/// Canonical half-open UTC interval `[from, to)`
///
/// ## Invariants
///
/// - `to`, when present, is strictly after `from` (spans are never empty)
/// - An absent `to` means the span is continuing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    from: DateTime<Utc>,
    to: Option<DateTime<Utc>>,
}

impl Span {
    /// Create a span, rejecting empty or inverted bounds
    pub fn new(from: DateTime<Utc>, to: Option<DateTime<Utc>>) -> Result<Self, TemporalError> {
        if let Some(to) = to {
            if to <= from {
                return Err(TemporalError::InvertedInterval { from, to });
            }
        }
        Ok(Self { from, to })
    }

    /// Create a continuing span starting at `from`
    pub fn continuing(from: DateTime<Utc>) -> Self {
        Self { from, to: None }
    }

    /// Create the one-nanosecond span covering exactly `at`
    pub fn instant(at: DateTime<Utc>) -> Result<Self, TemporalError> {
        let to = at
            .checked_add_signed(Duration::nanoseconds(1))
            .ok_or_else(|| TemporalError::OutOfRange(at.to_rfc3339()))?;
        Ok(Self { from: at, to: Some(to) })
    }

    /// Inclusive start
    #[inline]
    pub fn from(&self) -> DateTime<Utc> {
        self.from
    }

    /// Exclusive end, `None` when continuing
    #[inline]
    pub fn to(&self) -> Option<DateTime<Utc>> {
        self.to
    }

    /// Whether the span has no closing bound
    #[inline]
    pub fn is_continuing(&self) -> bool {
        self.to.is_none()
    }

    /// End bound with [`FAR_FUTURE`] substituted for a continuing span
    #[inline]
    pub fn end_or_far_future(&self) -> DateTime<Utc> {
        self.to.unwrap_or(FAR_FUTURE)
    }

    /// Whether `at` falls inside the span
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from <= at && at < self.end_or_far_future()
    }

    /// Whether the two spans share at least one instant
    pub fn overlaps(&self, other: &Span) -> bool {
        self.from < other.end_or_far_future() && other.from < self.end_or_far_future()
    }

    /// Whether `other` lies entirely inside this span
    pub fn covers(&self, other: &Span) -> bool {
        self.from <= other.from && other.end_or_far_future() <= self.end_or_far_future()
    }

    /// Intersection of two spans, `None` when they do not overlap
    pub fn intersect(&self, other: &Span) -> Option<Span> {
        let from = self.from.max(other.from);
        let to = min_end(self.to, other.to);
        match to {
            Some(to) if to <= from => None,
            _ => Some(Span { from, to }),
        }
    }

    /// Intersection of every span: max of starts, min of ends
    ///
    /// Returns `None` for an empty input or an empty intersection.
    pub fn intersect_all<'a, I>(spans: I) -> Option<Span>
    where
        I: IntoIterator<Item = &'a Span>,
    {
        let mut iter = spans.into_iter();
        let first = *iter.next()?;
        iter.try_fold(first, |acc, span| acc.intersect(span))
    }

    /// Smallest span covering both
    pub fn hull(&self, other: &Span) -> Span {
        let from = self.from.min(other.from);
        let to = match (self.to, other.to) {
            (Some(a), Some(b)) => Some(a.max(b)),
            _ => None,
        };
        Span { from, to }
    }

    /// Portions of this span not covered by `other`, in chronological order
    pub fn subtract(&self, other: &Span) -> Vec<Span> {
        if !self.overlaps(other) {
            return vec![*self];
        }
        let mut remainder = Vec::with_capacity(2);
        if self.from < other.from {
            remainder.push(Span {
                from: self.from,
                to: Some(other.from),
            });
        }
        if let Some(other_to) = other.to {
            if other_to < self.end_or_far_future() {
                remainder.push(Span {
                    from: other_to,
                    to: self.to,
                });
            }
        }
        remainder
    }

    /// Close the span at `to`
    pub fn close_at(&self, to: DateTime<Utc>) -> Result<Span, TemporalError> {
        Span::new(self.from, Some(to))
    }
}

impl Ord for Span {
    fn cmp(&self, other: &Self) -> Ordering {
        self.from
            .cmp(&other.from)
            .then_with(|| compare_ends(self.to, other.to))
    }
}

impl PartialOrd for Span {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to {
            Some(to) => write!(f, "[{}, {})", self.from.to_rfc3339(), to.to_rfc3339()),
            None => write!(f, "[{}, ∞)", self.from.to_rfc3339()),
        }
    }
}

/// Compare two end bounds, treating `None` as [`FAR_FUTURE`]
pub fn compare_ends(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Ordering {
    a.unwrap_or(FAR_FUTURE).cmp(&b.unwrap_or(FAR_FUTURE))
}

fn min_end(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}

// ============================================================================
// Temporal
// ============================================================================

/// Shape of a temporal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemporalShape {
    /// A single instant
    Point {
        /// The instant
        at: TimeValue,
    },
    /// An interval, continuing when `to` is absent
    Interval {
        /// Inclusive start
        from: TimeValue,
        /// Exclusive end
        to: Option<TimeValue>,
    },
}

/// Canonical (UTC) form of a temporal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalTemporal {
    /// A single instant
    Point(DateTime<Utc>),
    /// An interval, continuing when `to` is absent
    Interval {
        /// Inclusive start
        from: DateTime<Utc>,
        /// Exclusive end
        to: Option<DateTime<Utc>>,
    },
}

/// A scoped temporal as supplied by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Temporal {
    scope: TemporalScope,
    shape: TemporalShape,
}

impl Temporal {
    /// Create a temporal, rejecting database-scope points
    pub fn new(scope: TemporalScope, shape: TemporalShape) -> Result<Self, TemporalError> {
        if scope == TemporalScope::Database && matches!(shape, TemporalShape::Point { .. }) {
            return Err(TemporalError::DatabasePoint);
        }
        Ok(Self { scope, shape })
    }

    /// Valid-time point
    pub fn valid_point(at: impl Into<TimeValue>) -> Self {
        Self::point(TemporalScope::Valid, at.into())
    }

    /// Continuing valid-time interval
    pub fn valid_from(from: impl Into<TimeValue>) -> Self {
        Self::interval(TemporalScope::Valid, from.into(), None)
    }

    /// Closed valid-time interval
    pub fn valid_between(from: impl Into<TimeValue>, to: impl Into<TimeValue>) -> Self {
        Self::interval(TemporalScope::Valid, from.into(), Some(to.into()))
    }

    /// Continuing database-time interval
    pub fn database_from(from: impl Into<TimeValue>) -> Self {
        Self::interval(TemporalScope::Database, from.into(), None)
    }

    /// Closed database-time interval
    pub fn database_between(from: impl Into<TimeValue>, to: impl Into<TimeValue>) -> Self {
        Self::interval(TemporalScope::Database, from.into(), Some(to.into()))
    }

    /// Continuing existence interval
    pub fn exists_from(from: impl Into<TimeValue>) -> Self {
        Self::interval(TemporalScope::Exists, from.into(), None)
    }

    /// Closed existence interval
    pub fn exists_between(from: impl Into<TimeValue>, to: impl Into<TimeValue>) -> Self {
        Self::interval(TemporalScope::Exists, from.into(), Some(to.into()))
    }

    /// Temporal of `scope` whose canonical span is exactly `span`
    pub fn from_span(scope: TemporalScope, span: &Span) -> Self {
        Self::interval(
            scope,
            TimeValue::Utc(span.from()),
            span.to().map(TimeValue::Utc),
        )
    }

    fn point(scope: TemporalScope, at: TimeValue) -> Self {
        Self {
            scope,
            shape: TemporalShape::Point { at },
        }
    }

    fn interval(scope: TemporalScope, from: TimeValue, to: Option<TimeValue>) -> Self {
        Self {
            scope,
            shape: TemporalShape::Interval { from, to },
        }
    }

    /// Time axis of this temporal
    #[inline]
    pub fn scope(&self) -> TemporalScope {
        self.scope
    }

    /// Point or interval shape
    #[inline]
    pub fn shape(&self) -> &TemporalShape {
        &self.shape
    }

    /// Whether this is a point temporal
    pub fn is_point(&self) -> bool {
        matches!(self.shape, TemporalShape::Point { .. })
    }

    /// Whether this is an interval without a closing bound
    pub fn is_continuing(&self) -> bool {
        matches!(self.shape, TemporalShape::Interval { to: None, .. })
    }

    /// Re-scope the temporal, e.g. turn an object's valid-time into its existence
    pub fn with_scope(self, scope: TemporalScope) -> Result<Self, TemporalError> {
        Self::new(scope, self.shape)
    }

    /// Fail unless the temporal has the given scope
    pub fn expect_scope(&self, expected: TemporalScope) -> Result<&Self, TemporalError> {
        if self.scope != expected {
            return Err(TemporalError::WrongScope {
                expected,
                actual: self.scope,
            });
        }
        Ok(self)
    }

    /// Normalize into explicit UTC instants
    pub fn to_canonical(&self, zone: &FixedOffset) -> Result<CanonicalTemporal, TemporalError> {
        match &self.shape {
            TemporalShape::Point { at } => {
                Ok(CanonicalTemporal::Point(at.to_canonical_start(zone)?))
            }
            TemporalShape::Interval { from, to } => {
                let from = from.to_canonical_start(zone)?;
                let to = to.map(|to| to.to_canonical_end(zone)).transpose()?;
                if let Some(to) = to {
                    if to < from {
                        return Err(TemporalError::InvertedInterval { from, to });
                    }
                }
                Ok(CanonicalTemporal::Interval { from, to })
            }
        }
    }

    /// Normalize into the canonical half-open span
    pub fn to_span(&self, zone: &FixedOffset) -> Result<Span, TemporalError> {
        match self.to_canonical(zone)? {
            CanonicalTemporal::Point(at) => Span::instant(at),
            CanonicalTemporal::Interval { from, to: Some(to) } if to == from => Span::instant(from),
            CanonicalTemporal::Interval { from, to } => Span::new(from, to),
        }
    }

    /// Order two temporals by start, then by end with continuing ends last
    pub fn compare(&self, other: &Temporal, zone: &FixedOffset) -> Result<Ordering, TemporalError> {
        Ok(self.to_span(zone)?.cmp(&other.to_span(zone)?))
    }
}
