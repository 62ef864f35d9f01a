//! Database-time clocks
//!
//! Every database timestamp the engine stamps comes from an injected
//! [`Clock`]. The system clock never hands out the same instant twice, so two
//! writes to one entity always get distinct database times.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// Source of database time
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock, strictly monotonic across calls
///
/// If the wall clock stalls or steps backwards the clock advances by one
/// nanosecond past the last instant it returned.
#[derive(Debug)]
pub struct SystemClock {
    last: Mutex<Option<DateTime<Utc>>>,
}

impl SystemClock {
    /// Create a system clock
    pub fn new() -> Self {
        Self {
            last: Mutex::new(None),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        let wall = Utc::now();
        let mut last = self.last.lock();
        let next = match *last {
            Some(prev) if wall <= prev => prev + Duration::nanoseconds(1),
            _ => wall,
        };
        *last = Some(next);
        next
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Clock reading `at`
    pub fn new(at: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(at) }
    }

    /// Jump to `at`
    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = at;
    }

    /// Move forward by `by`
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now = *now + by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
