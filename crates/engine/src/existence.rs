//! Existence tracker
//!
//! Decides how a batch of proposed facts interacts with the entity's recorded
//! existence. A fact fits when existence covers its whole valid span; the
//! strategy says what happens to facts that do not fit.
//!
//! | current existence | fact fits | Strict      | Extend       | Ignore |
//! |-------------------|-----------|-------------|--------------|--------|
//! | none              | n/a       | Establish   | Establish    | none   |
//! | some              | yes       | none        | none         | none   |
//! | some              | no        | violation   | Widen (hull) | none   |
//!
//! Existence only grows: every directive produced here is applied as a hull
//! over the recorded span.

use tempora_core::{EntityId, ExistenceDirective, ExistenceStrategy, Fact, MergeError, Span};
use tracing::debug;

/// Reconciles proposed facts with an entity's existence
#[derive(Debug, Clone, Copy, Default)]
pub struct ExistenceTracker {
    strategy: ExistenceStrategy,
}

impl ExistenceTracker {
    /// Tracker applying `strategy`
    pub fn new(strategy: ExistenceStrategy) -> Self {
        Self { strategy }
    }

    /// Strategy in force
    pub fn strategy(&self) -> ExistenceStrategy {
        self.strategy
    }

    /// Directive needed so the entity's existence accommodates `proposed`
    ///
    /// # Errors
    ///
    /// Under `Strict`, returns `ExistenceViolation` for the first fact that
    /// lies outside a recorded existence.
    pub fn reconcile(
        &self,
        entity: EntityId,
        current: Option<&Span>,
        proposed: &[Fact],
    ) -> Result<Option<ExistenceDirective>, MergeError> {
        let Some(hull) = proposed
            .iter()
            .map(|f| f.valid)
            .reduce(|acc, span| acc.hull(&span))
        else {
            return Ok(None);
        };

        let existence = match current {
            None => {
                return Ok(match self.strategy {
                    ExistenceStrategy::Ignore => None,
                    ExistenceStrategy::Strict | ExistenceStrategy::Extend => {
                        Some(ExistenceDirective::Establish(hull))
                    }
                });
            }
            Some(existence) => existence,
        };

        let Some(outside) = proposed.iter().find(|f| !existence.covers(&f.valid)) else {
            return Ok(None);
        };

        match self.strategy {
            ExistenceStrategy::Strict => Err(MergeError::ExistenceViolation {
                entity,
                attribute: outside.attribute.clone(),
                fact: outside.valid,
                existence: *existence,
            }),
            ExistenceStrategy::Extend => {
                let directive = ExistenceDirective::Widen(hull);
                debug!(
                    target: "tempora::merge",
                    entity = %entity,
                    from = %existence,
                    to = %directive.apply(Some(existence)),
                    "widening existence"
                );
                Ok(Some(directive))
            }
            ExistenceStrategy::Ignore => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t(day: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap() + Duration::days(day)
    }

    fn fact(entity: EntityId, valid: Span) -> Fact {
        Fact::new(entity, "name", "v", valid, Span::continuing(t(0)))
    }

    #[test]
    fn test_inside_existence_needs_nothing() {
        let entity = EntityId::new();
        let existence = Span::continuing(t(0));
        for strategy in [
            ExistenceStrategy::Strict,
            ExistenceStrategy::Extend,
            ExistenceStrategy::Ignore,
        ] {
            let tracker = ExistenceTracker::new(strategy);
            let out = tracker
                .reconcile(entity, Some(&existence), &[fact(entity, Span::continuing(t(5)))])
                .unwrap();
            assert_eq!(out, None);
        }
    }

    #[test]
    fn test_before_existence() {
        let entity = EntityId::new();
        let existence = Span::continuing(t(0));
        let early = [fact(entity, Span::continuing(t(-10)))];

        let err = ExistenceTracker::new(ExistenceStrategy::Strict)
            .reconcile(entity, Some(&existence), &early)
            .unwrap_err();
        assert!(matches!(err, MergeError::ExistenceViolation { .. }));

        let widen = ExistenceTracker::new(ExistenceStrategy::Extend)
            .reconcile(entity, Some(&existence), &early)
            .unwrap()
            .unwrap();
        assert_eq!(widen.apply(Some(&existence)), Span::continuing(t(-10)));

        let ignored = ExistenceTracker::new(ExistenceStrategy::Ignore)
            .reconcile(entity, Some(&existence), &early)
            .unwrap();
        assert_eq!(ignored, None);
    }

    #[test]
    fn test_after_closed_existence() {
        let entity = EntityId::new();
        let existence = Span::new(t(0), Some(t(10))).unwrap();
        let late = [fact(entity, Span::new(t(12), Some(t(20))).unwrap())];

        assert!(ExistenceTracker::new(ExistenceStrategy::Strict)
            .reconcile(entity, Some(&existence), &late)
            .is_err());

        let widen = ExistenceTracker::new(ExistenceStrategy::Extend)
            .reconcile(entity, Some(&existence), &late)
            .unwrap()
            .unwrap();
        assert_eq!(
            widen.apply(Some(&existence)),
            Span::new(t(0), Some(t(20))).unwrap()
        );
    }

    #[test]
    fn test_no_existence_establishes_hull() {
        let entity = EntityId::new();
        let facts = [
            fact(entity, Span::new(t(3), Some(t(5))).unwrap()),
            fact(entity, Span::new(t(1), Some(t(4))).unwrap()),
        ];
        let out = ExistenceTracker::new(ExistenceStrategy::Strict)
            .reconcile(entity, None, &facts)
            .unwrap();
        assert_eq!(
            out,
            Some(ExistenceDirective::Establish(Span::new(t(1), Some(t(5))).unwrap()))
        );

        assert_eq!(
            ExistenceTracker::new(ExistenceStrategy::Ignore)
                .reconcile(entity, None, &facts)
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_empty_proposal() {
        let tracker = ExistenceTracker::default();
        assert_eq!(tracker.reconcile(EntityId::new(), None, &[]).unwrap(), None);
    }
}
