//! Merge engine
//!
//! Computes a [`MergeScript`] from proposed facts and the entity's stored
//! facts. Nothing is written here: the script is computed in full, then the
//! writer applies it inside its transaction. A failed merge therefore leaves
//! the store untouched.
//!
//! # Algorithm
//!
//! Per attribute:
//!
//! 1. Resolve the proposals among themselves. Proposals with equal valid
//!    starts are ordered by database start; the latest wins. Over the
//!    winner's span a loser becomes a historical version closed at the
//!    winner's database start; any valid time it covers past the winner is
//!    re-asserted from that instant on and resolved like any other proposal.
//!    Overlapping proposals with equal values are hulled; with different
//!    values they conflict.
//! 2. Match each proposal against the active stored rows it overlaps. Two
//!    matches that overlap each other and disagree are ambiguous.
//! 3. Every stored row that disagrees with an overlapping proposal is closed
//!    at the write's database time (or, under `NoMerge`, the write fails).
//!    The valid time it covered that no disagreeing proposal claims is
//!    re-asserted with the old value as historical versions.
//! 4. Whatever part of a proposal is not already stated by an equal-valued
//!    stored row becomes a new fact. Writing the same value twice therefore
//!    produces nothing.
//!
//! Existence is reconciled by the [`ExistenceTracker`] over all proposals.

use crate::existence::ExistenceTracker;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, VecDeque};
use tempora_core::{
    ConflictKind, EntityId, ExistenceStrategy, Fact, FactRow, MergeError, MergeScript,
    MergeStrategy, Span, VersionClosure,
};
use tracing::trace;

/// Input to [`MergeEngine::merge`]
#[derive(Debug, Clone)]
pub struct MergeRequest<'a> {
    /// Entity being written
    pub entity: EntityId,
    /// Proposed facts
    pub proposed: Vec<Fact>,
    /// Stored rows of the entity; inactive rows and other entities are ignored
    pub current: &'a [FactRow],
    /// Valid instant the caller is writing at, if any
    pub valid_at: Option<DateTime<Utc>>,
    /// Database time of the write
    pub database_at: DateTime<Utc>,
    /// Recorded existence of the entity
    pub existence: Option<Span>,
}

/// Computes merge scripts under a fixed pair of strategies
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeEngine {
    strategy: MergeStrategy,
    existence: ExistenceTracker,
}

impl MergeEngine {
    /// Engine with the given strategies
    pub fn new(strategy: MergeStrategy, existence: ExistenceStrategy) -> Self {
        Self {
            strategy,
            existence: ExistenceTracker::new(existence),
        }
    }

    /// Merge strategy in force
    pub fn strategy(&self) -> MergeStrategy {
        self.strategy
    }

    /// Existence strategy in force
    pub fn existence_strategy(&self) -> ExistenceStrategy {
        self.existence.strategy()
    }

    /// Compute the script that reconciles `request.proposed` with the store
    ///
    /// # Errors
    ///
    /// - `MergeConflict` for divergent values under `NoMerge`, ambiguous
    ///   stored rows, or overlapping proposals that disagree
    /// - `ExistenceViolation` for facts outside existence under `Strict`
    /// - `DatabaseTimeRegression` if a closed version was recorded at or
    ///   after the write's database time
    pub fn merge(&self, request: MergeRequest<'_>) -> Result<MergeScript, MergeError> {
        let MergeRequest {
            entity,
            proposed,
            current,
            valid_at,
            database_at,
            existence,
        } = request;

        let mut script = MergeScript::new(entity, database_at);
        script.valid_at = valid_at;
        script.existence = self
            .existence
            .reconcile(entity, existence.as_ref(), &proposed)?;

        let mut by_attribute: BTreeMap<String, Vec<Fact>> = BTreeMap::new();
        for fact in proposed {
            by_attribute
                .entry(fact.attribute.clone())
                .or_default()
                .push(fact);
        }

        for (attribute, proposals) in by_attribute {
            let (winners, superseded) = resolve_proposals(entity, &attribute, proposals)?;
            script.historical_versions.extend(superseded);

            let mut stored: Vec<&FactRow> = current
                .iter()
                .filter(|row| {
                    row.is_active() && row.fact.entity == entity && row.fact.attribute == attribute
                })
                .collect();
            stored.sort_by_key(|row| row.id);

            self.merge_attribute(entity, &winners, &stored, database_at, &mut script)?;
        }

        trace!(
            target: "tempora::merge",
            entity = %entity,
            close = script.versions_to_close.len(),
            historical = script.historical_versions.len(),
            new = script.new_facts.len(),
            existence = script.existence.is_some(),
            "computed merge script"
        );
        Ok(script)
    }

    fn merge_attribute(
        &self,
        entity: EntityId,
        proposals: &[Fact],
        stored: &[&FactRow],
        database_at: DateTime<Utc>,
        script: &mut MergeScript,
    ) -> Result<(), MergeError> {
        for p in proposals {
            check_ambiguity(entity, p, stored)?;
        }

        for row in stored {
            let current = &row.fact;
            let differing: Vec<&Fact> = proposals
                .iter()
                .filter(|p| p.valid.overlaps(&current.valid) && p.value != current.value)
                .collect();
            let Some(first) = differing.first() else {
                continue;
            };

            if self.strategy == MergeStrategy::NoMerge {
                return Err(MergeError::MergeConflict {
                    entity,
                    attribute: current.attribute.clone(),
                    kind: ConflictKind::Divergent,
                    existing: Some(current.value.clone()),
                    proposed: first.value.clone(),
                });
            }
            if database_at <= current.database.from() {
                return Err(MergeError::DatabaseTimeRegression {
                    entity,
                    database_at,
                    recorded_at: current.database.from(),
                });
            }

            script.versions_to_close.push(VersionClosure {
                fact_id: row.id,
                attribute: current.attribute.clone(),
                database_to: database_at,
            });
            let claimed: Vec<Span> = differing.iter().map(|p| p.valid).collect();
            for piece in subtract_all(current.valid, &claimed) {
                let mut historical = current.with_valid(piece);
                historical.database = Span::continuing(database_at);
                script.historical_versions.push(historical);
            }
        }

        for p in proposals {
            let stated: Vec<Span> = stored
                .iter()
                .filter(|row| row.fact.value == p.value && row.fact.valid.overlaps(&p.valid))
                .map(|row| row.fact.valid)
                .collect();
            script
                .new_facts
                .extend(subtract_all(p.valid, &stated).into_iter().map(|s| p.with_valid(s)));
        }
        Ok(())
    }
}

/// Resolve one attribute's proposals into non-overlapping winners plus the
/// superseded losers of equal-start ties
fn resolve_proposals(
    entity: EntityId,
    attribute: &str,
    mut proposals: Vec<Fact>,
) -> Result<(Vec<Fact>, Vec<Fact>), MergeError> {
    let order = |f: &Fact| (f.valid.from(), f.database.from());
    proposals.sort_by_key(order);

    let mut queue: VecDeque<Fact> = proposals.into();
    let mut superseded = Vec::new();
    let mut heads: Vec<Fact> = Vec::with_capacity(queue.len());
    while let Some(p) = queue.pop_front() {
        let Some(last) = heads.last_mut() else {
            heads.push(p);
            continue;
        };
        if last.valid.from() != p.valid.from() {
            heads.push(p);
            continue;
        }
        // Same valid start: `p` sorts later, so it is at least as recent.
        if last.database.from() == p.database.from() {
            if last.value != p.value {
                return Err(overlapping(entity, attribute, last, &p));
            }
            last.valid = last.valid.hull(&p.valid);
            continue;
        }
        let loser = std::mem::replace(last, p);
        let closed_at = last.database.from();
        for tail in loser.valid.subtract(&last.valid) {
            let mut reasserted = loser.with_valid(tail);
            reasserted.database = Span::continuing(closed_at);
            let at = queue.partition_point(|f| order(f) <= order(&reasserted));
            queue.insert(at, reasserted);
        }
        if let (Some(valid), Ok(database)) = (
            loser.valid.intersect(&last.valid),
            Span::new(loser.database.from(), Some(closed_at)),
        ) {
            superseded.push(Fact {
                valid,
                database,
                ..loser
            });
        }
    }

    let mut winners: Vec<Fact> = Vec::with_capacity(heads.len());
    for p in heads {
        match winners.last_mut() {
            Some(last) if last.valid.overlaps(&p.valid) => {
                if last.value != p.value {
                    return Err(overlapping(entity, attribute, last, &p));
                }
                last.valid = last.valid.hull(&p.valid);
            }
            _ => winners.push(p),
        }
    }
    Ok((winners, superseded))
}

/// Fail if `p` overlaps two stored rows that overlap each other and disagree
fn check_ambiguity(entity: EntityId, p: &Fact, stored: &[&FactRow]) -> Result<(), MergeError> {
    let matches: Vec<&Fact> = stored
        .iter()
        .map(|row| &row.fact)
        .filter(|f| f.valid.overlaps(&p.valid))
        .collect();
    for (i, a) in matches.iter().enumerate() {
        for b in &matches[i + 1..] {
            if a.value != b.value && a.valid.overlaps(&b.valid) {
                return Err(MergeError::MergeConflict {
                    entity,
                    attribute: p.attribute.clone(),
                    kind: ConflictKind::Ambiguous,
                    existing: Some(a.value.clone()),
                    proposed: p.value.clone(),
                });
            }
        }
    }
    Ok(())
}

fn overlapping(entity: EntityId, attribute: &str, a: &Fact, b: &Fact) -> MergeError {
    MergeError::MergeConflict {
        entity,
        attribute: attribute.to_string(),
        kind: ConflictKind::OverlappingProposals,
        existing: Some(a.value.clone()),
        proposed: b.value.clone(),
    }
}

/// Portions of `span` covered by none of `holes`
fn subtract_all(span: Span, holes: &[Span]) -> Vec<Span> {
    holes.iter().fold(vec![span], |pieces, hole| {
        pieces
            .into_iter()
            .flat_map(|piece| piece.subtract(hole))
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;
    use tempora_core::{ExistenceDirective, FactId, Value};

    fn t(day: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap() + Duration::days(day)
    }

    fn span(from: i64, to: Option<i64>) -> Span {
        Span::new(t(from), to.map(t)).unwrap()
    }

    fn fact(entity: EntityId, value: &str, valid: Span, db: i64) -> Fact {
        Fact::new(entity, "name", value, valid, Span::continuing(t(db)))
    }

    fn row(id: u64, fact: Fact) -> FactRow {
        FactRow::new(FactId::new(id), fact)
    }

    fn request(entity: EntityId, proposed: Vec<Fact>, current: &[FactRow], db: i64) -> MergeRequest<'_> {
        MergeRequest {
            entity,
            proposed,
            current,
            valid_at: None,
            database_at: t(db),
            existence: Some(span(-10_000, None)),
        }
    }

    fn engine(strategy: MergeStrategy) -> MergeEngine {
        MergeEngine::new(strategy, ExistenceStrategy::Strict)
    }

    #[test]
    fn test_no_current_rows_yields_new_facts() {
        let entity = EntityId::new();
        let script = engine(MergeStrategy::ExistingFacts)
            .merge(request(entity, vec![fact(entity, "A", span(0, None), 1)], &[], 1))
            .unwrap();
        assert_eq!(script.new_facts.len(), 1);
        assert!(script.versions_to_close.is_empty());
        assert!(script.historical_versions.is_empty());
    }

    #[test]
    fn test_identical_value_is_noop() {
        let entity = EntityId::new();
        let current = [row(1, fact(entity, "A", span(0, None), 0))];
        let script = engine(MergeStrategy::NoMerge)
            .merge(request(entity, vec![fact(entity, "A", span(5, Some(9)), 1)], &current, 1))
            .unwrap();
        assert!(script.is_empty());
    }

    #[test]
    fn test_supersede_splits_history() {
        let entity = EntityId::new();
        let current = [row(7, fact(entity, "A", span(0, None), 0))];
        let script = engine(MergeStrategy::ExistingFacts)
            .merge(request(entity, vec![fact(entity, "B", span(10, Some(20)), 1)], &current, 1))
            .unwrap();

        assert_eq!(script.versions_to_close.len(), 1);
        assert_eq!(script.versions_to_close[0].fact_id, FactId::new(7));
        assert_eq!(script.versions_to_close[0].database_to, t(1));

        let history: Vec<Span> = script.historical_versions.iter().map(|f| f.valid).collect();
        assert_eq!(history, vec![span(0, Some(10)), span(20, None)]);
        assert!(script
            .historical_versions
            .iter()
            .all(|f| f.value == Value::from("A") && f.database == Span::continuing(t(1))));

        assert_eq!(script.new_facts.len(), 1);
        assert_eq!(script.new_facts[0].valid, span(10, Some(20)));
        assert_eq!(script.new_facts[0].value, Value::from("B"));
    }

    #[test]
    fn test_forward_supersede_has_single_history_piece() {
        let entity = EntityId::new();
        let current = [row(1, fact(entity, "A", span(0, None), 0))];
        let script = engine(MergeStrategy::ExistingFacts)
            .merge(request(entity, vec![fact(entity, "B", span(10, None), 1)], &current, 1))
            .unwrap();
        assert_eq!(script.historical_versions.len(), 1);
        assert_eq!(script.historical_versions[0].valid, span(0, Some(10)));
    }

    #[test]
    fn test_no_merge_conflicts() {
        let entity = EntityId::new();
        let current = [row(1, fact(entity, "A", span(0, None), 0))];
        let err = engine(MergeStrategy::NoMerge)
            .merge(request(entity, vec![fact(entity, "B", span(3, None), 1)], &current, 1))
            .unwrap_err();
        assert!(matches!(
            err,
            MergeError::MergeConflict {
                kind: ConflictKind::Divergent,
                ..
            }
        ));
    }

    #[test]
    fn test_disjoint_rows_are_not_ambiguous() {
        let entity = EntityId::new();
        let current = [
            row(1, fact(entity, "A", span(0, Some(10)), 0)),
            row(2, fact(entity, "B", span(10, None), 0)),
        ];
        let script = engine(MergeStrategy::ExistingFacts)
            .merge(request(entity, vec![fact(entity, "C", span(5, Some(15)), 1)], &current, 1))
            .unwrap();
        assert_eq!(script.versions_to_close.len(), 2);
        let history: Vec<Span> = script.historical_versions.iter().map(|f| f.valid).collect();
        assert_eq!(history, vec![span(0, Some(5)), span(15, None)]);
    }

    #[test]
    fn test_overlapping_disagreeing_rows_are_ambiguous() {
        let entity = EntityId::new();
        let current = [
            row(1, fact(entity, "A", span(0, Some(10)), 0)),
            row(2, fact(entity, "B", span(5, None), 0)),
        ];
        let err = engine(MergeStrategy::ExistingFacts)
            .merge(request(entity, vec![fact(entity, "A", span(6, Some(8)), 1)], &current, 1))
            .unwrap_err();
        assert!(matches!(
            err,
            MergeError::MergeConflict {
                kind: ConflictKind::Ambiguous,
                ..
            }
        ));
    }

    #[test]
    fn test_equal_start_tie_break_prefers_later_database() {
        let entity = EntityId::new();
        let older = fact(entity, "A", span(0, None), 1);
        let newer = fact(entity, "B", span(0, None), 2);
        let script = engine(MergeStrategy::ExistingFacts)
            .merge(request(entity, vec![newer, older], &[], 3))
            .unwrap();

        assert_eq!(script.new_facts.len(), 1);
        assert_eq!(script.new_facts[0].value, Value::from("B"));
        assert_eq!(script.historical_versions.len(), 1);
        let loser = &script.historical_versions[0];
        assert_eq!(loser.value, Value::from("A"));
        assert_eq!(loser.database, Span::new(t(1), Some(t(2))).unwrap());
    }

    #[test]
    fn test_equal_start_loser_keeps_its_tail() {
        let entity = EntityId::new();
        let older = fact(entity, "A", span(0, Some(20)), 1);
        let newer = fact(entity, "B", span(0, Some(10)), 2);
        let script = engine(MergeStrategy::ExistingFacts)
            .merge(request(entity, vec![older, newer], &[], 3))
            .unwrap();

        assert_eq!(script.historical_versions.len(), 1);
        let loser = &script.historical_versions[0];
        assert_eq!(loser.value, Value::from("A"));
        assert_eq!(loser.valid, span(0, Some(10)));
        assert_eq!(loser.database, Span::new(t(1), Some(t(2))).unwrap());

        let current: Vec<(Value, Span, Span)> = script
            .new_facts
            .iter()
            .map(|f| (f.value.clone(), f.valid, f.database))
            .collect();
        assert_eq!(
            current,
            vec![
                (Value::from("B"), span(0, Some(10)), Span::continuing(t(2))),
                (Value::from("A"), span(10, Some(20)), Span::continuing(t(2))),
            ]
        );
    }

    #[test]
    fn test_overlapping_proposals() {
        let entity = EntityId::new();
        let same = engine(MergeStrategy::ExistingFacts)
            .merge(request(
                entity,
                vec![
                    fact(entity, "A", span(0, Some(10)), 1),
                    fact(entity, "A", span(5, Some(20)), 1),
                ],
                &[],
                1,
            ))
            .unwrap();
        assert_eq!(same.new_facts.len(), 1);
        assert_eq!(same.new_facts[0].valid, span(0, Some(20)));

        let err = engine(MergeStrategy::ExistingFacts)
            .merge(request(
                entity,
                vec![
                    fact(entity, "A", span(0, Some(10)), 1),
                    fact(entity, "B", span(5, Some(20)), 1),
                ],
                &[],
                1,
            ))
            .unwrap_err();
        assert!(matches!(
            err,
            MergeError::MergeConflict {
                kind: ConflictKind::OverlappingProposals,
                ..
            }
        ));
    }

    #[test]
    fn test_database_time_regression() {
        let entity = EntityId::new();
        let current = [row(1, fact(entity, "A", span(0, None), 5))];
        for db in [4, 5] {
            let err = engine(MergeStrategy::ExistingFacts)
                .merge(request(entity, vec![fact(entity, "B", span(0, None), db)], &current, db))
                .unwrap_err();
            assert!(matches!(err, MergeError::DatabaseTimeRegression { .. }));
        }
    }

    #[test]
    fn test_existence_directive_is_carried() {
        let entity = EntityId::new();
        let merge = MergeEngine::new(MergeStrategy::ExistingFacts, ExistenceStrategy::Extend);
        let script = merge
            .merge(MergeRequest {
                existence: Some(span(0, None)),
                ..request(entity, vec![fact(entity, "A", span(-5, None), 1)], &[], 1)
            })
            .unwrap();
        assert_eq!(script.existence, Some(ExistenceDirective::Widen(span(-5, None))));

        let err = MergeEngine::new(MergeStrategy::ExistingFacts, ExistenceStrategy::Strict)
            .merge(MergeRequest {
                existence: Some(span(0, None)),
                ..request(entity, vec![fact(entity, "A", span(-5, None), 1)], &[], 1)
            })
            .unwrap_err();
        assert!(matches!(err, MergeError::ExistenceViolation { .. }));
    }

    #[test]
    fn test_inactive_and_foreign_rows_ignored() {
        let entity = EntityId::new();
        let mut closed = fact(entity, "A", span(0, None), 0);
        closed.database = Span::new(t(0), Some(t(1))).unwrap();
        let foreign = fact(EntityId::new(), "A", span(0, None), 0);
        let current = [row(1, closed), row(2, foreign)];
        let script = engine(MergeStrategy::NoMerge)
            .merge(request(entity, vec![fact(entity, "B", span(0, None), 2)], &current, 2))
            .unwrap();
        assert_eq!(script.new_facts.len(), 1);
        assert!(script.versions_to_close.is_empty());
    }

    // ------------------------------------------------------------------------
    // Properties
    // ------------------------------------------------------------------------

    /// Apply a script the way a store would
    fn apply(rows: &mut Vec<FactRow>, script: &MergeScript) {
        for closure in &script.versions_to_close {
            let row = rows.iter_mut().find(|r| r.id == closure.fact_id).unwrap();
            row.fact.database = row.fact.database.close_at(closure.database_to).unwrap();
        }
        let mut next = rows.iter().map(|r| r.id.as_u64()).max().unwrap_or(0) + 1;
        for fact in script.historical_versions.iter().chain(&script.new_facts) {
            rows.push(FactRow::new(FactId::new(next), fact.clone()));
            next += 1;
        }
    }

    /// Active rows tiling valid time, built from sorted breakpoints
    fn arb_current(entity: EntityId) -> impl Strategy<Value = Vec<FactRow>> {
        (
            proptest::collection::btree_set(0i64..100, 0..5),
            proptest::collection::vec(0usize..3, 6),
        )
            .prop_map(move |(cuts, values)| {
                let cuts: Vec<i64> = cuts.into_iter().collect();
                let mut rows = Vec::new();
                for (i, from) in cuts.iter().enumerate() {
                    let to = cuts.get(i + 1).copied();
                    let value = ["A", "B", "C"][values[i]];
                    rows.push(row(i as u64 + 1, fact(entity, value, span(*from, to), 0)));
                }
                rows
            })
    }

    fn arb_proposal(entity: EntityId) -> impl Strategy<Value = Fact> {
        (0i64..120, proptest::option::of(1i64..60), 0usize..3).prop_map(move |(from, len, v)| {
            fact(
                entity,
                ["A", "B", "C"][v],
                span(from, len.map(|l| from + l)),
                1,
            )
        })
    }

    fn scenario() -> impl Strategy<Value = (EntityId, Vec<FactRow>, Fact)> {
        let entity = EntityId::from_bytes([7u8; 16]);
        (arb_current(entity), arb_proposal(entity)).prop_map(move |(c, p)| (entity, c, p))
    }

    proptest! {
        #[test]
        fn prop_merge_is_idempotent((entity, mut rows, p) in scenario()) {
            let merge = engine(MergeStrategy::ExistingFacts);
            let first = merge.merge(request(entity, vec![p.clone()], &rows, 1)).unwrap();
            apply(&mut rows, &first);

            let mut again = p;
            again.database = Span::continuing(t(2));
            let second = merge.merge(request(entity, vec![again], &rows, 2)).unwrap();
            prop_assert!(second.is_empty(), "second merge produced {:?}", second);
        }

        #[test]
        fn prop_active_rows_never_overlap((entity, mut rows, p) in scenario()) {
            let merge = engine(MergeStrategy::ExistingFacts);
            let script = merge.merge(request(entity, vec![p], &rows, 1)).unwrap();
            apply(&mut rows, &script);

            let active: Vec<&FactRow> = rows.iter().filter(|r| r.is_active()).collect();
            for (i, a) in active.iter().enumerate() {
                for b in &active[i + 1..] {
                    prop_assert!(
                        !a.fact.valid.overlaps(&b.fact.valid),
                        "{} overlaps {}", a.fact.valid, b.fact.valid
                    );
                }
            }
        }

        #[test]
        fn prop_proposal_wins_over_its_span((entity, mut rows, p) in scenario()) {
            let merge = engine(MergeStrategy::ExistingFacts);
            let script = merge.merge(request(entity, vec![p.clone()], &rows, 1)).unwrap();
            apply(&mut rows, &script);

            let start = p.valid.from();
            let visible: Vec<&FactRow> = rows
                .iter()
                .filter(|r| r.active_at(start, t(1)))
                .collect();
            prop_assert_eq!(visible.len(), 1);
            prop_assert_eq!(&visible[0].fact.value, &p.value);
        }
    }
}
