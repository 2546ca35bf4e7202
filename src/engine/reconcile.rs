use std::collections::BTreeSet;

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::limits::MAX_BLOCK_KEYS;
use crate::model::*;
use crate::observability;
use crate::session::{SessionKey, SessionValue, TransientStore};
use crate::store::StoreError;

use super::conflict::covering;
use super::{Engine, EngineError, instrumented};

/// The days an administrator wants blocked, as submitted from a month view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarSubmission {
    pub year: i32,
    pub month: u32,
    pub desired: BTreeSet<(RoomId, NaiveDate)>,
}

impl CalendarSubmission {
    pub fn new(year: i32, month: u32) -> Self {
        Self {
            year,
            month,
            desired: BTreeSet::new(),
        }
    }

    pub fn block(&mut self, room_id: RoomId, day: NaiveDate) {
        self.desired.insert((room_id, day));
    }

    pub fn desired_for(&self, room_id: RoomId) -> BTreeSet<NaiveDate> {
        self.desired
            .range((room_id, NaiveDate::MIN)..=(room_id, NaiveDate::MAX))
            .map(|(_, day)| *day)
            .collect()
    }
}

/// Outcome of reconciling one room's month.
#[derive(Debug)]
pub struct ReconcileReport {
    pub room_id: RoomId,
    /// Days that got a new owner block.
    pub added: Vec<NaiveDate>,
    /// Days whose owner block was deleted.
    pub removed: Vec<NaiveDate>,
    /// Days left as they were, with the reason.
    pub failures: Vec<(NaiveDate, EngineError)>,
    /// Snapshot rebuilt from the store after all writes.
    pub snapshot: CalendarSnapshot,
}

impl ReconcileReport {
    pub fn writes(&self) -> usize {
        self.added.len() + self.removed.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

enum DayAction {
    Block,
    Unblock,
}

impl DayAction {
    fn label(&self) -> &'static str {
        match self {
            DayAction::Block => "block",
            DayAction::Unblock => "unblock",
        }
    }
}

impl Engine {
    /// Bring one room's owner blocks for the month in line with `desired`.
    ///
    /// Only days whose state differs from the session's previous snapshot are
    /// written, one store call per day. A failing day is recorded in the report
    /// and the rest of the batch continues. The rebuilt snapshot replaces the
    /// session's copy.
    pub async fn reconcile_room(
        &self,
        session: &dyn TransientStore,
        room_id: RoomId,
        year: i32,
        month: u32,
        desired: &BTreeSet<NaiveDate>,
    ) -> Result<ReconcileReport, EngineError> {
        instrumented("reconcile_room", async {
            let window = DateRange::month(year, month)?;
            let previous = match session.get(&SessionKey::Calendar(room_id)) {
                Some(SessionValue::Calendar(snapshot))
                    if snapshot.year == year && snapshot.month == month =>
                {
                    snapshot
                }
                _ => {
                    warn!(room_id, year, month, "no calendar snapshot in session, using current state");
                    self.build_snapshot(room_id, year, month).await?
                }
            };

            let (in_month, outside): (BTreeSet<NaiveDate>, BTreeSet<NaiveDate>) =
                desired.iter().partition(|day| window.contains_day(**day));
            if !outside.is_empty() {
                debug!(room_id, ignored = outside.len(), "block keys outside the month ignored");
            }

            let to_unblock: Vec<NaiveDate> = previous
                .blocked_days()
                .filter(|day| !in_month.contains(day))
                .collect();
            let to_block: Vec<NaiveDate> = in_month
                .iter()
                .copied()
                .filter(|day| !previous.is_blocked(*day))
                .collect();

            let mut added = Vec::new();
            let mut removed = Vec::new();
            let mut failures = Vec::new();

            if !to_unblock.is_empty() || !to_block.is_empty() {
                let current = self.store.restrictions_for_room(room_id, window).await?;

                for day in to_unblock {
                    match self.unblock_day(room_id, day, &current).await {
                        Ok(()) => removed.push(day),
                        Err(e) => failures.push((day, e)),
                    }
                }
                for day in to_block {
                    match self.block_day(room_id, day, &current).await {
                        Ok(true) => added.push(day),
                        Ok(false) => {}
                        Err(e) => failures.push((day, e)),
                    }
                }
            }

            for (day, e) in &failures {
                warn!(room_id, %day, error = %e, "calendar change refused");
                metrics::counter!(observability::CALENDAR_FAILURES_TOTAL, "reason" => e.label())
                    .increment(1);
            }
            record_changes(DayAction::Block, added.len());
            record_changes(DayAction::Unblock, removed.len());

            let snapshot = self.build_snapshot(room_id, year, month).await?;
            session.put(
                SessionKey::Calendar(room_id),
                SessionValue::Calendar(snapshot.clone()),
            );

            if !added.is_empty() || !removed.is_empty() {
                info!(
                    room_id,
                    year,
                    month,
                    added = added.len(),
                    removed = removed.len(),
                    failed = failures.len(),
                    "calendar reconciled"
                );
            }
            Ok(ReconcileReport {
                room_id,
                added,
                removed,
                failures,
                snapshot,
            })
        })
        .await
    }

    /// Reconcile every room, ascending by id, against one month's submission.
    pub async fn reconcile_month(
        &self,
        session: &dyn TransientStore,
        submission: &CalendarSubmission,
    ) -> Result<Vec<ReconcileReport>, EngineError> {
        if submission.desired.len() > MAX_BLOCK_KEYS {
            return Err(EngineError::LimitExceeded("too many block keys"));
        }
        DateRange::month(submission.year, submission.month)?;
        let rooms = self.store.rooms().await?;
        let unknown = submission
            .desired
            .iter()
            .filter(|(room_id, _)| !rooms.iter().any(|r| r.id == *room_id))
            .count();
        if unknown > 0 {
            debug!(unknown, "block keys for unknown rooms ignored");
        }

        let mut reports = Vec::with_capacity(rooms.len());
        for room in &rooms {
            let desired = submission.desired_for(room.id);
            let report = self
                .reconcile_room(session, room.id, submission.year, submission.month, &desired)
                .await?;
            reports.push(report);
        }
        Ok(reports)
    }

    async fn unblock_day(
        &self,
        room_id: RoomId,
        day: NaiveDate,
        current: &[RoomRestriction],
    ) -> Result<(), EngineError> {
        let conflict = |reason: &'static str| EngineError::MutationConflict {
            room_id,
            day,
            reason,
        };
        if covering(current, day, false).is_some() {
            return Err(conflict("a reservation covers the day"));
        }
        let Some(block) = covering(current, day, true) else {
            return Err(conflict("no owner block covers the day"));
        };
        if block.range != DateRange::day(day) {
            return Err(conflict("the owner block spans several days"));
        }
        match self.store.delete_room_restriction(block.id).await {
            Ok(()) => Ok(()),
            Err(StoreError::NotFound(_)) => Err(conflict("no owner block covers the day")),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns false when an owner block already covers the day.
    async fn block_day(
        &self,
        room_id: RoomId,
        day: NaiveDate,
        current: &[RoomRestriction],
    ) -> Result<bool, EngineError> {
        if covering(current, day, false).is_some() {
            return Err(EngineError::DayOccupied { room_id, day });
        }
        if covering(current, day, true).is_some() {
            debug!(room_id, %day, "day already blocked");
            return Ok(false);
        }
        match self
            .store
            .insert_room_restriction(room_id, DateRange::day(day), RestrictionKind::OwnerBlock)
            .await
        {
            Ok(_) => Ok(true),
            Err(StoreError::Conflict { .. }) => Err(EngineError::DayOccupied { room_id, day }),
            Err(e) => Err(e.into()),
        }
    }
}

fn record_changes(action: DayAction, count: usize) {
    if count > 0 {
        metrics::counter!(observability::CALENDAR_CHANGES_TOTAL, "action" => action.label())
            .increment(count as u64);
    }
}
