use std::collections::{BTreeMap, BTreeSet};

use chrono::{Datelike, NaiveDate};
use futures::future::try_join_all;
use tracing::debug;

use crate::model::*;
use crate::session::{SessionKey, SessionValue, TransientStore};

use super::{Engine, EngineError, instrumented};

/// Year and month of today's date, UTC.
pub fn current_month() -> (i32, u32) {
    let today = chrono::Utc::now().date_naive();
    (today.year(), today.month())
}

/// Fold a room's restrictions into per-day counts over `window`.
/// Blocks are presence flags; reservations count distinct reservation ids.
pub(crate) fn snapshot_from(
    room_id: RoomId,
    year: i32,
    month: u32,
    window: &DateRange,
    restrictions: &[RoomRestriction],
) -> CalendarSnapshot {
    let mut snapshot = CalendarSnapshot::empty(room_id, year, month, window);
    let mut per_day: BTreeMap<NaiveDate, BTreeSet<ReservationId>> = BTreeMap::new();

    for restriction in restrictions {
        let start = restriction.range.start.max(window.start);
        let end = restriction.range.end.min(window.end);
        if start >= end {
            continue;
        }
        for day in DateRange::new(start, end).days() {
            match restriction.kind {
                RestrictionKind::OwnerBlock => {
                    snapshot.blocks.insert(day, 1);
                }
                RestrictionKind::Reservation(id) => {
                    per_day.entry(day).or_default().insert(id);
                }
            }
        }
    }
    for (day, ids) in per_day {
        snapshot.reservations.insert(day, ids.len() as u32);
    }
    snapshot
}

impl Engine {
    /// Snapshot of one room's blocks and reservations for a month, read in one store call.
    pub async fn build_snapshot(
        &self,
        room_id: RoomId,
        year: i32,
        month: u32,
    ) -> Result<CalendarSnapshot, EngineError> {
        let window = DateRange::month(year, month)?;
        let restrictions = self.store.restrictions_for_room(room_id, window).await?;
        Ok(snapshot_from(room_id, year, month, &window, &restrictions))
    }

    /// Build a snapshot for every room and store each in the session,
    /// replacing whatever the session held for that room.
    pub async fn load_calendar(
        &self,
        session: &dyn TransientStore,
        year: i32,
        month: u32,
    ) -> Result<Vec<CalendarSnapshot>, EngineError> {
        instrumented("load_calendar", async {
            DateRange::month(year, month)?;
            let rooms = self.store.rooms().await?;
            let snapshots =
                try_join_all(rooms.iter().map(|r| self.build_snapshot(r.id, year, month))).await?;
            for snapshot in &snapshots {
                session.put(
                    SessionKey::Calendar(snapshot.room_id),
                    SessionValue::Calendar(snapshot.clone()),
                );
            }
            debug!(year, month, rooms = snapshots.len(), "calendar loaded");
            Ok(snapshots)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2050, 9, day).unwrap()
    }

    fn restriction(range: DateRange, kind: RestrictionKind) -> RoomRestriction {
        RoomRestriction {
            id: Ulid::new(),
            room_id: 1,
            range,
            kind,
        }
    }

    #[test]
    fn counts_are_dense_and_clipped_to_month() {
        let window = DateRange::month(2050, 9).unwrap();
        let august = NaiveDate::from_ymd_opt(2050, 8, 30).unwrap();
        let restrictions = vec![
            restriction(DateRange::new(august, d(3)), RestrictionKind::Reservation(Ulid::new())),
            restriction(DateRange::day(d(10)), RestrictionKind::OwnerBlock),
        ];
        let snap = snapshot_from(1, 2050, 9, &window, &restrictions);

        assert_eq!(snap.blocks.len(), 30);
        assert_eq!(snap.reservations.len(), 30);
        assert_eq!(snap.reservation_count(d(1)), 1);
        assert_eq!(snap.reservation_count(d(2)), 1);
        assert_eq!(snap.reservation_count(d(3)), 0);
        assert_eq!(snap.blocked_days().collect::<Vec<_>>(), vec![d(10)]);
        assert!(!snap.contains_day(august));
    }

    #[test]
    fn reservation_counted_once_per_day() {
        let window = DateRange::month(2050, 9).unwrap();
        let id = Ulid::new();
        let restrictions = vec![
            restriction(DateRange::new(d(5), d(7)), RestrictionKind::Reservation(id)),
            restriction(DateRange::new(d(6), d(8)), RestrictionKind::Reservation(id)),
        ];
        let snap = snapshot_from(1, 2050, 9, &window, &restrictions);
        assert_eq!(snap.reservation_count(d(6)), 1);
        assert_eq!(snap.reservation_count(d(7)), 1);
    }
}
