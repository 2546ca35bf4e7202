use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use ulid::Ulid;
use validator::Validate;

use crate::engine::EngineError;
use crate::limits::{MAX_YEAR, MIN_YEAR};

/// Unix milliseconds.
pub type Ms = i64;

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

pub type RoomId = u32;
pub type ReservationId = Ulid;
pub type RestrictionId = Ulid;

/// Layout used by guest-facing forms, e.g. `01-01-2050`.
pub const DAY_MONTH_YEAR: &str = "%d-%m-%Y";
pub const ISO_DATE: &str = "%Y-%m-%d";

/// Half-open date interval `[start, end)`.
///
/// A stay from X to Y occupies the nights X..Y-1, so two stays that only
/// touch at a boundary day do not overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start < end, "DateRange start must be before end");
        Self { start, end }
    }

    /// Checked constructor for ranges coming from outside the engine.
    pub fn try_new(start: NaiveDate, end: NaiveDate) -> Result<Self, EngineError> {
        if end <= start {
            return Err(EngineError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn parse(start: &str, end: &str, layout: &str) -> Result<Self, EngineError> {
        let start = parse_date(start, layout)?;
        let end = parse_date(end, layout)?;
        Self::try_new(start, end)
    }

    /// The single night starting on `date`.
    pub fn day(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date.succ_opt().unwrap_or(NaiveDate::MAX),
        }
    }

    /// Every day of a calendar month: first of the month up to the first of the next.
    pub fn month(year: i32, month: u32) -> Result<Self, EngineError> {
        if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
            return Err(EngineError::InvalidDateFormat(format!("year {year}")));
        }
        let start = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| EngineError::InvalidDateFormat(format!("{year}-{month}")))?;
        let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
        let end = NaiveDate::from_ymd_opt(next_year, next_month, 1)
            .ok_or_else(|| EngineError::InvalidDateFormat(format!("{next_year}-{next_month}")))?;
        Ok(Self::new(start, end))
    }

    pub fn nights(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_day(&self, date: NaiveDate) -> bool {
        self.start <= date && date < self.end
    }

    /// Each night in the range, in order.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + use<> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d < end)
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Half-open intersection test; symmetric in its arguments.
pub fn overlaps(a: &DateRange, b: &DateRange) -> bool {
    a.overlaps(b)
}

pub fn parse_date(text: &str, layout: &str) -> Result<NaiveDate, EngineError> {
    let date = NaiveDate::parse_from_str(text.trim(), layout)
        .map_err(|_| EngineError::InvalidDateFormat(text.to_string()))?;
    if !(MIN_YEAR..=MAX_YEAR).contains(&date.year()) {
        return Err(EngineError::InvalidDateFormat(text.to_string()));
    }
    Ok(date)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
}

/// Why a room is taken out of availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestrictionKind {
    /// Occupied by a guest reservation.
    Reservation(ReservationId),
    /// Closed by the owner; no guest attached.
    OwnerBlock,
}

impl RestrictionKind {
    pub fn is_owner_block(&self) -> bool {
        matches!(self, RestrictionKind::OwnerBlock)
    }

    pub fn reservation_id(&self) -> Option<ReservationId> {
        match self {
            RestrictionKind::Reservation(id) => Some(*id),
            RestrictionKind::OwnerBlock => None,
        }
    }
}

/// A committed occupancy record for one room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRestriction {
    pub id: RestrictionId,
    pub room_id: RoomId,
    pub range: DateRange,
    pub kind: RestrictionKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct GuestDetails {
    #[validate(length(min = 3, max = 255, message = "first name must be at least 3 characters"))]
    pub first_name: String,
    #[validate(length(min = 1, max = 255, message = "last name is required"))]
    pub last_name: String,
    #[validate(email(message = "invalid email address"), length(max = 255))]
    pub email: String,
    #[validate(length(min = 7, max = 20, message = "phone must be 7 to 20 characters"))]
    pub phone: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationStatus {
    /// Persisted, not yet looked at by an administrator.
    New,
    Processed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub room_id: RoomId,
    pub range: DateRange,
    pub guest: GuestDetails,
    pub status: ReservationStatus,
    pub created_at: Ms,
}

/// Which reservations an admin listing shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationFilter {
    All,
    /// Only reservations still waiting to be processed.
    New,
}

impl ReservationFilter {
    pub fn matches(&self, reservation: &Reservation) -> bool {
        match self {
            ReservationFilter::All => true,
            ReservationFilter::New => reservation.status == ReservationStatus::New,
        }
    }
}

/// In-progress reservation, held only in the guest's session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationDraft {
    pub range: DateRange,
    pub room_id: Option<RoomId>,
    pub guest: Option<GuestDetails>,
}

impl ReservationDraft {
    pub fn new(range: DateRange) -> Self {
        Self {
            range,
            room_id: None,
            guest: None,
        }
    }
}

/// What the guest sees after a successful commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationSummary {
    pub reservation: Reservation,
    pub room: Room,
}

/// Per-day block and reservation counts for one room over one month.
///
/// Dense: every day of the month has an entry in both maps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarSnapshot {
    pub room_id: RoomId,
    pub year: i32,
    pub month: u32,
    pub blocks: BTreeMap<NaiveDate, u32>,
    pub reservations: BTreeMap<NaiveDate, u32>,
}

impl CalendarSnapshot {
    /// All-zero snapshot covering every day of `window`.
    pub fn empty(room_id: RoomId, year: i32, month: u32, window: &DateRange) -> Self {
        let blocks: BTreeMap<NaiveDate, u32> = window.days().map(|d| (d, 0)).collect();
        let reservations = blocks.clone();
        Self {
            room_id,
            year,
            month,
            blocks,
            reservations,
        }
    }

    pub fn block_count(&self, day: NaiveDate) -> u32 {
        self.blocks.get(&day).copied().unwrap_or(0)
    }

    pub fn reservation_count(&self, day: NaiveDate) -> u32 {
        self.reservations.get(&day).copied().unwrap_or(0)
    }

    pub fn is_blocked(&self, day: NaiveDate) -> bool {
        self.block_count(day) > 0
    }

    pub fn contains_day(&self, day: NaiveDate) -> bool {
        self.blocks.contains_key(&day)
    }

    pub fn blocked_days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.blocks
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(day, _)| *day)
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.blocks.keys().copied()
    }
}

/// A room and every restriction on it, sorted by `range.start`.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    pub restrictions: Vec<RoomRestriction>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            restrictions: Vec::new(),
        }
    }

    /// Insert restriction maintaining sort order by range.start.
    pub fn insert_restriction(&mut self, restriction: RoomRestriction) {
        let pos = self
            .restrictions
            .binary_search_by_key(&restriction.range.start, |r| r.range.start)
            .unwrap_or_else(|e| e);
        self.restrictions.insert(pos, restriction);
    }

    pub fn remove_restriction(&mut self, id: RestrictionId) -> Option<RoomRestriction> {
        let pos = self.restrictions.iter().position(|r| r.id == id)?;
        Some(self.restrictions.remove(pos))
    }

    /// Drop every restriction that belongs to `reservation_id`.
    pub fn remove_reservation(&mut self, reservation_id: ReservationId) -> Vec<RoomRestriction> {
        let mut removed = Vec::new();
        self.restrictions.retain(|r| {
            if r.kind.reservation_id() == Some(reservation_id) {
                removed.push(r.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Restrictions whose range overlaps the query window.
    /// Uses binary search to skip restrictions starting at or after `query.end`.
    pub fn overlapping(&self, query: &DateRange) -> impl Iterator<Item = &RoomRestriction> {
        let right_bound = self
            .restrictions
            .partition_point(|r| r.range.start < query.end);
        let query_start = query.start;
        self.restrictions[..right_bound]
            .iter()
            .filter(move |r| r.range.end > query_start)
    }
}

/// WAL record format. Flat, one variant per store mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        id: RoomId,
        name: String,
    },
    ReservationInserted {
        id: ReservationId,
        room_id: RoomId,
        range: DateRange,
        guest: GuestDetails,
        created_at: Ms,
    },
    /// A reservation row together with the restriction that holds its nights.
    ReservationCommitted {
        id: ReservationId,
        restriction_id: RestrictionId,
        room_id: RoomId,
        range: DateRange,
        guest: GuestDetails,
        created_at: Ms,
    },
    GuestUpdated {
        id: ReservationId,
        guest: GuestDetails,
    },
    ReservationProcessed {
        id: ReservationId,
    },
    /// Removes the reservation row and every restriction it owns.
    ReservationDeleted {
        id: ReservationId,
        room_id: RoomId,
    },
    RestrictionAdded {
        id: RestrictionId,
        room_id: RoomId,
        range: DateRange,
        kind: RestrictionKind,
    },
    RestrictionRemoved {
        id: RestrictionId,
        room_id: RoomId,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn range(a: NaiveDate, b: NaiveDate) -> DateRange {
        DateRange::new(a, b)
    }

    fn restriction(start: NaiveDate, end: NaiveDate, kind: RestrictionKind) -> RoomRestriction {
        RoomRestriction {
            id: Ulid::new(),
            room_id: 1,
            range: range(start, end),
            kind,
        }
    }

    fn room_state() -> RoomState {
        RoomState::new(Room {
            id: 1,
            name: "General's Quarters".into(),
        })
    }

    #[test]
    fn range_basics() {
        let r = range(d(2050, 1, 1), d(2050, 1, 4));
        assert_eq!(r.nights(), 3);
        assert!(r.contains_day(d(2050, 1, 1)));
        assert!(r.contains_day(d(2050, 1, 3)));
        assert!(!r.contains_day(d(2050, 1, 4))); // half-open
        assert_eq!(r.days().count(), 3);
    }

    #[test]
    fn range_overlap() {
        let a = range(d(2050, 1, 1), d(2050, 1, 5));
        let b = range(d(2050, 1, 3), d(2050, 1, 8));
        let c = range(d(2050, 1, 5), d(2050, 1, 9));
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    #[test]
    fn overlap_is_symmetric_and_reflexive() {
        let base = d(2050, 1, 1);
        let mut ranges = Vec::new();
        for start in 0..6u64 {
            for len in 1..4u64 {
                let s = base + chrono::Days::new(start);
                ranges.push(range(s, s + chrono::Days::new(len)));
            }
        }
        for a in &ranges {
            assert!(overlaps(a, a));
            for b in &ranges {
                assert_eq!(overlaps(a, b), overlaps(b, a), "{a} vs {b}");
            }
        }
    }

    #[test]
    fn touching_boundary_does_not_overlap() {
        let booked = range(d(2050, 1, 1), d(2050, 1, 2));
        assert!(booked.overlaps(&range(d(2050, 1, 1), d(2050, 1, 2))));
        assert!(!booked.overlaps(&range(d(2050, 1, 2), d(2050, 1, 3))));
    }

    #[test]
    fn parse_day_month_year() {
        let r = DateRange::parse("01-01-2050", "02-01-2050", DAY_MONTH_YEAR).unwrap();
        assert_eq!(r, range(d(2050, 1, 1), d(2050, 1, 2)));
    }

    #[test]
    fn parse_invalid_text() {
        let err = parse_date("invalid", DAY_MONTH_YEAR).unwrap_err();
        assert!(matches!(err, EngineError::InvalidDateFormat(_)));

        let err = DateRange::parse("01-01-2050", "invalid", DAY_MONTH_YEAR).unwrap_err();
        assert!(matches!(err, EngineError::InvalidDateFormat(_)));
    }

    #[test]
    fn parse_wrong_layout() {
        let err = parse_date("2050-01-01", DAY_MONTH_YEAR).unwrap_err();
        assert!(matches!(err, EngineError::InvalidDateFormat(_)));
        assert_eq!(parse_date("2050-01-01", ISO_DATE).unwrap(), d(2050, 1, 1));
    }

    #[test]
    fn parse_end_not_after_start() {
        let err = DateRange::parse("01-01-2050", "01-01-2050", DAY_MONTH_YEAR).unwrap_err();
        assert!(matches!(err, EngineError::InvalidRange { .. }));

        let err = DateRange::parse("02-01-2050", "01-01-2050", DAY_MONTH_YEAR).unwrap_err();
        assert!(matches!(err, EngineError::InvalidRange { .. }));
    }

    #[test]
    fn parse_rejects_out_of_range_year() {
        let err = parse_date("01-01-1900", DAY_MONTH_YEAR).unwrap_err();
        assert!(matches!(err, EngineError::InvalidDateFormat(_)));
    }

    #[test]
    fn month_windows() {
        let feb = DateRange::month(2052, 2).unwrap();
        assert_eq!(feb, range(d(2052, 2, 1), d(2052, 3, 1)));
        assert_eq!(feb.nights(), 29); // leap year

        let dec = DateRange::month(2050, 12).unwrap();
        assert_eq!(dec.end, d(2051, 1, 1));

        assert!(matches!(
            DateRange::month(2050, 13),
            Err(EngineError::InvalidDateFormat(_))
        ));
        assert!(matches!(
            DateRange::month(1969, 1),
            Err(EngineError::InvalidDateFormat(_))
        ));
    }

    #[test]
    fn single_day_range() {
        let r = DateRange::day(d(2050, 9, 2));
        assert_eq!(r.nights(), 1);
        assert_eq!(r.end, d(2050, 9, 3));
    }

    #[test]
    fn restriction_ordering() {
        let mut rs = room_state();
        rs.insert_restriction(restriction(d(2050, 1, 20), d(2050, 1, 21), RestrictionKind::OwnerBlock));
        rs.insert_restriction(restriction(
            d(2050, 1, 1),
            d(2050, 1, 3),
            RestrictionKind::Reservation(Ulid::new()),
        ));
        rs.insert_restriction(restriction(d(2050, 1, 10), d(2050, 1, 11), RestrictionKind::OwnerBlock));
        assert_eq!(rs.restrictions[0].range.start, d(2050, 1, 1));
        assert_eq!(rs.restrictions[1].range.start, d(2050, 1, 10));
        assert_eq!(rs.restrictions[2].range.start, d(2050, 1, 20));
    }

    #[test]
    fn remove_restriction_by_id() {
        let mut rs = room_state();
        let r = restriction(d(2050, 1, 1), d(2050, 1, 2), RestrictionKind::OwnerBlock);
        let id = r.id;
        rs.insert_restriction(r);
        assert!(rs.remove_restriction(Ulid::new()).is_none());
        assert_eq!(rs.restrictions.len(), 1);
        assert!(rs.remove_restriction(id).is_some());
        assert!(rs.restrictions.is_empty());
    }

    #[test]
    fn remove_reservation_drops_only_its_restrictions() {
        let mut rs = room_state();
        let res_id = Ulid::new();
        rs.insert_restriction(restriction(d(2050, 1, 1), d(2050, 1, 3), RestrictionKind::Reservation(res_id)));
        rs.insert_restriction(restriction(d(2050, 1, 5), d(2050, 1, 6), RestrictionKind::OwnerBlock));
        let removed = rs.remove_reservation(res_id);
        assert_eq!(removed.len(), 1);
        assert_eq!(rs.restrictions.len(), 1);
        assert!(rs.restrictions[0].kind.is_owner_block());
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut rs = room_state();
        rs.insert_restriction(restriction(d(2050, 1, 1), d(2050, 1, 3), RestrictionKind::OwnerBlock));
        rs.insert_restriction(restriction(
            d(2050, 1, 9),
            d(2050, 1, 12),
            RestrictionKind::Reservation(Ulid::new()),
        ));
        rs.insert_restriction(restriction(d(2050, 2, 1), d(2050, 2, 2), RestrictionKind::OwnerBlock));

        let query = range(d(2050, 1, 10), d(2050, 1, 20));
        let hits: Vec<_> = rs.overlapping(&query).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].range.start, d(2050, 1, 9));
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        let mut rs = room_state();
        rs.insert_restriction(restriction(d(2050, 1, 1), d(2050, 1, 2), RestrictionKind::OwnerBlock));
        let query = range(d(2050, 1, 2), d(2050, 1, 3));
        assert_eq!(rs.overlapping(&query).count(), 0);
    }

    #[test]
    fn overlapping_long_restriction_spanning_query() {
        let mut rs = room_state();
        rs.insert_restriction(restriction(
            d(2049, 12, 1),
            d(2050, 3, 1),
            RestrictionKind::Reservation(Ulid::new()),
        ));
        let query = range(d(2050, 1, 10), d(2050, 1, 11));
        assert_eq!(rs.overlapping(&query).count(), 1);
    }

    #[test]
    fn snapshot_defaults_and_counts() {
        let window = DateRange::month(2050, 9).unwrap();
        let mut snap = CalendarSnapshot::empty(1, 2050, 9, &window);
        assert_eq!(snap.blocks.len(), 30);
        assert_eq!(snap.reservations.len(), 30);
        assert!(!snap.is_blocked(d(2050, 9, 2)));

        snap.blocks.insert(d(2050, 9, 2), 1);
        assert!(snap.is_blocked(d(2050, 9, 2)));
        assert_eq!(snap.blocked_days().collect::<Vec<_>>(), vec![d(2050, 9, 2)]);
        assert!(!snap.contains_day(d(2050, 10, 1)));
        assert_eq!(snap.block_count(d(2050, 10, 1)), 0);
    }

    #[test]
    fn guest_details_validation() {
        let ok = GuestDetails {
            first_name: "John".into(),
            last_name: "Smith".into(),
            email: "john@smith.com".into(),
            phone: "123456789".into(),
        };
        assert!(ok.validate().is_ok());

        let short_name = GuestDetails {
            first_name: "J".into(),
            ..ok.clone()
        };
        assert!(short_name.validate().is_err());

        let bad_email = GuestDetails {
            email: "not-an-email".into(),
            ..ok.clone()
        };
        assert!(bad_email.validate().is_err());

        let short_phone = GuestDetails {
            phone: "12".into(),
            ..ok
        };
        assert!(short_phone.validate().is_err());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::RestrictionAdded {
            id: Ulid::new(),
            room_id: 1,
            range: range(d(2050, 1, 1), d(2050, 1, 2)),
            kind: RestrictionKind::OwnerBlock,
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
