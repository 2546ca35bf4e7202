use chrono::NaiveDate;

use crate::model::{DateRange, RoomId};
use crate::store::StoreError;

#[derive(Debug)]
pub enum EngineError {
    InvalidDateFormat(String),
    InvalidRange {
        start: NaiveDate,
        end: NaiveDate,
    },
    InvalidReservation(String),
    RoomUnavailable {
        room_id: RoomId,
        range: DateRange,
    },
    DayOccupied {
        room_id: RoomId,
        day: NaiveDate,
    },
    MutationConflict {
        room_id: RoomId,
        day: NaiveDate,
        reason: &'static str,
    },
    StoreUnavailable(String),
    PersistFailure(String),
    NotFound(String),
    /// The session holds no reservation in progress.
    NoDraft,
    LimitExceeded(&'static str),
}

impl EngineError {
    /// Short label for metrics and log fields.
    pub fn label(&self) -> &'static str {
        match self {
            EngineError::InvalidDateFormat(_) => "invalid_date_format",
            EngineError::InvalidRange { .. } => "invalid_range",
            EngineError::InvalidReservation(_) => "invalid_reservation",
            EngineError::RoomUnavailable { .. } => "room_unavailable",
            EngineError::DayOccupied { .. } => "day_occupied",
            EngineError::MutationConflict { .. } => "mutation_conflict",
            EngineError::StoreUnavailable(_) => "store_unavailable",
            EngineError::PersistFailure(_) => "persist_failure",
            EngineError::NotFound(_) => "not_found",
            EngineError::NoDraft => "no_draft",
            EngineError::LimitExceeded(_) => "limit_exceeded",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidDateFormat(text) => write!(f, "invalid date: {text:?}"),
            EngineError::InvalidRange { start, end } => {
                write!(f, "invalid range: end {end} is not after start {start}")
            }
            EngineError::InvalidReservation(msg) => write!(f, "invalid reservation: {msg}"),
            EngineError::RoomUnavailable { room_id, range } => {
                write!(f, "room {room_id} is not available for {range}")
            }
            EngineError::DayOccupied { room_id, day } => {
                write!(f, "room {room_id} has a reservation on {day}")
            }
            EngineError::MutationConflict {
                room_id,
                day,
                reason,
            } => write!(f, "cannot unblock room {room_id} on {day}: {reason}"),
            EngineError::StoreUnavailable(e) => write!(f, "store unavailable: {e}"),
            EngineError::PersistFailure(e) => write!(f, "persist failure: {e}"),
            EngineError::NotFound(what) => write!(f, "not found: {what}"),
            EngineError::NoDraft => write!(f, "no reservation in progress"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable(msg) => EngineError::StoreUnavailable(msg),
            StoreError::NotFound(what) => EngineError::NotFound(what),
            StoreError::Wal(msg) => EngineError::PersistFailure(msg),
            StoreError::LimitExceeded(msg) => EngineError::LimitExceeded(msg),
            StoreError::Conflict { room_id, range, .. } => {
                EngineError::RoomUnavailable { room_id, range }
            }
        }
    }
}
