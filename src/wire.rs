//! Boundary adapter: form submissions in, availability JSON and calendar text out.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::engine::{CalendarSubmission, Engine, EngineError};
use crate::limits::MAX_BLOCK_KEYS;
use crate::model::*;

pub const MSG_AVAILABLE: &str = "Available!";
pub const MSG_NOT_AVAILABLE: &str = "Not available";
pub const MSG_STORE_ERROR: &str = "Error connecting to database";
pub const MSG_INTERNAL_ERROR: &str = "Internal server error";

const ADD_BLOCK_PREFIX: &str = "add_block_";
const REMOVE_BLOCK_PREFIX: &str = "remove_block_";

/// Answer to a single-room availability check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityResponse {
    pub ok: bool,
    pub message: String,
    pub room_id: String,
    pub start_date: String,
    pub end_date: String,
}

impl AvailabilityResponse {
    fn new(ok: bool, message: &str, room_id: &str, start: &str, end: &str) -> Self {
        Self {
            ok,
            message: message.to_string(),
            room_id: room_id.to_string(),
            start_date: start.to_string(),
            end_date: end.to_string(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// First value submitted under `key`.
pub fn form_value<'a>(form: &'a [(String, String)], key: &str) -> Option<&'a str> {
    form.iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// Check one room for the `start`/`end` (`dd-mm-yyyy`) and `room_id` fields of a form.
///
/// Never fails: a request that cannot be parsed and a store that cannot be
/// reached both come back as `ok: false` with their own message.
pub async fn availability_json(engine: &Engine, form: &[(String, String)]) -> AvailabilityResponse {
    let start = form_value(form, "start").unwrap_or_default();
    let end = form_value(form, "end").unwrap_or_default();
    let room = form_value(form, "room_id").unwrap_or_default();
    let internal = || AvailabilityResponse::new(false, MSG_INTERNAL_ERROR, room, start, end);

    let range = match DateRange::parse(start, end, DAY_MONTH_YEAR) {
        Ok(range) => range,
        Err(e) => {
            debug!(error = %e, "unparseable availability request");
            return internal();
        }
    };
    let Ok(room_id) = room.trim().parse::<RoomId>() else {
        debug!(room, "unparseable room id");
        return internal();
    };

    match engine.is_room_available(room_id, &range).await {
        Ok(true) => AvailabilityResponse::new(true, MSG_AVAILABLE, room, start, end),
        Ok(false) | Err(EngineError::NotFound(_)) => {
            AvailabilityResponse::new(false, MSG_NOT_AVAILABLE, room, start, end)
        }
        Err(e @ (EngineError::StoreUnavailable(_) | EngineError::PersistFailure(_))) => {
            error!(error = %e, "availability check failed");
            AvailabilityResponse::new(false, MSG_STORE_ERROR, room, start, end)
        }
        Err(e) => {
            debug!(error = %e, "availability request rejected");
            internal()
        }
    }
}

/// Form key that marks `day` as blocked for `room_id`, e.g. `add_block_1_2050-09-2`.
pub fn block_key(room_id: RoomId, day: chrono::NaiveDate) -> String {
    format!("{ADD_BLOCK_PREFIX}{room_id}_{}", day.format("%Y-%m-%-d"))
}

/// Parse a month-view submission.
///
/// `add_block_*` and `remove_block_*` keys both name a day that should end up
/// blocked; a previously blocked day with no key is to be unblocked. A
/// malformed key rejects the whole submission, since dropping it would read as
/// an unblock.
pub fn parse_calendar_form(form: &[(String, String)]) -> Result<CalendarSubmission, EngineError> {
    let year_text = form_value(form, "year").unwrap_or_default();
    let month_text = form_value(form, "month").unwrap_or_default();
    let year = year_text
        .trim()
        .parse::<i32>()
        .map_err(|_| EngineError::InvalidDateFormat(year_text.to_string()))?;
    let month = month_text
        .trim()
        .parse::<u32>()
        .map_err(|_| EngineError::InvalidDateFormat(month_text.to_string()))?;
    DateRange::month(year, month)?;

    let mut submission = CalendarSubmission::new(year, month);
    for (key, _) in form {
        let Some(rest) = key
            .strip_prefix(ADD_BLOCK_PREFIX)
            .or_else(|| key.strip_prefix(REMOVE_BLOCK_PREFIX))
        else {
            continue;
        };
        let malformed = || EngineError::InvalidDateFormat(key.clone());
        let (room, date) = rest.split_once('_').ok_or_else(malformed)?;
        let room_id = room.parse::<RoomId>().map_err(|_| malformed())?;
        let day = parse_date(date, ISO_DATE).map_err(|_| malformed())?;
        submission.block(room_id, day);
        if submission.desired.len() > MAX_BLOCK_KEYS {
            return Err(EngineError::LimitExceeded("too many block keys"));
        }
    }
    Ok(submission)
}

/// One line per day: day number, `B` if blocked, `R` if reserved.
pub fn render_snapshot(room: &Room, snapshot: &CalendarSnapshot) -> String {
    let mut out = format!(
        "{} (room {}) {}-{:02}\n",
        room.name, room.id, snapshot.year, snapshot.month
    );
    for day in snapshot.days() {
        let block = if snapshot.is_blocked(day) { "B" } else { "." };
        let reserved = if snapshot.reservation_count(day) > 0 { "R" } else { "." };
        let _ = writeln!(out, "  {} {block}{reserved}", day.format("%a %e"));
    }
    out
}
