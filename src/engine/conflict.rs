use validator::Validate;

use crate::limits::MAX_STAY_NIGHTS;
use crate::model::*;

use super::EngineError;

pub(crate) fn validate_range(range: &DateRange) -> Result<(), EngineError> {
    if range.end <= range.start {
        return Err(EngineError::InvalidRange {
            start: range.start,
            end: range.end,
        });
    }
    if range.nights() > MAX_STAY_NIGHTS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    Ok(())
}

pub(crate) fn validate_guest(guest: &GuestDetails) -> Result<(), EngineError> {
    guest.validate().map_err(|errors| {
        let mut fields: Vec<String> = errors
            .field_errors()
            .keys()
            .map(|field| field.to_string())
            .collect();
        fields.sort();
        EngineError::InvalidReservation(format!("invalid {}", fields.join(", ")))
    })
}

/// First restriction in `restrictions` that overlaps `range`.
pub(crate) fn first_conflict<'a>(
    restrictions: &'a [RoomRestriction],
    range: &DateRange,
) -> Option<&'a RoomRestriction> {
    restrictions.iter().find(|r| r.range.overlaps(range))
}

/// Restriction covering `day`, if any, restricted to the given kind filter.
pub(crate) fn covering(
    restrictions: &[RoomRestriction],
    day: chrono::NaiveDate,
    owner_block: bool,
) -> Option<&RoomRestriction> {
    restrictions
        .iter()
        .find(|r| r.range.contains_day(day) && r.kind.is_owner_block() == owner_block)
}
