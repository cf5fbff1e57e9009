use chrono::Datelike;

use crate::limits::*;
use crate::model::*;

use super::ScheduleError;

/// Both ends ordered and inside the supported calendar years.
pub(crate) fn check_dates(span: &Span) -> Result<(), ScheduleError> {
    if span.end <= span.start {
        return Err(ScheduleError::invalid("end time must be after start time"));
    }
    if span.start.year() < MIN_YEAR || span.end.year() > MAX_YEAR {
        return Err(ScheduleError::invalid(format!(
            "dates must fall between the years {MIN_YEAR} and {MAX_YEAR}"
        )));
    }
    Ok(())
}

pub(crate) fn validate_span(span: &Span) -> Result<(), ScheduleError> {
    check_dates(span)?;
    if span.duration().num_days() >= MAX_SPAN_DAYS {
        return Err(ScheduleError::LimitExceeded("reservation too long"));
    }
    Ok(())
}

/// First reservation of the room that shares an instant with `span`,
/// ignoring `exclude` (the reservation being moved).
pub fn find_conflict(
    state: &RoomState,
    span: &Span,
    exclude: Option<ReservationId>,
) -> Option<ReservationId> {
    state
        .overlapping(span)
        .find(|r| Some(r.id) != exclude)
        .map(|r| r.id)
}

pub fn has_conflict(state: &RoomState, span: &Span, exclude: Option<ReservationId>) -> bool {
    find_conflict(state, span, exclude).is_some()
}

pub(crate) fn check_no_conflict(
    state: &RoomState,
    span: &Span,
    exclude: Option<ReservationId>,
) -> Result<(), ScheduleError> {
    match find_conflict(state, span, exclude) {
        Some(reservation_id) => Err(ScheduleError::Overlap { reservation_id }),
        None => Ok(()),
    }
}
