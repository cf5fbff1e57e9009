use chrono::NaiveDateTime;

use crate::model::*;

use super::advance::{allowed_range, check_advance};
use super::calendar::is_within_availability;
use super::conflict::{check_no_conflict, validate_span};
use super::ScheduleError;

/// Decide whether `span` may be held on this room by a caller with `role`.
///
/// Checks run in a fixed order and stop at the first failure: span shape,
/// room status, advance-booking range, weekly availability, overlap with
/// persisted reservations (other than `exclude`).
pub fn validate(
    state: &RoomState,
    role: Option<&RoleId>,
    now: NaiveDateTime,
    span: &Span,
    exclude: Option<ReservationId>,
) -> Result<(), ScheduleError> {
    validate_span(span)?;
    if !state.room.is_available() {
        return Err(ScheduleError::RoomUnavailable(state.room.id));
    }
    check_advance(allowed_range(state, role), now, span)?;
    if !is_within_availability(&state.windows, span) {
        return Err(ScheduleError::OutsideAvailability);
    }
    check_no_conflict(state, span, exclude)
}
