use chrono::NaiveDateTime;

use crate::model::*;

use super::ScheduleError;

/// The advance-booking range that applies to `role` on this room: the
/// role's own restriction if the room has one, else the room default.
pub fn allowed_range(state: &RoomState, role: Option<&RoleId>) -> AdvanceWindow {
    role.and_then(|r| state.restrictions.get(r))
        .copied()
        .unwrap_or(state.room.default_advance)
}

/// Whole days between `now` and `start`, truncated toward zero.
pub fn days_advance(now: NaiveDateTime, start: NaiveDateTime) -> i64 {
    (start - now).num_days()
}

pub fn check_advance(
    window: AdvanceWindow,
    now: NaiveDateTime,
    span: &Span,
) -> Result<(), ScheduleError> {
    if window.is_unrestricted() {
        return Ok(());
    }
    let min_days = window.min_days;
    if span.start < now {
        return Err(ScheduleError::TooSoon { min_days });
    }
    let days = days_advance(now, span.start);
    if days < i64::from(min_days) {
        return Err(ScheduleError::TooSoon { min_days });
    }
    if let Some(max_days) = window.max_days
        && days > i64::from(max_days) {
            return Err(ScheduleError::TooLate { max_days });
        }
    Ok(())
}
