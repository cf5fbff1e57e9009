use chrono::NaiveDateTime;

use crate::model::*;

use super::validator::validate;
use super::ScheduleError;

/// A failing candidate of a batch, by position in the submitted list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub index: usize,
    pub error: ScheduleError,
}

fn check_candidate(
    state: &RoomState,
    role: Option<&RoleId>,
    now: NaiveDateTime,
    candidates: &[Span],
    index: usize,
) -> Result<(), ScheduleError> {
    let span = &candidates[index];
    if candidates[..index].contains(span) {
        return Err(ScheduleError::invalid(format!(
            "candidate {index} repeats an earlier interval"
        )));
    }
    validate(state, role, now, span, None)
}

/// Validate every candidate against the persisted room state. Stops at the
/// first failure.
///
/// Candidates are not checked against each other beyond rejecting exact
/// repeats, so two distinct but overlapping candidates of the same batch
/// both pass.
pub fn validate_batch(
    state: &RoomState,
    role: Option<&RoleId>,
    now: NaiveDateTime,
    candidates: &[Span],
) -> Result<(), ScheduleError> {
    for index in 0..candidates.len() {
        check_candidate(state, role, now, candidates, index)?;
    }
    Ok(())
}

/// Every failing candidate, in submission order.
pub fn find_violations(
    state: &RoomState,
    role: Option<&RoleId>,
    now: NaiveDateTime,
    candidates: &[Span],
) -> Vec<Violation> {
    (0..candidates.len())
        .filter_map(|index| {
            check_candidate(state, role, now, candidates, index)
                .err()
                .map(|error| Violation { index, error })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::Weekday;
    use ulid::Ulid;

    use super::*;
    use crate::model::fixtures::{at, hm};

    fn weekday_room() -> RoomState {
        let mut state = RoomState::new(Room::new(Ulid::new(), "Studio"));
        for day in [Weekday::Mon, Weekday::Tue, Weekday::Wed] {
            state.windows.push(AvailabilityWindow::new(day, hm(8, 0), hm(20, 0)));
        }
        state.insert_reservation(Reservation {
            id: Ulid::new(),
            room_id: state.room.id,
            booking_id: Ulid::new(),
            span: Span::new(at(20, 10, 0), at(20, 11, 0)),
        });
        state
    }

    #[test]
    fn all_valid_candidates_pass() {
        let state = weekday_room();
        let candidates = [
            Span::new(at(19, 10, 0), at(19, 11, 0)),
            Span::new(at(26, 10, 0), at(26, 11, 0)),
        ];
        assert_eq!(validate_batch(&state, None, at(16, 9, 0), &candidates), Ok(()));
    }

    #[test]
    fn first_violation_is_reported() {
        let state = weekday_room();
        let candidates = [
            Span::new(at(19, 10, 0), at(19, 11, 0)),
            Span::new(at(20, 10, 30), at(20, 11, 30)),
            Span::new(at(21, 21, 0), at(21, 22, 0)),
        ];
        assert!(matches!(
            validate_batch(&state, None, at(16, 9, 0), &candidates),
            Err(ScheduleError::Overlap { .. })
        ));
    }

    #[test]
    fn violations_list_every_failure() {
        let state = weekday_room();
        let candidates = [
            Span::new(at(19, 10, 0), at(19, 11, 0)),
            Span::new(at(20, 10, 30), at(20, 11, 30)),
            Span::new(at(21, 21, 0), at(21, 22, 0)),
        ];
        let violations = find_violations(&state, None, at(16, 9, 0), &candidates);
        let indices: Vec<_> = violations.iter().map(|v| v.index).collect();
        assert_eq!(indices, vec![1, 2]);
        assert_eq!(violations[1].error, ScheduleError::OutsideAvailability);
    }

    #[test]
    fn identical_candidates_rejected() {
        let state = weekday_room();
        let span = Span::new(at(19, 12, 0), at(19, 13, 0));
        let err = validate_batch(&state, None, at(16, 9, 0), &[span, span]).unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidInput(_)));

        let violations = find_violations(&state, None, at(16, 9, 0), &[span, span]);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].index, 1);
    }

    #[test]
    fn overlapping_candidates_checked_against_persisted_only() {
        let state = weekday_room();
        let candidates = [
            Span::new(at(19, 12, 0), at(19, 13, 0)),
            Span::new(at(19, 12, 30), at(19, 13, 30)),
        ];
        assert_eq!(validate_batch(&state, None, at(16, 9, 0), &candidates), Ok(()));
    }
}
