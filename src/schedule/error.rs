use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::{ReservationId, RoomId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("room {0} is not available for booking")]
    RoomUnavailable(RoomId),
    #[error("Reservations for this room must start later than {min_days} days from now.")]
    TooSoon { min_days: u32 },
    #[error("Reservations for this room must start sooner than {max_days} days from now.")]
    TooLate { max_days: u32 },
    #[error("These dates and times are not within the room's availabilities!")]
    OutsideAvailability,
    #[error("These dates and times overlap reservation {reservation_id}.")]
    Overlap { reservation_id: ReservationId },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Machine-readable error class, stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RoomUnavailable,
    TooSoon,
    TooLate,
    OutsideAvailability,
    Overlap,
    ValidationInputError,
    NotFound,
    AlreadyExists,
    LimitExceeded,
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RoomUnavailable => "room_unavailable",
            ErrorKind::TooSoon => "too_soon",
            ErrorKind::TooLate => "too_late",
            ErrorKind::OutsideAvailability => "outside_availability",
            ErrorKind::Overlap => "overlap",
            ErrorKind::ValidationInputError => "validation_input_error",
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::LimitExceeded => "limit_exceeded",
            ErrorKind::Storage => "storage",
        }
    }
}

impl ScheduleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScheduleError::RoomUnavailable(_) => ErrorKind::RoomUnavailable,
            ScheduleError::TooSoon { .. } => ErrorKind::TooSoon,
            ScheduleError::TooLate { .. } => ErrorKind::TooLate,
            ScheduleError::OutsideAvailability => ErrorKind::OutsideAvailability,
            ScheduleError::Overlap { .. } => ErrorKind::Overlap,
            ScheduleError::InvalidInput(_) => ErrorKind::ValidationInputError,
            ScheduleError::NotFound(_) => ErrorKind::NotFound,
            ScheduleError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            ScheduleError::LimitExceeded(_) => ErrorKind::LimitExceeded,
            ScheduleError::Storage(_) => ErrorKind::Storage,
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        ScheduleError::InvalidInput(msg.into())
    }
}

impl From<std::io::Error> for ScheduleError {
    fn from(e: std::io::Error) -> Self {
        ScheduleError::Storage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_messages_name_the_bound() {
        let soon = ScheduleError::TooSoon { min_days: 30 }.to_string();
        assert!(soon.contains("later than 30 days"), "{soon}");
        let late = ScheduleError::TooLate { max_days: 31 }.to_string();
        assert!(late.contains("sooner than 31 days"), "{late}");
    }

    #[test]
    fn kind_serializes_snake_case() {
        let kind = ScheduleError::invalid("end before start").kind();
        assert_eq!(
            serde_json::to_string(&kind).unwrap(),
            format!("\"{}\"", kind.as_str())
        );
        assert_eq!(kind.as_str(), "validation_input_error");
    }
}
