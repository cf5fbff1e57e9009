//! JSON-lines command protocol.
//!
//! Each request is one JSON object tagged by `"op"`; each reply is one JSON
//! object tagged by `"status"`:
//!
//! ```text
//! {"op":"schedule","room_id":"01J...","holder":"01J...","reservations":[{"start":"2026-10-19T13:00:00","end":"2026-10-19T14:00:00"}]}
//! {"status":"ok","data":{"id":"01J...", ...}}
//! {"status":"error","kind":"overlap","message":"..."}
//! {"status":"event","room_id":"01J...","event":{"BookingCommitted":{...}}}
//! ```

use std::collections::BTreeSet;
use std::time::Instant;

use chrono::{NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::clock::Clock;
use crate::model::*;
use crate::observability::{command_label, COMMANDS_TOTAL, COMMAND_DURATION_SECONDS};
use crate::schedule::{ErrorKind, RoomFilter, ScheduleError, Scheduler};
use crate::store::ReservationStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    CreateRoom {
        #[serde(default)]
        id: Option<RoomId>,
        name: String,
        #[serde(default)]
        status: RoomStatus,
        #[serde(default)]
        default_advance: AdvanceWindow,
        #[serde(default)]
        attributes: BTreeSet<String>,
    },
    UpdateRoom {
        room: Room,
    },
    DeleteRoom {
        room_id: RoomId,
    },
    SetAvailability {
        room_id: RoomId,
        windows: Vec<AvailabilityWindow>,
    },
    SetRestriction {
        room_id: RoomId,
        role_id: RoleId,
        window: Option<AdvanceWindow>,
    },
    Schedule {
        room_id: RoomId,
        #[serde(default)]
        role: Option<RoleId>,
        holder: UserId,
        reservations: Vec<Span>,
        #[serde(default)]
        event: Option<EventDetails>,
        #[serde(default)]
        reference: Option<Reference>,
    },
    CheckBatch {
        room_id: RoomId,
        #[serde(default)]
        role: Option<RoleId>,
        reservations: Vec<Span>,
    },
    Reschedule {
        reservation_id: ReservationId,
        #[serde(default)]
        role: Option<RoleId>,
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
    AttachReference {
        booking_id: BookingId,
        reference: Option<Reference>,
    },
    DeleteBooking {
        booking_id: BookingId,
    },
    GetRoom {
        room_id: RoomId,
    },
    ListRooms {
        #[serde(default)]
        filter: RoomFilter,
    },
    ListReservations {
        room_id: RoomId,
        #[serde(default)]
        window: Option<Span>,
    },
    GetBooking {
        booking_id: BookingId,
    },
    ListBookings {
        holder: UserId,
    },
    AllowedRange {
        room_id: RoomId,
        #[serde(default)]
        role: Option<RoleId>,
    },
    OpenSlots {
        room_id: RoomId,
        start: NaiveDateTime,
        end: NaiveDateTime,
        #[serde(default)]
        min_minutes: Option<i64>,
    },
    /// Subscribe this connection to a room's committed events.
    Watch {
        room_id: RoomId,
    },
    Unwatch {
        room_id: RoomId,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Reply {
    Ok {
        data: serde_json::Value,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
    Event {
        room_id: RoomId,
        event: Event,
    },
}

impl Reply {
    pub fn ok(value: impl Serialize) -> Self {
        match serde_json::to_value(value) {
            Ok(data) => Reply::Ok { data },
            Err(e) => Reply::Error {
                kind: ErrorKind::Storage,
                message: format!("failed to encode reply: {e}"),
            },
        }
    }

    pub fn error(err: &ScheduleError) -> Self {
        Reply::Error {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    /// Reply to a line that is not a valid command.
    pub fn malformed(err: &serde_json::Error) -> Self {
        Reply::Error {
            kind: ErrorKind::ValidationInputError,
            message: format!("malformed command: {err}"),
        }
    }

    pub fn event(event: Event) -> Self {
        Reply::Event {
            room_id: event.room_id(),
            event,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Reply::Ok { .. })
    }

    fn status_label(&self) -> &'static str {
        match self {
            Reply::Ok { .. } => "ok",
            Reply::Error { .. } => "error",
            Reply::Event { .. } => "event",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationInfo {
    pub index: usize,
    pub kind: ErrorKind,
    pub message: String,
}

fn span(start: NaiveDateTime, end: NaiveDateTime) -> Result<Span, ScheduleError> {
    if end <= start {
        return Err(ScheduleError::invalid("end time must be after start time"));
    }
    Ok(Span::new(start, end))
}

fn reply<T: Serialize>(result: Result<T, ScheduleError>) -> Reply {
    match result {
        Ok(value) => Reply::ok(value),
        Err(e) => Reply::error(&e),
    }
}

/// Run one command against the scheduler. Blocking; call from a blocking
/// context. `watch`/`unwatch` only check the room here, the connection
/// manages the subscription.
pub fn execute<S: ReservationStore>(
    scheduler: &Scheduler<S>,
    clock: &dyn Clock,
    command: Command,
) -> Reply {
    let op = command_label(&command);
    let start = Instant::now();
    let reply = dispatch(scheduler, clock, command);
    metrics::counter!(COMMANDS_TOTAL, "op" => op, "status" => reply.status_label()).increment(1);
    metrics::histogram!(COMMAND_DURATION_SECONDS, "op" => op)
        .record(start.elapsed().as_secs_f64());
    reply
}

fn dispatch<S: ReservationStore>(
    scheduler: &Scheduler<S>,
    clock: &dyn Clock,
    command: Command,
) -> Reply {
    match command {
        Command::CreateRoom {
            id,
            name,
            status,
            default_advance,
            attributes,
        } => {
            let room = Room {
                id: id.unwrap_or_else(Ulid::new),
                name,
                status,
                default_advance,
                attributes,
            };
            reply(scheduler.create_room(room))
        }
        Command::UpdateRoom { room } => reply(scheduler.update_room(room)),
        Command::DeleteRoom { room_id } => reply(scheduler.delete_room(room_id)),
        Command::SetAvailability { room_id, windows } => {
            reply(scheduler.set_availability(room_id, windows))
        }
        Command::SetRestriction {
            room_id,
            role_id,
            window,
        } => reply(scheduler.set_restriction(room_id, role_id, window)),
        Command::Schedule {
            room_id,
            role,
            holder,
            reservations,
            event,
            reference,
        } => {
            let draft = BookingDraft {
                holder,
                reference,
                event,
            };
            reply(scheduler.schedule(room_id, role, clock.now(), &reservations, draft))
        }
        Command::CheckBatch {
            room_id,
            role,
            reservations,
        } => reply(
            scheduler
                .check_batch(room_id, role, clock.now(), &reservations)
                .map(|violations| {
                    violations
                        .into_iter()
                        .map(|v| ViolationInfo {
                            index: v.index,
                            kind: v.error.kind(),
                            message: v.error.to_string(),
                        })
                        .collect::<Vec<_>>()
                }),
        ),
        Command::Reschedule {
            reservation_id,
            role,
            start,
            end,
        } => reply(
            span(start, end)
                .and_then(|s| scheduler.reschedule(reservation_id, role, clock.now(), s)),
        ),
        Command::AttachReference {
            booking_id,
            reference,
        } => reply(scheduler.attach_reference(booking_id, reference)),
        Command::DeleteBooking { booking_id } => reply(scheduler.delete_booking(booking_id)),
        Command::GetRoom { room_id } => reply(scheduler.get_room(room_id)),
        Command::ListRooms { filter } => Reply::ok(scheduler.list_rooms(&filter)),
        Command::ListReservations { room_id, window } => {
            reply(scheduler.reservations(room_id, window))
        }
        Command::GetBooking { booking_id } => reply(scheduler.booking(booking_id)),
        Command::ListBookings { holder } => Reply::ok(scheduler.bookings_for_holder(holder)),
        Command::AllowedRange { room_id, role } => reply(scheduler.allowed_range(room_id, role)),
        Command::OpenSlots {
            room_id,
            start,
            end,
            min_minutes,
        } => reply(span(start, end).and_then(|query| {
            scheduler.open_slots(room_id, query, min_minutes.map(TimeDelta::minutes))
        })),
        Command::Watch { room_id } | Command::Unwatch { room_id } => {
            reply(scheduler.get_room(room_id).map(|_| room_id))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Weekday;

    use super::*;
    use crate::clock::FixedClock;
    use crate::model::fixtures::{at, hm};
    use crate::notify::NotifyHub;
    use crate::store::MemoryStore;

    fn setup() -> (Scheduler<MemoryStore>, FixedClock) {
        let scheduler = Scheduler::new(Arc::new(MemoryStore::new()), Arc::new(NotifyHub::new()));
        (scheduler, FixedClock(at(16, 10, 0)))
    }

    fn parse(line: &str) -> Command {
        serde_json::from_str(line).unwrap()
    }

    #[test]
    fn commands_parse_from_json() {
        let room_id = Ulid::new();
        let cmd = parse(&format!(
            r#"{{"op":"open_slots","room_id":"{room_id}","start":"2026-10-19T00:00:00","end":"2026-10-20T00:00:00"}}"#
        ));
        assert_eq!(
            cmd,
            Command::OpenSlots {
                room_id,
                start: at(19, 0, 0),
                end: at(20, 0, 0),
                min_minutes: None,
            }
        );

        let cmd = parse(r#"{"op":"list_rooms"}"#);
        assert_eq!(
            cmd,
            Command::ListRooms {
                filter: RoomFilter::default()
            }
        );
    }

    #[test]
    fn unknown_op_is_rejected() {
        let err = serde_json::from_str::<Command>(r#"{"op":"drop_everything"}"#).unwrap_err();
        let reply = Reply::malformed(&err);
        assert!(matches!(
            reply,
            Reply::Error {
                kind: ErrorKind::ValidationInputError,
                ..
            }
        ));
    }

    #[test]
    fn schedule_through_commands() {
        let (scheduler, clock) = setup();
        let created = execute(
            &scheduler,
            &clock,
            parse(r#"{"op":"create_room","name":"Seminar Room","default_advance":{"min_days":2,"max_days":30}}"#),
        );
        let Reply::Ok { data } = created else {
            panic!("create failed: {created:?}");
        };
        let room: Room = serde_json::from_value(data).unwrap();

        let reply = execute(
            &scheduler,
            &clock,
            Command::SetAvailability {
                room_id: room.id,
                windows: vec![AvailabilityWindow::new(Weekday::Mon, hm(9, 0), hm(17, 0))],
            },
        );
        assert!(reply.is_ok(), "{reply:?}");

        let holder = Ulid::new();
        let line = format!(
            r#"{{"op":"schedule","room_id":"{}","holder":"{holder}","reservations":[{{"start":"2026-10-19T10:00:00","end":"2026-10-19T11:00:00"}}],"event":{{"title":"Thesis defense"}}}}"#,
            room.id
        );
        let reply = execute(&scheduler, &clock, parse(&line));
        let Reply::Ok { data } = reply else {
            panic!("schedule failed: {reply:?}");
        };
        let booking: BookingRequest = serde_json::from_value(data).unwrap();
        assert_eq!(booking.holder, holder);
        assert_eq!(booking.event.unwrap().title.as_deref(), Some("Thesis defense"));

        // Saturday: too soon is checked first
        let line = format!(
            r#"{{"op":"schedule","room_id":"{}","holder":"{holder}","reservations":[{{"start":"2026-10-17T10:00:00","end":"2026-10-17T11:00:00"}}]}}"#,
            room.id
        );
        let reply = execute(&scheduler, &clock, parse(&line));
        assert_eq!(
            reply,
            Reply::Error {
                kind: ErrorKind::TooSoon,
                message: "Reservations for this room must start later than 2 days from now."
                    .into(),
            }
        );
    }

    #[test]
    fn check_batch_lists_violations() {
        let (scheduler, clock) = setup();
        let room = scheduler.create_room(Room::new(Ulid::new(), "Lab")).unwrap();
        scheduler
            .set_availability(
                room.id,
                vec![AvailabilityWindow::new(Weekday::Mon, hm(9, 0), hm(17, 0))],
            )
            .unwrap();

        let reply = execute(
            &scheduler,
            &clock,
            Command::CheckBatch {
                room_id: room.id,
                role: None,
                reservations: vec![
                    Span::new(at(19, 10, 0), at(19, 11, 0)),
                    Span::new(at(20, 10, 0), at(20, 11, 0)),
                ],
            },
        );
        let Reply::Ok { data } = reply else {
            panic!("check_batch failed: {reply:?}");
        };
        let violations: Vec<ViolationInfo> = serde_json::from_value(data).unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].index, 1);
        assert_eq!(violations[0].kind, ErrorKind::OutsideAvailability);
    }

    #[test]
    fn backwards_interval_is_input_error() {
        let (scheduler, clock) = setup();
        let room = scheduler.create_room(Room::new(Ulid::new(), "Lab")).unwrap();
        let reply = execute(
            &scheduler,
            &clock,
            Command::OpenSlots {
                room_id: room.id,
                start: at(20, 0, 0),
                end: at(19, 0, 0),
                min_minutes: None,
            },
        );
        assert!(matches!(
            reply,
            Reply::Error {
                kind: ErrorKind::ValidationInputError,
                ..
            }
        ));
    }

    #[test]
    fn watch_requires_existing_room() {
        let (scheduler, clock) = setup();
        let reply = execute(&scheduler, &clock, Command::Watch { room_id: Ulid::new() });
        assert!(matches!(
            reply,
            Reply::Error {
                kind: ErrorKind::NotFound,
                ..
            }
        ));
    }

    #[test]
    fn reply_wire_shape() {
        let reply = Reply::error(&ScheduleError::OutsideAvailability);
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["kind"], "outside_availability");

        let room_id = Ulid::new();
        let json = serde_json::to_value(Reply::event(Event::RoomDeleted { id: room_id })).unwrap();
        assert_eq!(json["status"], "event");
        assert_eq!(json["room_id"], room_id.to_string());
    }
}
