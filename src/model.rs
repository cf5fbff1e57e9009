use std::collections::{BTreeSet, HashMap};

use chrono::{NaiveDateTime, NaiveTime, TimeDelta, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub type RoomId = Ulid;
pub type RoleId = Ulid;
pub type UserId = Ulid;
pub type BookingId = Ulid;
pub type ReservationId = Ulid;

/// Half-open interval `[start, end)` on the rooms' local wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Span {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    #[default]
    Available,
    Unavailable,
}

/// How far ahead a reservation may start, in whole days.
/// `max_days: None` means no upper bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvanceWindow {
    pub min_days: u32,
    pub max_days: Option<u32>,
}

impl Default for AdvanceWindow {
    fn default() -> Self {
        Self::unrestricted()
    }
}

impl AdvanceWindow {
    pub fn new(min_days: u32, max_days: Option<u32>) -> Self {
        Self { min_days, max_days }
    }

    pub fn unrestricted() -> Self {
        Self { min_days: 0, max_days: None }
    }

    /// `(0, 0)` and `(0, ∞)` both disable the check.
    pub fn is_unrestricted(&self) -> bool {
        self.min_days == 0 && matches!(self.max_days, None | Some(0))
    }

    pub fn is_valid(&self) -> bool {
        self.max_days.is_none_or(|max| self.min_days <= max)
    }
}

/// Weekly recurring opening of a room. A closing time of `00:00` means
/// midnight at the end of `weekday`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityWindow {
    pub weekday: Weekday,
    pub opens: NaiveTime,
    pub closes: NaiveTime,
}

impl AvailabilityWindow {
    pub fn new(weekday: Weekday, opens: NaiveTime, closes: NaiveTime) -> Self {
        Self { weekday, opens, closes }
    }

    /// Offset of the opening time from the start of the day.
    pub fn opens_offset(&self) -> TimeDelta {
        self.opens - NaiveTime::MIN
    }

    /// Offset of the closing time from the start of the day (24h for `00:00`).
    pub fn closes_offset(&self) -> TimeDelta {
        if self.closes == NaiveTime::MIN {
            TimeDelta::days(1)
        } else {
            self.closes - NaiveTime::MIN
        }
    }

    pub fn is_valid(&self) -> bool {
        self.closes_offset() > self.opens_offset()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    #[serde(default)]
    pub status: RoomStatus,
    #[serde(default)]
    pub default_advance: AdvanceWindow,
    #[serde(default)]
    pub attributes: BTreeSet<String>,
}

impl Room {
    pub fn new(id: RoomId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            status: RoomStatus::Available,
            default_advance: AdvanceWindow::unrestricted(),
            attributes: BTreeSet::new(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.status == RoomStatus::Available
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub room_id: RoomId,
    pub booking_id: BookingId,
    pub span: Span,
}

/// Location of the uploaded reference files of a booking. Storage itself
/// is handled by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub path: String,
}

impl Reference {
    /// `{room_id}_{unix seconds of first start}_reference`
    pub fn for_booking(room_id: RoomId, first_start: NaiveDateTime) -> Self {
        Self {
            path: format!("{room_id}_{}_reference", first_start.and_utc().timestamp()),
        }
    }
}

/// Descriptive event metadata carried by a booking. Never validated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventDetails {
    pub title: Option<String>,
    pub kind: Option<String>,
    pub description: Option<String>,
    pub guest_speakers: Option<String>,
    pub attendees: Option<u32>,
    pub start_label: Option<String>,
    pub end_label: Option<String>,
    pub alcohol: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    #[default]
    Committed,
    Updated,
}

/// Everything a caller supplies for a new booking besides its intervals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingDraft {
    pub holder: UserId,
    #[serde(default)]
    pub reference: Option<Reference>,
    #[serde(default)]
    pub event: Option<EventDetails>,
}

/// A booking request together with the reservations it owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub id: BookingId,
    pub room_id: RoomId,
    pub holder: UserId,
    pub status: BookingStatus,
    pub reference: Option<Reference>,
    pub event: Option<EventDetails>,
    pub reservations: Vec<Reservation>,
}

/// Stored form of a booking: reservations are kept on the room and
/// referenced by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRecord {
    pub id: BookingId,
    pub room_id: RoomId,
    pub holder: UserId,
    pub status: BookingStatus,
    pub reference: Option<Reference>,
    pub event: Option<EventDetails>,
    pub reservation_ids: Vec<ReservationId>,
}

#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    pub windows: Vec<AvailabilityWindow>,
    /// Per-role overrides of `room.default_advance`.
    pub restrictions: HashMap<RoleId, AdvanceWindow>,
    /// All reservations of the room, sorted by `span.start`.
    pub reservations: Vec<Reservation>,
    pub bookings: HashMap<BookingId, BookingRecord>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            windows: Vec::new(),
            restrictions: HashMap::new(),
            reservations: Vec::new(),
            bookings: HashMap::new(),
        }
    }

    pub fn id(&self) -> RoomId {
        self.room.id
    }

    /// Insert reservation maintaining sort order by span.start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.span.start, |r| r.span.start)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: ReservationId) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn reservation(&self, id: &ReservationId) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == *id)
    }

    /// Return only reservations whose span overlaps the query window.
    /// Uses binary search to skip reservations starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span.end > query.start)
    }

    /// Assemble the aggregate view of a stored booking.
    pub fn booking(&self, id: &BookingId) -> Option<BookingRequest> {
        let record = self.bookings.get(id)?;
        let mut reservations: Vec<Reservation> = record
            .reservation_ids
            .iter()
            .filter_map(|rid| self.reservation(rid).cloned())
            .collect();
        reservations.sort_by_key(|r| r.span.start);
        Some(BookingRequest {
            id: record.id,
            room_id: record.room_id,
            holder: record.holder,
            status: record.status,
            reference: record.reference.clone(),
            event: record.event.clone(),
            reservations,
        })
    }

    /// Apply a committed event. Room creation/deletion is handled by the store.
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::RoomUpdated { room } => {
                self.room = room.clone();
            }
            Event::AvailabilitySet { windows, .. } => {
                self.windows = windows.clone();
            }
            Event::RestrictionSet { role_id, window, .. } => match window {
                Some(w) => {
                    self.restrictions.insert(*role_id, *w);
                }
                None => {
                    self.restrictions.remove(role_id);
                }
            },
            Event::BookingCommitted { booking } => {
                for r in &booking.reservations {
                    self.insert_reservation(r.clone());
                }
                self.bookings.insert(
                    booking.id,
                    BookingRecord {
                        id: booking.id,
                        room_id: booking.room_id,
                        holder: booking.holder,
                        status: booking.status,
                        reference: booking.reference.clone(),
                        event: booking.event.clone(),
                        reservation_ids: booking.reservations.iter().map(|r| r.id).collect(),
                    },
                );
            }
            Event::ReservationRescheduled { id, span, .. } => {
                if let Some(mut r) = self.remove_reservation(*id) {
                    r.span = *span;
                    if let Some(record) = self.bookings.get_mut(&r.booking_id) {
                        record.status = BookingStatus::Updated;
                    }
                    self.insert_reservation(r);
                }
            }
            Event::ReferenceAttached { booking_id, reference, .. } => {
                if let Some(record) = self.bookings.get_mut(booking_id) {
                    record.reference = reference.clone();
                    record.status = BookingStatus::Updated;
                }
            }
            Event::BookingDeleted { id, .. } => {
                if let Some(record) = self.bookings.remove(id) {
                    self.reservations.retain(|r| r.booking_id != record.id);
                }
            }
            Event::RoomCreated { .. } | Event::RoomDeleted { .. } => {}
        }
    }

    /// Events that recreate this room from scratch (WAL compaction).
    pub fn snapshot_events(&self) -> Vec<Event> {
        let room_id = self.room.id;
        let mut events = vec![Event::RoomCreated { room: self.room.clone() }];
        if !self.windows.is_empty() {
            events.push(Event::AvailabilitySet {
                room_id,
                windows: self.windows.clone(),
            });
        }
        let mut roles: Vec<_> = self.restrictions.iter().collect();
        roles.sort_by_key(|(role_id, _)| **role_id);
        for (role_id, window) in roles {
            events.push(Event::RestrictionSet {
                room_id,
                role_id: *role_id,
                window: Some(*window),
            });
        }
        let mut booking_ids: Vec<_> = self.bookings.keys().copied().collect();
        booking_ids.sort();
        for id in booking_ids {
            if let Some(booking) = self.booking(&id) {
                events.push(Event::BookingCommitted { booking });
            }
        }
        events
    }
}

/// Committed state changes. A transaction is a `Vec<Event>` written as one
/// WAL record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        room: Room,
    },
    RoomUpdated {
        room: Room,
    },
    RoomDeleted {
        id: RoomId,
    },
    AvailabilitySet {
        room_id: RoomId,
        windows: Vec<AvailabilityWindow>,
    },
    RestrictionSet {
        room_id: RoomId,
        role_id: RoleId,
        window: Option<AdvanceWindow>,
    },
    BookingCommitted {
        booking: BookingRequest,
    },
    ReservationRescheduled {
        id: ReservationId,
        room_id: RoomId,
        span: Span,
    },
    ReferenceAttached {
        booking_id: BookingId,
        room_id: RoomId,
        reference: Option<Reference>,
    },
    BookingDeleted {
        id: BookingId,
        room_id: RoomId,
    },
}

impl Event {
    pub fn room_id(&self) -> RoomId {
        match self {
            Event::RoomCreated { room } | Event::RoomUpdated { room } => room.id,
            Event::RoomDeleted { id } => *id,
            Event::AvailabilitySet { room_id, .. }
            | Event::RestrictionSet { room_id, .. }
            | Event::ReservationRescheduled { room_id, .. }
            | Event::ReferenceAttached { room_id, .. }
            | Event::BookingDeleted { room_id, .. } => *room_id,
            Event::BookingCommitted { booking } => booking.room_id,
        }
    }
}
