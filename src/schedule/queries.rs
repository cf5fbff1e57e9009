use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::limits::*;
use crate::model::*;
use crate::store::ReservationStore;

use super::calendar::{merge_overlapping, open_slots};
use super::conflict::check_dates;
use super::{advance, ScheduleError, Scheduler};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomFilter {
    pub status: Option<RoomStatus>,
    /// Only rooms carrying this attribute.
    pub attribute: Option<String>,
}

impl RoomFilter {
    fn matches(&self, room: &Room) -> bool {
        self.status.is_none_or(|s| room.status == s)
            && self
                .attribute
                .as_ref()
                .is_none_or(|a| room.attributes.contains(a))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRestriction {
    pub role_id: RoleId,
    pub window: AdvanceWindow,
}

/// A room with its schedule configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub room: Room,
    pub windows: Vec<AvailabilityWindow>,
    pub restrictions: Vec<RoleRestriction>,
    pub reservation_count: usize,
}

impl<S: ReservationStore> Scheduler<S> {
    pub fn get_room(&self, room_id: RoomId) -> Result<RoomInfo, ScheduleError> {
        self.store.read_room(room_id, |rs| {
            let mut restrictions: Vec<RoleRestriction> = rs
                .restrictions
                .iter()
                .map(|(&role_id, &window)| RoleRestriction { role_id, window })
                .collect();
            restrictions.sort_by_key(|r| r.role_id);
            RoomInfo {
                room: rs.room.clone(),
                windows: rs.windows.clone(),
                restrictions,
                reservation_count: rs.reservations.len(),
            }
        })
    }

    /// Rooms matching `filter`, sorted by name.
    pub fn list_rooms(&self, filter: &RoomFilter) -> Vec<Room> {
        let mut rooms: Vec<Room> = self
            .store
            .room_ids()
            .into_iter()
            .filter_map(|id| self.store.read_room(id, |rs| rs.room.clone()).ok())
            .filter(|room| filter.matches(room))
            .collect();
        rooms.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        rooms
    }

    /// Reservations of a room in start order, optionally only those
    /// overlapping `window`.
    pub fn reservations(
        &self,
        room_id: RoomId,
        window: Option<Span>,
    ) -> Result<Vec<Reservation>, ScheduleError> {
        self.store.read_room(room_id, |rs| match window {
            Some(w) => rs.overlapping(&w).cloned().collect(),
            None => rs.reservations.clone(),
        })
    }

    pub fn booking(&self, booking_id: BookingId) -> Result<BookingRequest, ScheduleError> {
        let room_id = self
            .store
            .room_of(&booking_id)
            .ok_or(ScheduleError::NotFound(booking_id))?;
        self.store
            .read_room(room_id, |rs| rs.booking(&booking_id))?
            .ok_or(ScheduleError::NotFound(booking_id))
    }

    /// Every booking held by `holder`, across all rooms, earliest first.
    pub fn bookings_for_holder(&self, holder: UserId) -> Vec<BookingRequest> {
        let mut bookings: Vec<BookingRequest> = Vec::new();
        for room_id in self.store.room_ids() {
            let found = self.store.read_room(room_id, |rs| {
                rs.bookings
                    .values()
                    .filter(|b| b.holder == holder)
                    .filter_map(|b| rs.booking(&b.id))
                    .collect::<Vec<_>>()
            });
            if let Ok(found) = found {
                bookings.extend(found);
            }
        }
        bookings.sort_by_key(|b| (b.reservations.first().map(|r| r.span.start), b.id));
        bookings
    }

    /// The advance-booking range `role` gets on this room.
    pub fn allowed_range(
        &self,
        room_id: RoomId,
        role: Option<RoleId>,
    ) -> Result<AdvanceWindow, ScheduleError> {
        self.store
            .read_room(room_id, |rs| advance::allowed_range(rs, role.as_ref()))
    }

    /// Bookable gaps inside `query`: availability minus reservations, with
    /// gaps shorter than `min_duration` dropped. An unavailable room has none.
    pub fn open_slots(
        &self,
        room_id: RoomId,
        query: Span,
        min_duration: Option<TimeDelta>,
    ) -> Result<Vec<Span>, ScheduleError> {
        check_dates(&query)?;
        if query.duration() > TimeDelta::days(MAX_QUERY_WINDOW_DAYS) {
            return Err(ScheduleError::LimitExceeded("query window too large"));
        }
        let slots = self.store.read_room(room_id, |rs| {
            if !rs.room.is_available() {
                return Vec::new();
            }
            let booked: Vec<Span> = rs.overlapping(&query).map(|r| r.span).collect();
            open_slots(&rs.windows, &merge_overlapping(&booked), &query)
        })?;
        Ok(match min_duration {
            Some(min) => slots.into_iter().filter(|s| s.duration() >= min).collect(),
            None => slots,
        })
    }
}
