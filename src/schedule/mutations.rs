use chrono::NaiveDateTime;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::*;
use crate::store::ReservationStore;

use super::batch::{find_violations, validate_batch, Violation};
use super::validator::validate;
use super::{ScheduleError, Scheduler};

fn check_room(room: &Room) -> Result<(), ScheduleError> {
    if room.name.trim().is_empty() {
        return Err(ScheduleError::invalid("room name must not be empty"));
    }
    if room.name.len() > MAX_NAME_LEN {
        return Err(ScheduleError::LimitExceeded("room name too long"));
    }
    if room.attributes.len() > MAX_ATTRIBUTES_PER_ROOM {
        return Err(ScheduleError::LimitExceeded("too many room attributes"));
    }
    if !room.default_advance.is_valid() {
        return Err(ScheduleError::invalid(
            "minimum advance must not exceed maximum advance",
        ));
    }
    Ok(())
}

fn check_reference(reference: Option<&Reference>) -> Result<(), ScheduleError> {
    match reference {
        Some(r) if r.path.is_empty() => Err(ScheduleError::invalid("reference path is empty")),
        Some(r) if r.path.len() > MAX_REFERENCE_PATH_LEN => {
            Err(ScheduleError::LimitExceeded("reference path too long"))
        }
        _ => Ok(()),
    }
}

fn check_candidates(candidates: &[Span]) -> Result<(), ScheduleError> {
    if candidates.is_empty() {
        return Err(ScheduleError::invalid("at least one reservation is required"));
    }
    if candidates.len() > MAX_BATCH_SIZE {
        return Err(ScheduleError::LimitExceeded("too many reservations in one booking"));
    }
    Ok(())
}

fn record_rejection(op: &'static str, err: &ScheduleError) {
    metrics::counter!(REJECTIONS_TOTAL, "kind" => err.kind().as_str()).increment(1);
    debug!(op, kind = err.kind().as_str(), "rejected: {err}");
}

impl<S: ReservationStore> Scheduler<S> {
    // ── Room administration ──────────────────────────────────

    pub fn create_room(&self, room: Room) -> Result<Room, ScheduleError> {
        check_room(&room)?;
        if self.store.room_ids().len() >= MAX_ROOMS {
            return Err(ScheduleError::LimitExceeded("too many rooms"));
        }
        self.store.create_room(room.clone())?;
        info!(room_id = %room.id, name = %room.name, "room created");
        self.publish_one(&Event::RoomCreated { room: room.clone() });
        Ok(room)
    }

    pub fn update_room(&self, room: Room) -> Result<Room, ScheduleError> {
        check_room(&room)?;
        let committed = self.store.transact(room.id, |tx| {
            tx.stage(Event::RoomUpdated { room: room.clone() });
            Ok(())
        })?;
        self.published(committed);
        info!(room_id = %room.id, status = ?room.status, "room updated");
        Ok(room)
    }

    /// Delete a room with every booking on it. Returns the references of the
    /// removed bookings so the caller can clean up their files.
    pub fn delete_room(&self, room_id: RoomId) -> Result<Vec<Reference>, ScheduleError> {
        let removed = self.store.delete_room(room_id)?;
        self.publish_one(&Event::RoomDeleted { id: room_id });
        self.notify.remove(&room_id);
        info!(
            %room_id,
            bookings = removed.bookings.len(),
            reservations = removed.reservations.len(),
            "room deleted"
        );
        let mut references: Vec<Reference> = removed
            .bookings
            .into_values()
            .filter_map(|b| b.reference)
            .collect();
        references.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(references)
    }

    /// Replace the room's weekly availability.
    pub fn set_availability(
        &self,
        room_id: RoomId,
        windows: Vec<AvailabilityWindow>,
    ) -> Result<(), ScheduleError> {
        if windows.len() > MAX_WINDOWS_PER_ROOM {
            return Err(ScheduleError::LimitExceeded("too many availability windows"));
        }
        if let Some(w) = windows.iter().find(|w| !w.is_valid()) {
            return Err(ScheduleError::invalid(format!(
                "availability on {} closes at {} before it opens at {}",
                w.weekday, w.closes, w.opens
            )));
        }
        let count = windows.len();
        let committed = self.store.transact(room_id, |tx| {
            tx.stage(Event::AvailabilitySet { room_id, windows });
            Ok(())
        })?;
        self.published(committed);
        info!(%room_id, windows = count, "availability set");
        Ok(())
    }

    /// Set or clear (`None`) a role's advance-booking override on a room.
    pub fn set_restriction(
        &self,
        room_id: RoomId,
        role_id: RoleId,
        window: Option<AdvanceWindow>,
    ) -> Result<(), ScheduleError> {
        if let Some(w) = window
            && !w.is_valid() {
                return Err(ScheduleError::invalid(
                    "minimum advance must not exceed maximum advance",
                ));
            }
        let committed = self.store.transact(room_id, |tx| {
            tx.stage(Event::RestrictionSet { room_id, role_id, window });
            Ok(())
        })?;
        self.published(committed);
        info!(%room_id, %role_id, ?window, "restriction set");
        Ok(())
    }

    // ── Bookings ─────────────────────────────────────────────

    /// Book every candidate interval as one booking, or none of them.
    pub fn schedule(
        &self,
        room_id: RoomId,
        role: Option<RoleId>,
        now: NaiveDateTime,
        candidates: &[Span],
        draft: BookingDraft,
    ) -> Result<BookingRequest, ScheduleError> {
        check_candidates(candidates)?;
        check_reference(draft.reference.as_ref())?;
        if let Some(title) = draft.event.as_ref().and_then(|e| e.title.as_ref())
            && title.len() > MAX_TITLE_LEN {
                return Err(ScheduleError::LimitExceeded("event title too long"));
            }

        let result = self.store.transact(room_id, |tx| {
            let state = tx.state();
            if state.reservations.len() + candidates.len() > MAX_RESERVATIONS_PER_ROOM {
                return Err(ScheduleError::LimitExceeded("too many reservations on room"));
            }
            validate_batch(state, role.as_ref(), now, candidates)?;

            let id = Ulid::new();
            let mut reservations: Vec<Reservation> = candidates
                .iter()
                .map(|&span| Reservation {
                    id: Ulid::new(),
                    room_id,
                    booking_id: id,
                    span,
                })
                .collect();
            reservations.sort_by_key(|r| r.span.start);
            let booking = BookingRequest {
                id,
                room_id,
                holder: draft.holder,
                status: BookingStatus::Committed,
                reference: draft.reference,
                event: draft.event,
                reservations,
            };
            tx.stage(Event::BookingCommitted {
                booking: booking.clone(),
            });
            Ok(booking)
        });

        match result {
            Ok(committed) => {
                let booking = self.published(committed);
                metrics::counter!(BOOKINGS_COMMITTED_TOTAL).increment(1);
                metrics::counter!(RESERVATIONS_COMMITTED_TOTAL)
                    .increment(booking.reservations.len() as u64);
                info!(
                    %room_id,
                    booking_id = %booking.id,
                    reservations = booking.reservations.len(),
                    "booking committed"
                );
                Ok(booking)
            }
            Err(e) => {
                record_rejection("schedule", &e);
                Err(e)
            }
        }
    }

    /// Report every candidate that `schedule` would reject. Changes nothing.
    pub fn check_batch(
        &self,
        room_id: RoomId,
        role: Option<RoleId>,
        now: NaiveDateTime,
        candidates: &[Span],
    ) -> Result<Vec<Violation>, ScheduleError> {
        check_candidates(candidates)?;
        self.store
            .read_room(room_id, |state| find_violations(state, role.as_ref(), now, candidates))
    }

    /// Move one reservation. On any violation the old interval is kept.
    pub fn reschedule(
        &self,
        reservation_id: ReservationId,
        role: Option<RoleId>,
        now: NaiveDateTime,
        span: Span,
    ) -> Result<Reservation, ScheduleError> {
        let room_id = self
            .store
            .room_of(&reservation_id)
            .ok_or(ScheduleError::NotFound(reservation_id))?;

        let result = self.store.transact(room_id, |tx| {
            let state = tx.state();
            let current = state
                .reservation(&reservation_id)
                .ok_or(ScheduleError::NotFound(reservation_id))?;
            validate(state, role.as_ref(), now, &span, Some(reservation_id))?;
            let moved = Reservation {
                span,
                ..current.clone()
            };
            tx.stage(Event::ReservationRescheduled {
                id: reservation_id,
                room_id,
                span,
            });
            Ok(moved)
        });

        match result {
            Ok(committed) => {
                let moved = self.published(committed);
                metrics::counter!(RESCHEDULES_TOTAL).increment(1);
                info!(%room_id, %reservation_id, booking_id = %moved.booking_id, "reservation rescheduled");
                Ok(moved)
            }
            Err(e) => {
                record_rejection("reschedule", &e);
                Err(e)
            }
        }
    }

    /// Set or clear a booking's reference. Returns the reference it replaced.
    pub fn attach_reference(
        &self,
        booking_id: BookingId,
        reference: Option<Reference>,
    ) -> Result<Option<Reference>, ScheduleError> {
        check_reference(reference.as_ref())?;
        let room_id = self
            .store
            .room_of(&booking_id)
            .ok_or(ScheduleError::NotFound(booking_id))?;
        let committed = self.store.transact(room_id, |tx| {
            let previous = tx
                .state()
                .bookings
                .get(&booking_id)
                .ok_or(ScheduleError::NotFound(booking_id))?
                .reference
                .clone();
            tx.stage(Event::ReferenceAttached {
                booking_id,
                room_id,
                reference,
            });
            Ok(previous)
        })?;
        debug!(%room_id, %booking_id, "reference attached");
        Ok(self.published(committed))
    }

    /// Delete a booking with all of its reservations. Returns the removed
    /// booking, reference included.
    pub fn delete_booking(&self, booking_id: BookingId) -> Result<BookingRequest, ScheduleError> {
        let room_id = self
            .store
            .room_of(&booking_id)
            .ok_or(ScheduleError::NotFound(booking_id))?;
        let committed = self.store.transact(room_id, |tx| {
            let booking = tx
                .state()
                .booking(&booking_id)
                .ok_or(ScheduleError::NotFound(booking_id))?;
            tx.stage(Event::BookingDeleted {
                id: booking_id,
                room_id,
            });
            Ok(booking)
        })?;
        let booking = self.published(committed);
        metrics::counter!(BOOKINGS_DELETED_TOTAL).increment(1);
        info!(
            %room_id,
            %booking_id,
            reservations = booking.reservations.len(),
            "booking deleted"
        );
        Ok(booking)
    }
}
