mod memory;

pub use memory::MemoryStore;

use ulid::Ulid;

use crate::model::*;
use crate::schedule::ScheduleError;

/// Persistence boundary of the scheduler.
///
/// `transact` is the only way to change a room: the closure sees a
/// consistent snapshot and stages events; the store commits them as a unit
/// or not at all. No other transaction on the same room can interleave
/// between the closure's reads and the commit.
pub trait ReservationStore: Send + Sync {
    fn transact<T>(
        &self,
        room_id: RoomId,
        f: impl FnOnce(&mut RoomTx<'_>) -> Result<T, ScheduleError>,
    ) -> Result<Committed<T>, ScheduleError>;

    /// Room owning a booking or reservation.
    fn room_of(&self, entity_id: &Ulid) -> Option<RoomId>;

    fn read_room<T>(
        &self,
        room_id: RoomId,
        f: impl FnOnce(&RoomState) -> T,
    ) -> Result<T, ScheduleError>;

    fn room_ids(&self) -> Vec<RoomId>;

    fn create_room(&self, room: Room) -> Result<(), ScheduleError>;

    /// Remove the room with all its bookings, returning its final state.
    fn delete_room(&self, room_id: RoomId) -> Result<RoomState, ScheduleError>;
}

/// A room transaction in progress.
pub struct RoomTx<'a> {
    state: &'a RoomState,
    staged: Vec<Event>,
}

impl<'a> RoomTx<'a> {
    pub fn new(state: &'a RoomState) -> Self {
        Self {
            state,
            staged: Vec::new(),
        }
    }

    /// Persisted state as of the start of the transaction. Staged events
    /// are not visible here.
    pub fn state(&self) -> &'a RoomState {
        self.state
    }

    pub fn stage(&mut self, event: Event) {
        self.staged.push(event);
    }

    pub fn into_staged(self) -> Vec<Event> {
        self.staged
    }
}

/// Result of a successful transaction, with the events it committed.
#[derive(Debug)]
pub struct Committed<T> {
    pub value: T,
    pub events: Vec<Event>,
}

/// Exclusion constraint checked at commit time: no staged reservation may
/// overlap a persisted reservation of the room.
pub fn enforce_exclusion(state: &RoomState, staged: &[Event]) -> Result<(), ScheduleError> {
    for event in staged {
        match event {
            Event::BookingCommitted { booking } => {
                for r in &booking.reservations {
                    if let Some(existing) = state.overlapping(&r.span).next() {
                        return Err(ScheduleError::Overlap {
                            reservation_id: existing.id,
                        });
                    }
                }
            }
            Event::ReservationRescheduled { id, span, .. } => {
                if let Some(existing) = state.overlapping(span).find(|r| r.id != *id) {
                    return Err(ScheduleError::Overlap {
                        reservation_id: existing.id,
                    });
                }
            }
            _ => {}
        }
    }
    Ok(())
}
