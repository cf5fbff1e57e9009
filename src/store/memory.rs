use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};
use ulid::Ulid;

use crate::model::*;
use crate::schedule::ScheduleError;
use crate::wal::Wal;

use super::{enforce_exclusion, Committed, ReservationStore, RoomTx};

pub type SharedRoomState = Arc<RwLock<RoomState>>;

/// In-memory room store, optionally backed by a WAL.
///
/// Lock order is commit gate → room → WAL. The gate is shared by every
/// writer and taken exclusively by compaction so the snapshot never misses
/// a commit that reached the old log.
pub struct MemoryStore {
    rooms: DashMap<RoomId, SharedRoomState>,
    /// Reverse lookup: booking/reservation id → room id
    entity_to_room: DashMap<Ulid, RoomId>,
    wal: Option<Mutex<Wal>>,
    commit_gate: RwLock<()>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// A store without durability, for tests and benches.
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            entity_to_room: DashMap::new(),
            wal: None,
            commit_gate: RwLock::new(()),
        }
    }

    /// Replay the WAL at `path` and keep appending to it.
    pub fn open(path: &Path) -> io::Result<Self> {
        let (wal, events) = Wal::recover(path)?;
        let mut store = Self::new();
        for event in &events {
            store.replay_event(event);
        }
        info!(
            path = %path.display(),
            events = events.len(),
            rooms = store.rooms.len(),
            "WAL replayed"
        );
        store.wal = Some(Mutex::new(wal));
        Ok(store)
    }

    fn replay_event(&self, event: &Event) {
        match event {
            Event::RoomCreated { room } => {
                self.rooms
                    .insert(room.id, Arc::new(RwLock::new(RoomState::new(room.clone()))));
            }
            Event::RoomDeleted { id } => {
                if let Some((_, shared)) = self.rooms.remove(id) {
                    let rs = shared.read().unwrap_or_else(PoisonError::into_inner);
                    self.unmap_room(&rs);
                }
            }
            other => {
                if let Some(shared) = self.get_room(&other.room_id()) {
                    let mut rs = shared.write().unwrap_or_else(PoisonError::into_inner);
                    self.apply(&mut rs, other);
                }
            }
        }
    }

    fn get_room(&self, id: &RoomId) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    /// Lock a room for writing, failing if it was deleted while we waited.
    fn lock_room<'a>(
        &self,
        room_id: RoomId,
        shared: &'a SharedRoomState,
    ) -> Result<std::sync::RwLockWriteGuard<'a, RoomState>, ScheduleError> {
        let guard = shared.write().unwrap_or_else(PoisonError::into_inner);
        let current = self
            .rooms
            .get(&room_id)
            .is_some_and(|e| Arc::ptr_eq(e.value(), shared));
        if !current {
            return Err(ScheduleError::NotFound(room_id));
        }
        Ok(guard)
    }

    fn wal_append(&self, events: &[Event]) -> Result<(), ScheduleError> {
        let Some(wal) = &self.wal else {
            return Ok(());
        };
        let start = std::time::Instant::now();
        let mut wal = wal.lock().unwrap_or_else(PoisonError::into_inner);
        wal.append(events)?;
        metrics::histogram!(crate::observability::WAL_COMMIT_DURATION_SECONDS)
            .record(start.elapsed().as_secs_f64());
        Ok(())
    }

    /// Apply a committed event to a locked room and keep the entity index in step.
    fn apply(&self, rs: &mut RoomState, event: &Event) {
        match event {
            Event::BookingCommitted { booking } => {
                self.entity_to_room.insert(booking.id, booking.room_id);
                for r in &booking.reservations {
                    self.entity_to_room.insert(r.id, r.room_id);
                }
            }
            Event::BookingDeleted { id, .. } => {
                if let Some(record) = rs.bookings.get(id) {
                    for rid in &record.reservation_ids {
                        self.entity_to_room.remove(rid);
                    }
                }
                self.entity_to_room.remove(id);
            }
            _ => {}
        }
        rs.apply(event);
    }

    fn unmap_room(&self, rs: &RoomState) {
        for (booking_id, record) in &rs.bookings {
            self.entity_to_room.remove(booking_id);
            for rid in &record.reservation_ids {
                self.entity_to_room.remove(rid);
            }
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Rewrite the WAL as one snapshot record per room. No-op without a WAL.
    pub fn compact(&self) -> Result<(), ScheduleError> {
        let Some(wal) = &self.wal else {
            return Ok(());
        };
        let _gate = self.commit_gate.write().unwrap_or_else(PoisonError::into_inner);
        let rooms: Vec<SharedRoomState> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let records: Vec<Vec<Event>> = rooms
            .iter()
            .map(|shared| {
                shared
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .snapshot_events()
            })
            .collect();
        let mut wal = wal.lock().unwrap_or_else(PoisonError::into_inner);
        wal.compact(&records)?;
        debug!(rooms = records.len(), "snapshot written");
        Ok(())
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.wal.as_ref().map_or(0, |wal| {
            wal.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .appends_since_compact()
        })
    }
}

impl ReservationStore for MemoryStore {
    fn transact<T>(
        &self,
        room_id: RoomId,
        f: impl FnOnce(&mut RoomTx<'_>) -> Result<T, ScheduleError>,
    ) -> Result<Committed<T>, ScheduleError> {
        let _gate = self.commit_gate.read().unwrap_or_else(PoisonError::into_inner);
        let shared = self
            .get_room(&room_id)
            .ok_or(ScheduleError::NotFound(room_id))?;
        let mut guard = self.lock_room(room_id, &shared)?;

        let mut tx = RoomTx::new(&guard);
        let value = f(&mut tx)?;
        let events = tx.into_staged();
        if events.is_empty() {
            return Ok(Committed { value, events });
        }

        enforce_exclusion(&guard, &events)?;
        self.wal_append(&events)?;
        for event in &events {
            self.apply(&mut guard, event);
        }
        debug!(%room_id, events = events.len(), "committed");
        Ok(Committed { value, events })
    }

    fn room_of(&self, entity_id: &Ulid) -> Option<RoomId> {
        self.entity_to_room.get(entity_id).map(|e| *e.value())
    }

    fn read_room<T>(
        &self,
        room_id: RoomId,
        f: impl FnOnce(&RoomState) -> T,
    ) -> Result<T, ScheduleError> {
        let shared = self
            .get_room(&room_id)
            .ok_or(ScheduleError::NotFound(room_id))?;
        let guard = shared.read().unwrap_or_else(PoisonError::into_inner);
        Ok(f(&guard))
    }

    fn room_ids(&self) -> Vec<RoomId> {
        self.rooms.iter().map(|e| *e.key()).collect()
    }

    fn create_room(&self, room: Room) -> Result<(), ScheduleError> {
        let _gate = self.commit_gate.read().unwrap_or_else(PoisonError::into_inner);
        match self.rooms.entry(room.id) {
            Entry::Occupied(_) => Err(ScheduleError::AlreadyExists(room.id)),
            Entry::Vacant(slot) => {
                self.wal_append(&[Event::RoomCreated { room: room.clone() }])?;
                slot.insert(Arc::new(RwLock::new(RoomState::new(room))));
                Ok(())
            }
        }
    }

    fn delete_room(&self, room_id: RoomId) -> Result<RoomState, ScheduleError> {
        let _gate = self.commit_gate.read().unwrap_or_else(PoisonError::into_inner);
        let shared = self
            .get_room(&room_id)
            .ok_or(ScheduleError::NotFound(room_id))?;
        let guard = self.lock_room(room_id, &shared)?;
        self.wal_append(&[Event::RoomDeleted { id: room_id }])?;
        self.rooms.remove(&room_id);
        self.unmap_room(&guard);
        Ok(guard.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::Weekday;

    use super::*;
    use crate::model::fixtures::{at, hm};

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("roomd_test_store");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn booking_event(room_id: RoomId, spans: &[Span]) -> BookingRequest {
        let id = Ulid::new();
        BookingRequest {
            id,
            room_id,
            holder: Ulid::new(),
            status: BookingStatus::Committed,
            reference: None,
            event: None,
            reservations: spans
                .iter()
                .map(|&span| Reservation {
                    id: Ulid::new(),
                    room_id,
                    booking_id: id,
                    span,
                })
                .collect(),
        }
    }

    fn commit_booking(store: &MemoryStore, room_id: RoomId, spans: &[Span]) -> BookingRequest {
        let booking = booking_event(room_id, spans);
        let staged = booking.clone();
        store
            .transact(room_id, move |tx| {
                tx.stage(Event::BookingCommitted { booking: staged });
                Ok(())
            })
            .unwrap();
        booking
    }

    #[test]
    fn create_and_read_room() {
        let store = MemoryStore::new();
        let room = Room::new(Ulid::new(), "Hall");
        store.create_room(room.clone()).unwrap();

        assert_eq!(
            store.create_room(room.clone()),
            Err(ScheduleError::AlreadyExists(room.id))
        );
        assert_eq!(store.read_room(room.id, |rs| rs.room.name.clone()).unwrap(), "Hall");
        assert_eq!(store.room_ids(), vec![room.id]);
        let missing = Ulid::new();
        assert_eq!(
            store.read_room(missing, |_| ()),
            Err(ScheduleError::NotFound(missing))
        );
    }

    #[test]
    fn commit_maps_entities() {
        let store = MemoryStore::new();
        let room = Room::new(Ulid::new(), "Hall");
        store.create_room(room.clone()).unwrap();

        let booking = commit_booking(&store, room.id, &[Span::new(at(19, 9, 0), at(19, 10, 0))]);
        assert_eq!(store.room_of(&booking.id), Some(room.id));
        assert_eq!(store.room_of(&booking.reservations[0].id), Some(room.id));
        assert_eq!(store.read_room(room.id, |rs| rs.reservations.len()).unwrap(), 1);
    }

    #[test]
    fn failed_closure_commits_nothing() {
        let store = MemoryStore::new();
        let room = Room::new(Ulid::new(), "Hall");
        store.create_room(room.clone()).unwrap();

        let booking = booking_event(room.id, &[Span::new(at(19, 9, 0), at(19, 10, 0))]);
        let result: Result<Committed<()>, _> = store.transact(room.id, |tx| {
            tx.stage(Event::BookingCommitted { booking });
            Err(ScheduleError::OutsideAvailability)
        });
        assert_eq!(result.unwrap_err(), ScheduleError::OutsideAvailability);
        assert!(store.read_room(room.id, |rs| rs.bookings.is_empty()).unwrap());
    }

    #[test]
    fn exclusion_enforced_at_commit() {
        let store = MemoryStore::new();
        let room = Room::new(Ulid::new(), "Hall");
        store.create_room(room.clone()).unwrap();
        let first = commit_booking(&store, room.id, &[Span::new(at(19, 9, 0), at(19, 10, 0))]);

        // A closure that skips validation still cannot commit an overlap.
        let clash = booking_event(
            room.id,
            &[
                Span::new(at(20, 9, 0), at(20, 10, 0)),
                Span::new(at(19, 9, 30), at(19, 10, 30)),
            ],
        );
        let clash_id = clash.id;
        let err = store
            .transact(room.id, |tx| {
                tx.stage(Event::BookingCommitted { booking: clash });
                Ok(())
            })
            .unwrap_err();
        assert_eq!(
            err,
            ScheduleError::Overlap {
                reservation_id: first.reservations[0].id
            }
        );
        assert_eq!(store.read_room(room.id, |rs| rs.reservations.len()).unwrap(), 1);
        assert_eq!(store.room_of(&clash_id), None);
    }

    #[test]
    fn delete_room_unmaps_entities_and_fails_later_transactions() {
        let store = MemoryStore::new();
        let room = Room::new(Ulid::new(), "Hall");
        store.create_room(room.clone()).unwrap();
        let booking = commit_booking(&store, room.id, &[Span::new(at(19, 9, 0), at(19, 10, 0))]);

        let removed = store.delete_room(room.id).unwrap();
        assert_eq!(removed.bookings.len(), 1);
        assert_eq!(store.room_of(&booking.id), None);
        assert_eq!(store.room_of(&booking.reservations[0].id), None);
        assert_eq!(
            store.transact(room.id, |_| Ok(())).unwrap_err(),
            ScheduleError::NotFound(room.id)
        );
        assert_eq!(store.delete_room(room.id).unwrap_err(), ScheduleError::NotFound(room.id));
    }

    #[test]
    fn replay_restores_rooms_and_bookings() {
        let path = test_wal_path("replay.wal");
        let room = Room::new(Ulid::new(), "Hall");
        let gone = Room::new(Ulid::new(), "Shed");
        let window = AvailabilityWindow::new(Weekday::Mon, hm(8, 0), hm(18, 0));
        let booking;
        {
            let store = MemoryStore::open(&path).unwrap();
            store.create_room(room.clone()).unwrap();
            store.create_room(gone.clone()).unwrap();
            store
                .transact(room.id, |tx| {
                    tx.stage(Event::AvailabilitySet {
                        room_id: room.id,
                        windows: vec![window],
                    });
                    Ok(())
                })
                .unwrap();
            booking = commit_booking(&store, room.id, &[Span::new(at(19, 9, 0), at(19, 10, 0))]);
            store.delete_room(gone.id).unwrap();
        }

        let store = MemoryStore::open(&path).unwrap();
        assert_eq!(store.room_ids(), vec![room.id]);
        assert_eq!(store.room_of(&booking.reservations[0].id), Some(room.id));
        let (windows, restored) = store
            .read_room(room.id, |rs| (rs.windows.clone(), rs.booking(&booking.id)))
            .unwrap();
        assert_eq!(windows, vec![window]);
        assert_eq!(restored, Some(booking));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn compaction_keeps_state() {
        let path = test_wal_path("compact.wal");
        let room = Room::new(Ulid::new(), "Hall");
        let booking;
        {
            let store = MemoryStore::open(&path).unwrap();
            store.create_room(room.clone()).unwrap();
            for day in [19, 20, 21] {
                let b = commit_booking(&store, room.id, &[Span::new(at(day, 9, 0), at(day, 10, 0))]);
                store
                    .transact(room.id, |tx| {
                        tx.stage(Event::BookingDeleted { id: b.id, room_id: room.id });
                        Ok(())
                    })
                    .unwrap();
            }
            booking = commit_booking(&store, room.id, &[Span::new(at(26, 9, 0), at(26, 10, 0))]);
            assert_eq!(store.appends_since_compact(), 8);

            store.compact().unwrap();
            assert_eq!(store.appends_since_compact(), 0);
        }

        let store = MemoryStore::open(&path).unwrap();
        let restored = store.read_room(room.id, |rs| rs.booking(&booking.id)).unwrap();
        assert_eq!(restored, Some(booking));
        assert_eq!(store.read_room(room.id, |rs| rs.bookings.len()).unwrap(), 1);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn concurrent_transactions_are_serialized() {
        let store = Arc::new(MemoryStore::new());
        let room = Room::new(Ulid::new(), "Hall");
        store.create_room(room.clone()).unwrap();
        let room_id = room.id;
        let span = Span::new(at(19, 9, 0), at(19, 10, 0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store.transact(room_id, |tx| {
                        if tx.state().overlapping(&span).next().is_some() {
                            return Err(ScheduleError::Overlap {
                                reservation_id: Ulid::nil(),
                            });
                        }
                        tx.stage(Event::BookingCommitted {
                            booking: booking_event(room_id, &[span]),
                        });
                        Ok(())
                    })
                })
            })
            .collect();
        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(Result::is_ok)
            .count();
        assert_eq!(successes, 1);
        assert_eq!(store.read_room(room.id, |rs| rs.reservations.len()).unwrap(), 1);
    }
}
