pub mod advance;
pub mod batch;
pub mod calendar;
pub mod conflict;
mod error;
mod mutations;
mod queries;
pub mod validator;

pub use batch::Violation;
pub use error::{ErrorKind, ScheduleError};
pub use queries::RoomFilter;
pub use validator::validate;

use std::sync::Arc;

use crate::model::Event;
use crate::notify::NotifyHub;
use crate::store::{Committed, ReservationStore};

/// Room scheduling service: validates requests against a room's snapshot
/// and commits them through the store's transaction.
pub struct Scheduler<S> {
    store: Arc<S>,
    notify: Arc<NotifyHub>,
}

impl<S: ReservationStore> Scheduler<S> {
    pub fn new(store: Arc<S>, notify: Arc<NotifyHub>) -> Self {
        Self { store, notify }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn notify(&self) -> &Arc<NotifyHub> {
        &self.notify
    }

    /// Hand the events of a commit to watchers and return the value.
    fn published<T>(&self, committed: Committed<T>) -> T {
        self.notify.publish(&committed.events);
        committed.value
    }

    fn publish_one(&self, event: &Event) {
        self.notify.send(event.room_id(), event);
    }
}
