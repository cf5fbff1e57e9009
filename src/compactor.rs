use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use crate::store::MemoryStore;

/// Background task that compacts the WAL once enough transactions have
/// been appended since the last compaction.
pub async fn run_compactor(store: Arc<MemoryStore>, threshold: u64, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        if store.appends_since_compact() < threshold {
            continue;
        }
        let store = store.clone();
        match tokio::task::spawn_blocking(move || store.compact()).await {
            Ok(Ok(())) => debug!("compaction finished"),
            Ok(Err(e)) => error!("compaction failed: {e}"),
            Err(e) => error!("compaction task panicked: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Room;
    use crate::store::ReservationStore;
    use ulid::Ulid;

    #[tokio::test]
    async fn compacts_past_threshold() {
        let dir = std::env::temp_dir().join("roomd_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("threshold.wal");
        let _ = std::fs::remove_file(&path);

        let store = Arc::new(MemoryStore::open(&path).unwrap());
        for i in 0..5 {
            store
                .create_room(Room::new(Ulid::new(), format!("Room {i}")))
                .unwrap();
        }
        assert_eq!(store.appends_since_compact(), 5);

        let task = tokio::spawn(run_compactor(store.clone(), 3, Duration::from_millis(10)));
        for _ in 0..100 {
            if store.appends_since_compact() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        task.abort();

        assert_eq!(store.appends_since_compact(), 0);
        let reopened = MemoryStore::open(&path).unwrap();
        assert_eq!(reopened.room_count(), 5);

        let _ = std::fs::remove_file(&path);
    }
}
