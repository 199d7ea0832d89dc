use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::observability;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Compact once `threshold` appends have piled up since the last compaction.
/// Returns whether a compaction ran.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let pending = engine.wal_appends_since_compact().await;
    if pending < threshold {
        debug!(pending, threshold, "compaction not due");
        return false;
    }
    match engine.compact_wal().await {
        Ok(records) => {
            metrics::counter!(observability::WAL_COMPACTIONS_TOTAL).increment(1);
            info!(pending, records, "compacted assignment log");
            true
        }
        Err(e) => {
            warn!("compaction failed, will retry: {e}");
            false
        }
    }
}

/// Background task that keeps the assignment log short.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_due(&engine, threshold).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MemoryDirectory;
    use crate::model::{Reservation, ReservationStatus};
    use crate::notify::NotifyHub;
    use crate::window::BufferConfig;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("seatline_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn reservation(id: u64, time: &str) -> Reservation {
        Reservation {
            id,
            people: 2,
            date: "2025-01-01".into(),
            time: Some(time.into()),
            status: ReservationStatus::Booked,
        }
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let engine = Engine::new(
            path.clone(),
            Arc::new(NotifyHub::new()),
            BufferConfig::default(),
            Arc::new(MemoryDirectory::new()),
        )
        .unwrap();

        engine.create_assignment(1, &reservation(1, "12:00")).await.unwrap();
        assert!(!compact_if_due(&engine, 2).await);

        engine.create_assignment(1, &reservation(2, "18:00")).await.unwrap();
        engine.cancel_assignment(1).await.unwrap();
        assert!(compact_if_due(&engine, 2).await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);

        // Snapshot holds one record per assignment.
        assert_eq!(crate::wal::Wal::replay(&path).unwrap().len(), 2);
    }
}
