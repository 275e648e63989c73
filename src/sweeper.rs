use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::{today, Engine};
use crate::model::Day;

/// Move every confirmed stay whose check-out day has arrived to `completed`.
/// Returns how many reservations were completed.
pub async fn sweep_once(engine: &Engine, today: Day) -> usize {
    let mut completed = 0;
    for (reservation_id, _property_id) in engine.collect_elapsed_stays(today) {
        match engine.complete_reservation(reservation_id.clone(), today).await {
            Ok(_) => completed += 1,
            Err(e) => {
                // Cancelled or completed concurrently since collection
                debug!("sweeper skip {reservation_id}: {e}");
            }
        }
    }
    completed
}

/// Background task that completes elapsed stays on every tick.
pub async fn run_sweeper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let n = sweep_once(&engine, today()).await;
        if n > 0 {
            info!("completed {n} elapsed stays");
        }
    }
}

/// Background task that compacts the WAL once `threshold` appends have
/// accumulated since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
}
