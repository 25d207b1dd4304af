use std::time::Duration;

use tokio::time;

use crate::AppState;

/// Background sweeper for the in-memory session store. Redis backends expire
/// keys themselves; the process-local map needs a hand.
///
/// Runs every **30 seconds**.
pub async fn run(state: AppState) {
    let Some(memory) = state.stores.memory.clone() else {
        return;
    };

    let mut interval = time::interval(Duration::from_secs(30));

    loop {
        interval.tick().await;

        let purged = memory.purge_expired();
        if purged > 0 {
            tracing::debug!(purged, "expiry: dropped expired sessions");
            metrics::counter!("threshold_sessions_expired_total").increment(purged as u64);
        }
    }
}
