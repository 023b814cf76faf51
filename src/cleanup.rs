//! Scheduled cleanup of expired session-cache entries.
//!
//! Expiry is enforced at read time (every query filters on `expires_at`),
//! so this task only reclaims storage; correctness never depends on it.

use crate::cache::SessionCache;
use std::time::Duration;
use tracing::{error, info};

/// Interval between cleanup runs.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60); // 1 hour

/// Run all cleanup tasks once.
pub async fn run_cleanup(cache: &SessionCache) {
    match cache.purge_expired().await {
        Ok(count) if count > 0 => info!("Purged {} expired cache entries", count),
        Ok(_) => {}
        Err(e) => error!("Failed to purge expired cache entries: {}", e),
    }
}

/// Spawn a background task that runs cleanup periodically.
/// Returns a handle that can be used to abort the task.
pub fn spawn_cleanup_scheduler(cache: SessionCache) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);

        loop {
            interval.tick().await;
            run_cleanup(&cache).await;
        }
    })
}
