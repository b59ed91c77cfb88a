//! Background cleanup task.
//!
//! Runs periodically to delete long-expired invites and to evict idle
//! identities from the rate limiters.

use crate::config::CleanupConfig;
use crate::limits::RateLimits;
use crate::storage::{InviteStore, SqliteStorage};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

/// Spawn a background cleanup task.
///
/// Returns a handle that can be used to abort the task.
pub fn spawn_cleanup_task(
    storage: Arc<SqliteStorage>,
    rate_limits: RateLimits,
    config: CleanupConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if !config.enabled {
            tracing::info!("Cleanup task disabled");
            return;
        }

        let interval_secs = config.interval_secs.max(1);
        let retention = Duration::from_secs(config.invite_retention_secs);
        tracing::info!("Cleanup task started (interval: {}s)", interval_secs);

        let mut timer = interval(Duration::from_secs(interval_secs));

        loop {
            timer.tick().await;
            run_once(&storage, &rate_limits, retention).await;
        }
    })
}

/// One cleanup pass.
async fn run_once(storage: &SqliteStorage, rate_limits: &RateLimits, retention: Duration) {
    match storage.purge_expired_invites(retention).await {
        Ok(0) => tracing::debug!("Cleanup: no expired invites"),
        Ok(deleted) => tracing::info!("Cleanup: deleted {} expired invites", deleted),
        Err(e) => tracing::error!("Cleanup error: {}", e),
    }

    rate_limits.shrink();
}
