//! Health check endpoint.
//!
//! Reports whether the prekey store answers queries alongside live relay
//! state. A store that cannot be reached turns the status to `degraded`
//! and the response to 503.

use crate::server::ChatRelay;
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Serialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

static START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Record process start for uptime reporting.
pub fn init_start_time() {
    START_TIME.get_or_init(Instant::now);
}

/// Health status response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// `ok` or `degraded`.
    pub status: &'static str,
    /// Server version.
    pub version: &'static str,
    /// Whether the prekey store answered a probe query.
    pub store_reachable: bool,
    /// Identities with a live relay connection.
    pub connections: usize,
    /// Bundles served since start.
    pub bundles_served: u64,
    /// Bundles served without a one-time key since start.
    pub bundles_without_one_time_key: u64,
    /// Uptime in seconds.
    pub uptime_seconds: u64,
}

impl HealthStatus {
    fn snapshot(relay: &ChatRelay, store_reachable: bool) -> Self {
        let metrics = relay.metrics();
        let served = metrics.bundles_served.load(Ordering::Relaxed);
        let claimed = metrics.one_time_keys_claimed.load(Ordering::Relaxed);

        Self {
            status: if store_reachable { "ok" } else { "degraded" },
            version: env!("CARGO_PKG_VERSION"),
            store_reachable,
            connections: relay.active_connections(),
            bundles_served: served,
            bundles_without_one_time_key: served.saturating_sub(claimed),
            uptime_seconds: START_TIME.get().map_or(0, |start| start.elapsed().as_secs()),
        }
    }
}

/// `GET /health`
pub async fn health_handler(
    Extension(relay): Extension<Arc<ChatRelay>>,
) -> (StatusCode, Json<HealthStatus>) {
    let store_reachable = match relay.storage().ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!("Health check could not reach the store: {}", e);
            false
        }
    };

    let code = if store_reachable {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(HealthStatus::snapshot(&relay, store_reachable)))
}
