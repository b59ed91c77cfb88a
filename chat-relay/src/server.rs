//! Main ChatRelay server coordination.
//!
//! ChatRelay owns storage, the live connection registry, rate limiters and
//! the credential verifier, and is shared by every HTTP and WebSocket task.

use crate::auth::{PrefixTokenAuthenticator, TokenAuthenticator};
use crate::config::Config;
use crate::limits::RateLimits;
use crate::registry::ConnectionRegistry;
use crate::storage::SqliteStorage;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

/// Operational metrics for monitoring relay activity.
///
/// All counters are monotonically increasing (reset only on restart).
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Relay connections accepted after authentication.
    pub connections_total: AtomicU64,
    /// Envelopes delivered to a recipient's queue.
    pub envelopes_forwarded: AtomicU64,
    /// Envelopes dropped (malformed, no recipient, recipient offline or busy).
    pub envelopes_dropped: AtomicU64,
    /// Deliveries that failed because the recipient's connection was gone.
    pub forward_failures: AtomicU64,
    /// Prekey bundles served.
    pub bundles_served: AtomicU64,
    /// One-time prekeys handed out.
    pub one_time_keys_claimed: AtomicU64,
    /// Successful prekey publishes.
    pub prekeys_published: AtomicU64,
    /// Backup blobs stored.
    pub backups_stored: AtomicU64,
    /// Invite codes minted.
    pub invites_created: AtomicU64,
    /// Invite codes redeemed.
    pub invites_consumed: AtomicU64,
    /// Rate limit rejections (connection + message + global).
    pub rate_limit_hits: AtomicU64,
    /// Internal errors (storage failures, auth failures on the relay).
    pub errors_total: AtomicU64,
}

/// Main relay server.
pub struct ChatRelay {
    config: Config,
    storage: Arc<SqliteStorage>,
    authenticator: Arc<dyn TokenAuthenticator>,
    registry: ConnectionRegistry,
    rate_limits: RateLimits,
    metrics: RelayMetrics,
}

impl std::fmt::Debug for ChatRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatRelay")
            .field("config", &self.config)
            .field("rate_limits", &self.rate_limits)
            .field("metrics", &self.metrics)
            .field("connections", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl ChatRelay {
    /// Create a relay that accepts `<token_prefix><userId>` tokens.
    pub fn new(config: Config, storage: SqliteStorage) -> Self {
        let authenticator = Arc::new(PrefixTokenAuthenticator::new(config.auth.token_prefix.clone()));
        Self::with_authenticator(config, storage, authenticator)
    }

    /// Create a relay with a custom credential verifier.
    pub fn with_authenticator(
        config: Config,
        storage: SqliteStorage,
        authenticator: Arc<dyn TokenAuthenticator>,
    ) -> Self {
        let rate_limits = RateLimits::new(&config.limits);
        Self {
            config,
            storage: Arc::new(storage),
            authenticator,
            registry: ConnectionRegistry::new(),
            rate_limits,
            metrics: RelayMetrics::default(),
        }
    }

    /// Get the relay configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get access to the storage layer.
    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    /// Get a clone of the storage Arc for background tasks.
    pub fn storage_arc(&self) -> Arc<SqliteStorage> {
        self.storage.clone()
    }

    /// Get the credential verifier.
    pub fn authenticator(&self) -> &dyn TokenAuthenticator {
        self.authenticator.as_ref()
    }

    /// Get the live connection registry.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Get access to the rate limiters.
    pub fn rate_limits(&self) -> &RateLimits {
        &self.rate_limits
    }

    /// Get access to the operational metrics.
    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Number of identities with a live relay connection.
    pub fn active_connections(&self) -> usize {
        self.registry.len()
    }
}
