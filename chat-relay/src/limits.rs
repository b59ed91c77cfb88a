//! Rate limiting for chat-relay.
//!
//! Protects the signaling relay against reconnect storms and frame spam.
//! Limits are keyed by the authenticated identity rather than by address,
//! since clients commonly share NAT addresses.
//!
//! Keyed limiters use governor's DashMap-backed state.

use crate::config::LimitsConfig;
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Type alias for a keyed rate limiter using DashMap.
type KeyedLimiter<K> = RateLimiter<
    K,
    dashmap::DashMap<K, InMemoryState>,
    DefaultClock,
    NoOpMiddleware<governor::clock::QuantaInstant>,
>;

/// Type alias for a direct (non-keyed) rate limiter.
type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Rate limiters for the relay server.
#[derive(Clone)]
pub struct RateLimits {
    /// Relay connection attempts per identity.
    connection_limiter: Arc<KeyedLimiter<String>>,

    /// Relay frames per identity.
    message_limiter: Arc<KeyedLimiter<String>>,

    /// Relay frames across all identities.
    global_limiter: Arc<DirectLimiter>,
}

impl std::fmt::Debug for RateLimits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimits")
            .field("connection_keys", &self.connection_limiter.len())
            .field("message_keys", &self.message_limiter.len())
            .field("global_limiter", &"DirectLimiter")
            .finish()
    }
}

fn non_zero(value: u32) -> NonZeroU32 {
    NonZeroU32::new(value).unwrap_or(NonZeroU32::MIN)
}

impl RateLimits {
    /// Create rate limiters from configuration.
    ///
    /// Zero values are rejected by [`crate::config::Config::validate`]; if one
    /// slips through it is treated as a quota of one.
    pub fn new(config: &LimitsConfig) -> Self {
        let connection_quota = Quota::per_minute(non_zero(config.connections_per_minute));
        let message_quota = Quota::per_minute(non_zero(config.messages_per_minute));
        let global_quota = Quota::per_second(non_zero(config.global_messages_per_second));

        Self {
            connection_limiter: Arc::new(RateLimiter::keyed(connection_quota)),
            message_limiter: Arc::new(RateLimiter::keyed(message_quota)),
            global_limiter: Arc::new(RateLimiter::direct(global_quota)),
        }
    }

    /// Check if a relay connection for `identity` is allowed.
    pub fn check_connection(&self, identity: &str) -> Result<(), RateLimitError> {
        self.connection_limiter
            .check_key(&identity.to_string())
            .map_err(|_| RateLimitError::ConnectionLimitExceeded)
    }

    /// Check if `identity` may send another frame.
    pub fn check_message(&self, identity: &str) -> Result<(), RateLimitError> {
        self.message_limiter
            .check_key(&identity.to_string())
            .map_err(|_| RateLimitError::MessageLimitExceeded)
    }

    /// Check the server-wide frame rate.
    pub fn check_global(&self) -> Result<(), RateLimitError> {
        self.global_limiter
            .check()
            .map_err(|_| RateLimitError::GlobalLimitExceeded)
    }

    /// Number of tracked connection keys (for metrics).
    pub fn connection_keys_count(&self) -> usize {
        self.connection_limiter.len()
    }

    /// Number of tracked message keys (for metrics).
    pub fn message_keys_count(&self) -> usize {
        self.message_limiter.len()
    }

    /// Evict idle identities from the keyed limiters.
    ///
    /// Entries whose cells have fully recharged are dropped. Called
    /// periodically from the cleanup task.
    pub fn shrink(&self) {
        self.connection_limiter.retain_recent();
        self.message_limiter.retain_recent();
    }
}

/// Rate limit error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    /// Too many relay connections from this identity.
    #[error("connection rate limit exceeded")]
    ConnectionLimitExceeded,
    /// Too many frames from this identity.
    #[error("message rate limit exceeded")]
    MessageLimitExceeded,
    /// Too many frames across the whole relay.
    #[error("global rate limit exceeded")]
    GlobalLimitExceeded,
}
