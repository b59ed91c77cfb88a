//! Per-connection relay session.
//!
//! Each authenticated WebSocket gets a Session that registers the identity,
//! forwards inbound envelopes to their recipients and writes queued frames
//! back out.

use crate::auth::AuthError;
use crate::registry::{ConnectionHandle, Registration, SendError};
use crate::server::ChatRelay;
use axum::extract::ws::{Message, WebSocket};
use chat_types::{SignalEnvelope, UserId};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Session state machine states.
///
/// `Connecting -> Authenticated -> Relaying -> Closed`; a failed
/// authentication never leaves `Connecting`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Socket upgraded, credential not yet checked.
    Connecting,
    /// Credential verified, not yet registered.
    Authenticated {
        /// The authenticated identity.
        identity: UserId,
    },
    /// Registered and relaying frames.
    Relaying {
        /// The authenticated identity.
        identity: UserId,
    },
    /// Connection finished; registration released.
    Closed,
}

/// What happened to one inbound text frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Queued on the recipient's connection.
    Forwarded,
    /// Not a valid envelope.
    Malformed,
    /// Envelope had no usable `to`.
    MissingRecipient,
    /// Recipient has no live connection.
    RecipientOffline,
    /// Recipient's outbound queue is full; frame dropped, mapping kept.
    RecipientBusy,
    /// Recipient's connection had already closed; its mapping was removed.
    RecipientGone,
    /// Sender exceeded a frame rate limit.
    RateLimited,
}

/// Route one inbound text frame from `sender`.
///
/// The relay never answers the sender: every outcome other than
/// [`RouteOutcome::Forwarded`] drops the frame silently.
pub fn route_frame(relay: &ChatRelay, sender: &str, text: &str) -> RouteOutcome {
    let metrics = relay.metrics();
    let limits = relay.rate_limits();

    if let Err(e) = limits.check_global().and_then(|()| limits.check_message(sender)) {
        tracing::warn!("Dropping frame from {}: {}", sender, e);
        metrics.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
        metrics.envelopes_dropped.fetch_add(1, Ordering::Relaxed);
        return RouteOutcome::RateLimited;
    }

    let envelope = match SignalEnvelope::parse(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::debug!("Ignoring malformed frame from {}: {}", sender, e);
            metrics.envelopes_dropped.fetch_add(1, Ordering::Relaxed);
            return RouteOutcome::Malformed;
        }
    };

    let Some(recipient) = envelope.recipient().map(str::to_string) else {
        tracing::debug!("Ignoring {} frame from {} without recipient", envelope.kind, sender);
        metrics.envelopes_dropped.fetch_add(1, Ordering::Relaxed);
        return RouteOutcome::MissingRecipient;
    };

    let Some(handle) = relay.registry().lookup(&recipient) else {
        tracing::debug!("Recipient {} offline, dropping {} frame", recipient, envelope.kind);
        metrics.envelopes_dropped.fetch_add(1, Ordering::Relaxed);
        return RouteOutcome::RecipientOffline;
    };

    let (kind, payload_len) = (envelope.kind.clone(), envelope.payload.len());
    let frame = match envelope.with_sender(sender).to_json() {
        Ok(frame) => frame,
        Err(e) => {
            tracing::error!("Failed to encode envelope for {}: {}", recipient, e);
            metrics.errors_total.fetch_add(1, Ordering::Relaxed);
            return RouteOutcome::Malformed;
        }
    };

    match handle.try_send(frame) {
        Ok(()) => {
            tracing::debug!(
                "Forwarded {} frame {} -> {} ({} bytes)",
                kind,
                sender,
                recipient,
                payload_len
            );
            metrics.envelopes_forwarded.fetch_add(1, Ordering::Relaxed);
            RouteOutcome::Forwarded
        }
        Err(SendError::Full) => {
            tracing::warn!("Outbound queue full for {}, dropping frame", recipient);
            metrics.envelopes_dropped.fetch_add(1, Ordering::Relaxed);
            RouteOutcome::RecipientBusy
        }
        Err(SendError::Closed) => {
            relay.registry().deregister(&recipient, &handle);
            tracing::debug!("Recipient {} went away, removed connection {}", recipient, handle.id());
            metrics.forward_failures.fetch_add(1, Ordering::Relaxed);
            RouteOutcome::RecipientGone
        }
    }
}

/// A per-connection session.
pub struct Session {
    relay: Arc<ChatRelay>,
    state: SessionState,
}

impl Session {
    /// Create a session for a freshly upgraded socket.
    pub fn new(relay: Arc<ChatRelay>) -> Self {
        Self {
            relay,
            state: SessionState::Connecting,
        }
    }

    /// Current state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Verify the connection credential.
    ///
    /// `claimed` is the identity named in the connection address, if any;
    /// it must match the token's identity.
    pub fn authenticate(&mut self, token: &str, claimed: Option<&str>) -> Result<UserId, AuthError> {
        let authenticator = self.relay.authenticator();
        let identity = match claimed {
            Some(claimed) => authenticator.authenticate_as(token, claimed)?,
            None => authenticator.authenticate(token)?,
        };

        self.state = SessionState::Authenticated {
            identity: identity.clone(),
        };
        Ok(identity)
    }

    /// Run the session until the socket closes.
    ///
    /// Only an authenticated session relays; any other state drops the socket.
    pub async fn run(mut self, socket: WebSocket) {
        let identity = match &self.state {
            SessionState::Authenticated { identity } => identity.clone(),
            other => {
                tracing::warn!("Refusing to relay for session in state {:?}", other);
                return;
            }
        };

        let (mut ws_sender, mut ws_receiver) = socket.split();
        let (tx, mut rx) = mpsc::channel::<String>(self.relay.config().limits.outbound_queue);

        let registration = Registration::new(
            self.relay.registry().clone(),
            identity.to_string(),
            ConnectionHandle::new(tx),
        );
        self.state = SessionState::Relaying {
            identity: identity.clone(),
        };
        tracing::info!(
            "{} connected (connection {})",
            identity,
            registration.handle().id()
        );

        let writer = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if ws_sender.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            }
        });

        while let Some(message) = ws_receiver.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    let outcome = route_frame(&self.relay, identity.as_str(), &text);
                    tracing::trace!("Frame from {}: {:?}", identity, outcome);
                }
                Ok(Message::Close(_)) => break,
                // Binary frames carry nothing for the relay; pings are answered by axum
                Ok(Message::Binary(_) | Message::Ping(_) | Message::Pong(_)) => {}
                Err(e) => {
                    tracing::debug!("WebSocket error for {}: {}", identity, e);
                    break;
                }
            }
        }

        self.state = SessionState::Closed;
        drop(registration);
        writer.abort();
        tracing::info!("{} disconnected", identity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::SqliteStorage;

    async fn test_relay(config: Config) -> ChatRelay {
        ChatRelay::new(config, SqliteStorage::in_memory().await.unwrap())
    }

    fn connect(relay: &ChatRelay, identity: &str, capacity: usize) -> (ConnectionHandle, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        let handle = ConnectionHandle::new(tx);
        relay.registry().register(identity, handle.clone());
        (handle, rx)
    }

    #[tokio::test]
    async fn forwards_with_authenticated_sender() {
        let relay = test_relay(Config::default()).await;
        let (_bob, mut bob_rx) = connect(&relay, "bob", 4);

        let frame = r#"{"to":"bob","from":"mallory","type":"offer","payload":"sdp"}"#;
        assert_eq!(route_frame(&relay, "alice", frame), RouteOutcome::Forwarded);

        let delivered = SignalEnvelope::parse(&bob_rx.try_recv().unwrap()).unwrap();
        assert_eq!(delivered.from.as_deref(), Some("alice"));
        assert_eq!(delivered.to.as_deref(), Some("bob"));
        assert_eq!(delivered.kind, "offer");
        assert_eq!(delivered.payload, "sdp");
        assert_eq!(relay.metrics().envelopes_forwarded.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn offline_recipient_is_dropped_silently() {
        let relay = test_relay(Config::default()).await;
        let frame = r#"{"to":"carol","type":"offer","payload":"x"}"#;
        assert_eq!(route_frame(&relay, "alice", frame), RouteOutcome::RecipientOffline);
        assert_eq!(relay.metrics().envelopes_dropped.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn malformed_and_unaddressed_frames_are_ignored() {
        let relay = test_relay(Config::default()).await;
        let (_bob, mut bob_rx) = connect(&relay, "bob", 4);

        assert_eq!(route_frame(&relay, "alice", "not json"), RouteOutcome::Malformed);
        assert_eq!(
            route_frame(&relay, "alice", r#"{"type":"offer","payload":"x"}"#),
            RouteOutcome::MissingRecipient
        );
        assert_eq!(
            route_frame(&relay, "alice", r#"{"to":"  ","type":"offer","payload":"x"}"#),
            RouteOutcome::MissingRecipient
        );
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_queue_drops_frame_but_keeps_mapping() {
        let relay = test_relay(Config::default()).await;
        let (bob, _bob_rx) = connect(&relay, "bob", 1);
        let frame = r#"{"to":"bob","type":"ice","payload":"c"}"#;

        assert_eq!(route_frame(&relay, "alice", frame), RouteOutcome::Forwarded);
        assert_eq!(route_frame(&relay, "alice", frame), RouteOutcome::RecipientBusy);
        assert_eq!(relay.registry().lookup("bob").unwrap().id(), bob.id());
    }

    #[tokio::test]
    async fn closed_recipient_is_deregistered() {
        let relay = test_relay(Config::default()).await;
        let (_bob, bob_rx) = connect(&relay, "bob", 4);
        drop(bob_rx);

        let frame = r#"{"to":"bob","type":"offer","payload":"x"}"#;
        assert_eq!(route_frame(&relay, "alice", frame), RouteOutcome::RecipientGone);
        assert!(relay.registry().lookup("bob").is_none());
        assert_eq!(relay.metrics().forward_failures.load(Ordering::Relaxed), 1);

        // Nothing registered any more: later frames are simply offline
        assert_eq!(route_frame(&relay, "alice", frame), RouteOutcome::RecipientOffline);
    }

    #[tokio::test]
    async fn frame_rate_limit_applies_per_sender() {
        let mut config = Config::default();
        config.limits.messages_per_minute = 2;
        let relay = test_relay(config).await;
        let (_bob, _bob_rx) = connect(&relay, "bob", 8);
        let frame = r#"{"to":"bob","type":"ice","payload":"c"}"#;

        assert_eq!(route_frame(&relay, "alice", frame), RouteOutcome::Forwarded);
        assert_eq!(route_frame(&relay, "alice", frame), RouteOutcome::Forwarded);
        assert_eq!(route_frame(&relay, "alice", frame), RouteOutcome::RateLimited);
        assert_eq!(route_frame(&relay, "carol", frame), RouteOutcome::Forwarded);
        assert_eq!(relay.metrics().rate_limit_hits.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn valid_credential_moves_to_authenticated() {
        let relay = Arc::new(test_relay(Config::default()).await);
        let mut session = Session::new(relay);
        assert_eq!(session.state(), &SessionState::Connecting);

        assert_eq!(session.authenticate("token_alice", None).unwrap().as_str(), "alice");
        assert_eq!(
            session.state(),
            &SessionState::Authenticated {
                identity: UserId::parse("alice").unwrap()
            }
        );
    }

    #[tokio::test]
    async fn failed_authentication_stays_connecting() {
        let relay = Arc::new(test_relay(Config::default()).await);
        let mut session = Session::new(relay);

        assert_eq!(session.authenticate("", None), Err(AuthError::MissingToken));
        assert!(matches!(
            session.authenticate("token_alice", Some("bob")),
            Err(AuthError::IdentityMismatch { .. })
        ));
        assert_eq!(session.state(), &SessionState::Connecting);

        assert_eq!(session.authenticate("token_bob", Some("bob")).unwrap().as_str(), "bob");
    }
}
