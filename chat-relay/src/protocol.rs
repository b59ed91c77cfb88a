//! WebSocket entry points for the signaling relay.
//!
//! Two routes upgrade to the same relay session:
//! - `/ws?token=...` relays as whichever identity the token names
//! - `/signal/{userId}?token=...` additionally requires the token to name `userId`
//!
//! Authentication runs after the upgrade so failures can be reported with a
//! policy-violation close frame.

use crate::auth::bearer_token;
use crate::server::ChatRelay;
use crate::session::Session;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::response::Response;
use axum::Extension;
use serde::Deserialize;
use std::borrow::Cow;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Query string accepted by the relay routes.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectQuery {
    /// Bearer token. Browsers cannot set headers on WebSocket requests.
    pub token: Option<String>,
}

/// `GET /ws`
pub async fn relay_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<ConnectQuery>,
    headers: HeaderMap,
    Extension(relay): Extension<Arc<ChatRelay>>,
) -> Response {
    let token = connect_token(&query, &headers);
    ws.on_upgrade(move |socket| accept(relay, socket, token, None))
}

/// `GET /signal/{userId}`
pub async fn signal_handler(
    ws: WebSocketUpgrade,
    Path(user_id): Path<String>,
    Query(query): Query<ConnectQuery>,
    headers: HeaderMap,
    Extension(relay): Extension<Arc<ChatRelay>>,
) -> Response {
    let token = connect_token(&query, &headers);
    ws.on_upgrade(move |socket| accept(relay, socket, token, Some(user_id)))
}

/// Token from `?token=`, falling back to an `Authorization: Bearer` header.
fn connect_token(query: &ConnectQuery, headers: &HeaderMap) -> String {
    query
        .token
        .clone()
        .filter(|t| !t.trim().is_empty())
        .or_else(|| {
            headers
                .get(AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .and_then(bearer_token)
                .map(str::to_string)
        })
        .unwrap_or_default()
}

async fn accept(relay: Arc<ChatRelay>, socket: WebSocket, token: String, claimed: Option<String>) {
    let mut session = Session::new(relay.clone());
    let identity = match session.authenticate(&token, claimed.as_deref()) {
        Ok(identity) => identity,
        Err(e) => {
            tracing::warn!("Rejecting relay connection: {}", e);
            relay.metrics().errors_total.fetch_add(1, Ordering::Relaxed);
            close_policy_violation(socket, "unauthorized").await;
            return;
        }
    };

    if let Err(e) = relay.rate_limits().check_connection(identity.as_str()) {
        tracing::warn!("Connection rate limited for {}: {}", identity, e);
        relay.metrics().rate_limit_hits.fetch_add(1, Ordering::Relaxed);
        close_policy_violation(socket, "rate limited").await;
        return;
    }

    relay.metrics().connections_total.fetch_add(1, Ordering::Relaxed);
    session.run(socket).await;
}

async fn close_policy_violation(mut socket: WebSocket, reason: &'static str) {
    let frame = CloseFrame {
        code: close_code::POLICY,
        reason: Cow::Borrowed(reason),
    };
    if let Err(e) = socket.send(Message::Close(Some(frame))).await {
        tracing::debug!("Failed to send close frame: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn query_token_takes_precedence() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer token_bob"));

        let query = ConnectQuery {
            token: Some("token_alice".to_string()),
        };
        assert_eq!(connect_token(&query, &headers), "token_alice");

        let query = ConnectQuery { token: None };
        assert_eq!(connect_token(&query, &headers), "token_bob");
        assert_eq!(connect_token(&query, &HeaderMap::new()), "");
    }
}
