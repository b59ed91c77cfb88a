//! Prometheus metrics endpoint.

use crate::server::ChatRelay;
use axum::{http::header::CONTENT_TYPE, response::IntoResponse, Extension};
use std::fmt::Write;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Prometheus metrics handler.
///
/// Returns gauges (current state) and counters (monotonic since startup) in
/// Prometheus text format.
pub async fn metrics_handler(Extension(relay): Extension<Arc<ChatRelay>>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        render(&relay),
    )
}

fn render(relay: &ChatRelay) -> String {
    let m = relay.metrics();
    let limits = relay.rate_limits();

    let gauges = [
        (
            "connections_active",
            "Identities with a live relay connection",
            relay.active_connections() as u64,
        ),
        (
            "rate_limit_keys",
            "Identities tracked by the rate limiters",
            (limits.connection_keys_count() + limits.message_keys_count()) as u64,
        ),
    ];

    let counters = [
        ("connections_total", "Relay connections accepted", &m.connections_total),
        ("envelopes_forwarded_total", "Envelopes delivered to a recipient", &m.envelopes_forwarded),
        ("envelopes_dropped_total", "Envelopes dropped without delivery", &m.envelopes_dropped),
        ("forward_failures_total", "Deliveries to a closed connection", &m.forward_failures),
        ("bundles_served_total", "Prekey bundles served", &m.bundles_served),
        ("one_time_keys_claimed_total", "One-time prekeys handed out", &m.one_time_keys_claimed),
        ("prekeys_published_total", "Prekey publishes accepted", &m.prekeys_published),
        ("backups_stored_total", "Backup blobs stored", &m.backups_stored),
        ("invites_created_total", "Invite codes minted", &m.invites_created),
        ("invites_consumed_total", "Invite codes redeemed", &m.invites_consumed),
        ("rate_limit_hits_total", "Rate limit rejections", &m.rate_limit_hits),
        ("errors_total", "Internal and authentication errors", &m.errors_total),
    ];

    let mut body = String::new();
    let _ = writeln!(body, "# HELP securechat_relay_info Server information");
    let _ = writeln!(body, "# TYPE securechat_relay_info gauge");
    let _ = writeln!(
        body,
        "securechat_relay_info{{version=\"{}\"}} 1\n",
        env!("CARGO_PKG_VERSION")
    );

    for (name, help, value) in gauges {
        let _ = writeln!(body, "# HELP securechat_relay_{name} {help}");
        let _ = writeln!(body, "# TYPE securechat_relay_{name} gauge");
        let _ = writeln!(body, "securechat_relay_{name} {value}\n");
    }

    for (name, help, counter) in counters {
        let value = counter.load(Ordering::Relaxed);
        let _ = writeln!(body, "# HELP securechat_relay_{name} {help}");
        let _ = writeln!(body, "# TYPE securechat_relay_{name} counter");
        let _ = writeln!(body, "securechat_relay_{name} {value}\n");
    }

    body
}
