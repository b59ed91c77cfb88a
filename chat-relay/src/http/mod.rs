//! HTTP endpoints for chat-relay.
//!
//! Serves the prekey, invite and backup APIs, health and metrics, and the
//! WebSocket upgrade routes of the signaling relay.

mod backup;
mod error;
pub mod health;
mod invites;
mod metrics;
mod prekeys;

use crate::protocol;
use crate::server::ChatRelay;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{Extension, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use error::{ApiError, JsonBody};
pub use health::{init_start_time, HealthStatus};
pub use prekeys::BundleQuery;

/// Build the HTTP router with all endpoints.
pub fn build_router(relay: Arc<ChatRelay>) -> Router {
    let mut router = Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health::health_handler))
        .route("/prekeys/publish", post(prekeys::publish_handler))
        .route("/prekeys/bundle/:user_id", get(prekeys::bundle_handler))
        .route("/invites/create", post(invites::create_handler))
        .route("/invites/consume", post(invites::consume_handler))
        .route("/backup", post(backup::upload_handler))
        .route("/backup/latest", get(backup::latest_handler))
        .route("/ws", get(protocol::relay_handler))
        .route("/signal/:user_id", get(protocol::signal_handler));

    if relay.config().http.metrics_enabled {
        router = router.route("/metrics", get(metrics::metrics_handler));
    }

    let max_body = relay.config().http.max_body_bytes;
    router
        .layer(DefaultBodyLimit::max(max_body))
        .layer(Extension(relay))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Liveness probe.
async fn root_handler() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::SqliteStorage;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use axum::response::Response;
    use chat_types::{PreKeyBundle, PublishPreKeyRequest};
    use serde_json::{json, Value};
    use tower::util::ServiceExt;

    async fn test_relay(config: Config) -> Arc<ChatRelay> {
        let storage = SqliteStorage::in_memory().await.unwrap();
        Arc::new(ChatRelay::new(config, storage))
    }

    async fn send(app: &Router, request: Request<Body>) -> Response {
        app.clone().oneshot(request).await.unwrap()
    }

    fn get_as(uri: &str, user: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer token_{user}"))
            .body(Body::empty())
            .unwrap()
    }

    fn post_json_as(uri: &str, user: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer token_{user}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    async fn body_json(response: Response) -> Value {
        serde_json::from_slice(&body_bytes(response).await).unwrap()
    }

    fn publish_body(user: &str, otk_ids: &[i32]) -> Value {
        let keys: Vec<Value> = otk_ids
            .iter()
            .map(|id| json!({"keyId": id, "publicKey": format!("otk-{id}")}))
            .collect();
        json!({
            "userId": user,
            "deviceId": "phone1",
            "identityKey": "ik",
            "deviceKey": "dk",
            "signedPreKeyId": 7,
            "signedPreKey": "spk",
            "signedPreKeySig": "sig",
            "oneTimePreKeys": keys,
        })
    }

    #[tokio::test]
    async fn root_and_health_return_ok() {
        let app = build_router(test_relay(Config::default()).await);

        let response = send(&app, Request::builder().uri("/").body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await, b"OK");

        let response = send(&app, Request::builder().uri("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let health = body_json(response).await;
        assert_eq!(health["status"], "ok");
        assert_eq!(health["connections"], 0);
        assert_eq!(health["store_reachable"], true);
    }

    #[tokio::test]
    async fn metrics_can_be_disabled() {
        let app = build_router(test_relay(Config::default()).await);
        let response = send(&app, Request::builder().uri("/metrics").body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::OK);

        let mut config = Config::default();
        config.http.metrics_enabled = false;
        let app = build_router(test_relay(config).await);
        let response = send(&app, Request::builder().uri("/metrics").body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn protected_routes_require_token() {
        let app = build_router(test_relay(Config::default()).await);

        let response = send(
            &app,
            Request::builder()
                .uri("/prekeys/bundle/alice")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = send(
            &app,
            Request::builder()
                .uri("/backup/latest")
                .header(header::AUTHORIZATION, "Bearer nonsense")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error"], "Unauthorized");
    }

    #[tokio::test]
    async fn publish_then_fetch_bundle() {
        let relay = test_relay(Config::default()).await;
        let app = build_router(relay.clone());

        let response = send(&app, post_json_as("/prekeys/publish", "alice", publish_body("alice", &[1, 2]))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"status": "ok"}));

        let response = send(&app, get_as("/prekeys/bundle/alice?deviceId=phone1", "bob")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let bundle: PreKeyBundle = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(bundle.signed_pre_key_id, 7);
        assert_eq!(bundle.one_time_pre_key_id, Some(1));

        let response = send(&app, get_as("/prekeys/bundle/alice", "bob")).await;
        let bundle = body_json(response).await;
        assert_eq!(bundle["oneTimePreKeyId"], 2);

        // Exhausted: optional fields are omitted entirely
        let response = send(&app, get_as("/prekeys/bundle/alice", "bob")).await;
        let bundle = body_json(response).await;
        assert!(bundle.get("oneTimePreKeyId").is_none());
        assert!(bundle.get("oneTimePreKey").is_none());
        assert_eq!(bundle["signedPreKeyId"], 7);
    }

    #[tokio::test]
    async fn publish_for_someone_else_is_forbidden_and_writes_nothing() {
        let relay = test_relay(Config::default()).await;
        let app = build_router(relay.clone());

        let response = send(&app, post_json_as("/prekeys/publish", "mallory", publish_body("alice", &[1]))).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = send(&app, get_as("/prekeys/bundle/alice", "bob")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"], "No prekeys for user");
    }

    #[tokio::test]
    async fn publish_with_blank_device_is_rejected() {
        let app = build_router(test_relay(Config::default()).await);
        let mut body = publish_body("alice", &[1]);
        body["deviceId"] = json!("  ");

        let response = send(&app, post_json_as("/prekeys/publish", "alice", body)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn publish_missing_field_is_bad_request() {
        let relay = test_relay(Config::default()).await;
        let app = build_router(relay.clone());
        let mut body = publish_body("alice", &[1]);
        body.as_object_mut().unwrap().remove("deviceId");

        let response = send(&app, post_json_as("/prekeys/publish", "alice", body)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json"
        );
        let error = body_json(response).await;
        assert!(error["error"].as_str().unwrap().contains("deviceId"));

        let response = send(&app, get_as("/prekeys/bundle/alice", "bob")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn undecodable_bodies_are_bad_request() {
        let app = build_router(test_relay(Config::default()).await);

        let request = Request::builder()
            .method("POST")
            .uri("/invites/consume")
            .header(header::AUTHORIZATION, "Bearer token_bob")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = send(&app, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(response).await["error"].is_string());

        let response = send(&app, post_json_as("/invites/create", "alice", json!({}))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(response).await["error"].as_str().unwrap().contains("userId"));

        let request = Request::builder()
            .method("POST")
            .uri("/invites/consume")
            .header(header::AUTHORIZATION, "Bearer token_bob")
            .body(Body::from(r#"{"code":"abc"}"#))
            .unwrap();
        let response = send(&app, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn publish_request_round_trips_through_router() {
        // The typed request serializes to the same wire shape the handler expects
        let request: PublishPreKeyRequest = serde_json::from_value(publish_body("alice", &[3])).unwrap();
        let app = build_router(test_relay(Config::default()).await);
        let response = send(
            &app,
            post_json_as("/prekeys/publish", "alice", serde_json::to_value(&request).unwrap()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn invite_lifecycle() {
        let relay = test_relay(Config::default()).await;
        let app = build_router(relay.clone());

        let response = send(&app, post_json_as("/invites/create", "bob", json!({"userId": "alice"}))).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = send(&app, post_json_as("/invites/create", "alice", json!({"userId": "alice"}))).await;
        assert_eq!(response.status(), StatusCode::OK);
        let created = body_json(response).await;
        let code = created["code"].as_str().unwrap().to_string();
        assert_eq!(code.len(), 16);
        assert!(created["expiresAt"].as_i64().unwrap() > 0);

        let response = send(&app, post_json_as("/invites/consume", "bob", json!({"code": code}))).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"ownerUserId": "alice"}));

        let response = send(&app, post_json_as("/invites/consume", "carol", json!({"code": code}))).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(response).await["error"], "Already used");

        let response = send(&app, post_json_as("/invites/consume", "carol", json!({"code": "nope"}))).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"], "Invalid code");
    }

    #[tokio::test]
    async fn expired_invite_is_gone() {
        let mut config = Config::default();
        config.invites.ttl_secs = 0;
        let app = build_router(test_relay(config).await);

        let response = send(&app, post_json_as("/invites/create", "alice", json!({"userId": "alice"}))).await;
        let code = body_json(response).await["code"].as_str().unwrap().to_string();

        let response = send(&app, post_json_as("/invites/consume", "bob", json!({"code": code}))).await;
        assert_eq!(response.status(), StatusCode::GONE);
    }

    fn multipart_as(user: &str, field: &str, content: &[u8]) -> Request<Body> {
        let boundary = "chatrelayboundary";
        let mut body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"backup.bin\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/backup")
            .header(header::AUTHORIZATION, format!("Bearer token_{user}"))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn backup_upload_and_latest() {
        let app = build_router(test_relay(Config::default()).await);

        let response = send(&app, get_as("/backup/latest", "alice")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"], "No backup found");

        let response = send(&app, multipart_as("alice", "backupFile", b"first")).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = body_json(response).await;
        assert_eq!(created["status"], "ok");
        assert!(created["id"].is_string());

        let response = send(&app, multipart_as("alice", "backupFile", b"\x00second")).await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = send(&app, get_as("/backup/latest", "alice")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/octet-stream"
        );
        assert_eq!(body_bytes(response).await, b"\x00second");

        // Backups are private to their owner
        let response = send(&app, get_as("/backup/latest", "bob")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn backup_without_file_field_is_rejected() {
        let app = build_router(test_relay(Config::default()).await);
        let response = send(&app, multipart_as("alice", "somethingElse", b"x")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "No file uploaded");
    }
}
