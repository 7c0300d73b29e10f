//! HTTP ingest routes.
//!
//! The gateway relay forwards gateway events as JSON:
//!
//! - `POST /events/tenant-ready` - [`TenantReadyEvent`]
//! - `POST /events/tenant-joined` - [`TenantJoinedEvent`]
//! - `POST /events/voice-state` - [`VoiceStateEvent`]
//!
//! Each handler hands the event to the [`EventReactor`] and answers
//! `202 Accepted` with the number of work items enqueued. Work happens later
//! on the serializer; there is no synchronous result.
//!
//! # Authentication
//!
//! Every ingest route requires the relay's shared secret:
//!
//! ```text
//! Authorization: Bearer <RC_INGEST_TOKEN>
//! ```
//!
//! A missing or wrong token is answered with `401 Unauthorized` before the
//! body is read.

use crate::events::{TenantJoinedEvent, TenantReadyEvent, VoiceStateEvent};
use crate::reactor::EventReactor;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use common::secret::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tower_http::trace::TraceLayer;
use tracing::{debug, instrument};

/// Body of every ingest response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestResponse {
    pub enqueued: usize,
}

/// State for the relay authentication middleware.
pub struct IngestAuth {
    token: SecretString,
}

impl IngestAuth {
    #[must_use]
    pub fn new(token: SecretString) -> Self {
        Self { token }
    }

    fn accepts(&self, presented: &str) -> bool {
        presented
            .as_bytes()
            .ct_eq(self.token.expose_secret().as_bytes())
            .into()
    }
}

/// Build the event ingest router. Every route sits behind
/// [`require_relay_token`].
pub fn ingest_router(reactor: Arc<EventReactor>, auth: Arc<IngestAuth>) -> Router {
    Router::new()
        .route("/events/tenant-ready", post(tenant_ready))
        .route("/events/tenant-joined", post(tenant_joined))
        .route("/events/voice-state", post(voice_state))
        .route_layer(middleware::from_fn_with_state(auth, require_relay_token))
        .with_state(reactor)
        .layer(TraceLayer::new_for_http())
}

/// Reject requests that do not carry the relay's bearer token.
#[instrument(skip_all, name = "rc.routes.auth")]
pub async fn require_relay_token(
    State(auth): State<Arc<IngestAuth>>,
    req: Request,
    next: Next,
) -> Response {
    let presented = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    match presented {
        Some(token) if auth.accepts(token) => next.run(req).await,
        Some(_) => {
            debug!(target: "rc.routes.auth", "Ingest token rejected");
            unauthorized()
        }
        None => {
            debug!(target: "rc.routes.auth", "Missing or malformed Authorization header");
            unauthorized()
        }
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Bearer")],
    )
        .into_response()
}

fn accepted(enqueued: usize) -> (StatusCode, Json<IngestResponse>) {
    (StatusCode::ACCEPTED, Json(IngestResponse { enqueued }))
}

async fn tenant_ready(
    State(reactor): State<Arc<EventReactor>>,
    Json(event): Json<TenantReadyEvent>,
) -> (StatusCode, Json<IngestResponse>) {
    debug!(target: "rc.routes", tenants = event.tenant_ids.len(), "Tenant ready event");
    let enqueued = event
        .tenant_ids
        .into_iter()
        .map(|tenant| reactor.on_tenant_ready(tenant).len())
        .sum();
    accepted(enqueued)
}

async fn tenant_joined(
    State(reactor): State<Arc<EventReactor>>,
    Json(event): Json<TenantJoinedEvent>,
) -> (StatusCode, Json<IngestResponse>) {
    debug!(target: "rc.routes", tenant_id = %event.tenant_id, "Tenant joined event");
    accepted(reactor.on_tenant_joined(event.tenant_id).len())
}

async fn voice_state(
    State(reactor): State<Arc<EventReactor>>,
    Json(event): Json<VoiceStateEvent>,
) -> (StatusCode, Json<IngestResponse>) {
    debug!(
        target: "rc.routes",
        tenant_id = %event.tenant_id,
        member_id = %event.member_id,
        "Voice state event"
    );
    accepted(reactor.on_voice_state_changed(event.into()).len())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::gateway::VoiceStateTracker;
    use crate::mapping::RoutingSnapshot;
    use crate::queue::{WorkQueue, WorkQueueHandle, WorkQueueReceiver};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tokio::sync::watch;
    use tower::util::ServiceExt;

    const RELAY_TOKEN: &str = "relay-secret";

    fn app() -> (Router, WorkQueueHandle, WorkQueueReceiver) {
        let (handle, receiver) = WorkQueue::new();
        let (_tx, routing) = watch::channel(Arc::new(RoutingSnapshot::default()));
        let reactor = EventReactor::new(
            handle.clone(),
            routing,
            Arc::new(VoiceStateTracker::new()),
        );
        let auth = Arc::new(IngestAuth::new(SecretString::from(RELAY_TOKEN.to_string())));
        (ingest_router(Arc::new(reactor), auth), handle, receiver)
    }

    async fn post_json(app: Router, uri: &str, body: &str) -> (StatusCode, Vec<u8>) {
        post_json_as(app, uri, body, Some(&format!("Bearer {RELAY_TOKEN}"))).await
    }

    async fn post_json_as(
        app: Router,
        uri: &str,
        body: &str,
        authorization: Option<&str>,
    ) -> (StatusCode, Vec<u8>) {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(value) = authorization {
            builder = builder.header("authorization", value);
        }
        let request = builder
            .body(Body::from(body.to_string()))
            .expect("Failed to build request");
        let response = app.oneshot(request).await.expect("Failed to execute request");
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, bytes.to_vec())
    }

    #[tokio::test]
    async fn test_tenant_ready_enqueues_per_tenant() {
        let (app, handle, _receiver) = app();

        let (status, body) =
            post_json(app, "/events/tenant-ready", r#"{"tenant_ids": ["1", "2", "3"]}"#).await;

        assert_eq!(status, StatusCode::ACCEPTED);
        let body: IngestResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(body.enqueued, 3);
        assert_eq!(handle.depth(), 3);
    }

    #[tokio::test]
    async fn test_tenant_joined_enqueues_one() {
        let (app, handle, _receiver) = app();

        let (status, _) = post_json(app, "/events/tenant-joined", r#"{"tenant_id": 9}"#).await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(handle.depth(), 1);
    }

    #[tokio::test]
    async fn test_voice_state_without_routing_match_is_accepted() {
        let (app, handle, _receiver) = app();

        let (status, body) = post_json(
            app,
            "/events/voice-state",
            r#"{"tenant_id": "1", "member_id": "2", "username": "bob", "after_room_id": "3"}"#,
        )
        .await;

        assert_eq!(status, StatusCode::ACCEPTED);
        let body: IngestResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(body.enqueued, 0);
        assert_eq!(handle.depth(), 0);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_rejected() {
        let (app, handle, _receiver) = app();

        let (status, _) = post_json(app, "/events/voice-state", r#"{"tenant_id": "1"}"#).await;

        assert!(status.is_client_error());
        assert_eq!(handle.depth(), 0);
    }

    #[tokio::test]
    async fn test_missing_token_is_unauthorized() {
        let (app, handle, _receiver) = app();

        let (status, _) =
            post_json_as(app, "/events/tenant-joined", r#"{"tenant_id": 9}"#, None).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(handle.depth(), 0);
    }

    #[tokio::test]
    async fn test_wrong_token_is_unauthorized() {
        let (app, handle, _receiver) = app();

        let (status, _) = post_json_as(
            app,
            "/events/voice-state",
            r#"{"tenant_id": "1", "member_id": "2", "username": "bob", "after_room_id": "3"}"#,
            Some("Bearer relay-secret-but-longer"),
        )
        .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(handle.depth(), 0);
    }

    #[tokio::test]
    async fn test_non_bearer_scheme_is_unauthorized() {
        let (app, handle, _receiver) = app();

        let (status, _) = post_json_as(
            app,
            "/events/tenant-ready",
            r#"{"tenant_ids": ["1"]}"#,
            Some(RELAY_TOKEN),
        )
        .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(handle.depth(), 0);
    }
}
