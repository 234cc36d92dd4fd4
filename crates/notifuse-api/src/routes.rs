//! API routes

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::auth::AppState;
use crate::handlers::{broadcasts, health, webhooks};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let state = Arc::new(state);

    // Health check routes (no credentials required)
    let health_routes = Router::new()
        .route("/", get(health::health))
        .route("/live", get(health::liveness))
        .route("/ready", get(health::readiness))
        .with_state(state.clone());

    // Broadcast routes
    let broadcast_routes = Router::new()
        .route(
            "/",
            get(broadcasts::list_broadcasts).post(broadcasts::create_broadcast),
        )
        .route(
            "/:broadcast_id",
            get(broadcasts::get_broadcast)
                .put(broadcasts::update_broadcast)
                .delete(broadcasts::delete_broadcast),
        )
        .route("/:broadcast_id/schedule", post(broadcasts::schedule_broadcast))
        .route("/:broadcast_id/pause", post(broadcasts::pause_broadcast))
        .route("/:broadcast_id/resume", post(broadcasts::resume_broadcast))
        .route("/:broadcast_id/cancel", post(broadcasts::cancel_broadcast))
        .route(
            "/:broadcast_id/send-to-individual",
            post(broadcasts::send_to_individual),
        );

    // Webhook event query routes
    let webhook_event_routes = Router::new()
        .route("/", get(webhooks::list_events))
        .route("/by-type/:event_type", get(webhooks::events_by_type))
        .route("/by-message/:message_id", get(webhooks::events_by_message))
        .route(
            "/by-transactional/:transactional_id",
            get(webhooks::events_by_transactional),
        )
        .route("/by-broadcast/:broadcast_id", get(webhooks::events_by_broadcast))
        .route("/count/:event_type", get(webhooks::event_count));

    // API v1 routes; the services authenticate against the workspace in the path
    let api_v1 = Router::new()
        .nest("/workspaces/:workspace_id/broadcasts", broadcast_routes)
        .nest("/workspaces/:workspace_id/webhook-events", webhook_event_routes)
        .with_state(state.clone());

    // Provider callbacks carry no API key
    let webhook_routes = Router::new()
        .route("/email", post(webhooks::receive_email_webhook))
        .with_state(state);

    Router::new()
        .nest("/health", health_routes)
        .nest("/api/v1", api_v1)
        .nest("/webhooks", webhook_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(CorsLayer::permissive()),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderName, HeaderValue, StatusCode};
    use axum_test::TestServer;
    use chrono::Utc;
    use notifuse_common::config::{ApiKeyConfig, TrackingConfig, WebhookConfig};
    use notifuse_core::auth::hash_api_key;
    use notifuse_core::{
        ApiKeyAuthenticator, BroadcastService, BroadcastServiceDeps, InProcessEventBus,
        SmtpEmailSender, SnsSubscriptionConfirmer, TemplateRenderer, WebhookEventService,
        WebhookServiceDeps,
    };
    use notifuse_storage::memory::{
        InMemoryBroadcastRepository, InMemoryContactRepository, InMemoryMessageHistoryRepository,
        InMemoryTemplateRepository, InMemoryWebhookEventRepository, InMemoryWorkspaceRepository,
    };
    use notifuse_storage::models::{
        Broadcast, EmailProvider, EmailProviderKind, Integration, IntegrationKind, Workspace,
        WorkspaceSettings,
    };
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::time::Duration;

    const WS: &str = "ws_api";
    const KEY: &str = "nk_test_key";

    struct Fixture {
        server: TestServer,
        events: Arc<InMemoryWebhookEventRepository>,
    }

    async fn fixture() -> Fixture {
        let workspaces = Arc::new(InMemoryWorkspaceRepository::new());
        workspaces
            .insert(Workspace {
                id: WS.to_string(),
                name: "API".to_string(),
                settings: WorkspaceSettings::default(),
                integrations: vec![Integration {
                    id: "int_relay".to_string(),
                    name: "Relay".to_string(),
                    kind: IntegrationKind::Email,
                    email_provider: EmailProvider {
                        kind: EmailProviderKind::Smtp,
                        senders: Vec::new(),
                        smtp: None,
                        mailgun: None,
                    },
                }],
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await;

        let auth = Arc::new(ApiKeyAuthenticator::new(vec![ApiKeyConfig {
            workspace_id: WS.to_string(),
            user_id: "user_api".to_string(),
            name: None,
            key_hash: hash_api_key(KEY),
        }]));
        let events = Arc::new(InMemoryWebhookEventRepository::new());

        let broadcasts = BroadcastService::new(BroadcastServiceDeps {
            broadcasts: Arc::new(InMemoryBroadcastRepository::new()),
            workspaces: workspaces.clone(),
            contacts: Arc::new(InMemoryContactRepository::new()),
            templates: Arc::new(InMemoryTemplateRepository::new()),
            auth: auth.clone(),
            events: Arc::new(InProcessEventBus::new()),
            sender: Arc::new(SmtpEmailSender::default()),
            renderer: Arc::new(TemplateRenderer::new(&TrackingConfig::default()).unwrap()),
        });
        let webhooks = WebhookEventService::new(WebhookServiceDeps {
            workspaces,
            events: events.clone(),
            message_history: Arc::new(InMemoryMessageHistoryRepository::new()),
            confirmer: Arc::new(SnsSubscriptionConfirmer::new(&WebhookConfig::default()).unwrap()),
            auth,
        });

        let router = create_router(AppState {
            broadcasts: Arc::new(broadcasts),
            webhooks: Arc::new(webhooks),
            request_timeout: Duration::from_secs(5),
            db_pool: None,
        });

        Fixture {
            server: TestServer::new(router).unwrap(),
            events,
        }
    }

    fn bearer() -> (HeaderName, HeaderValue) {
        (
            HeaderName::from_static("authorization"),
            HeaderValue::from_str(&format!("Bearer {}", KEY)).unwrap(),
        )
    }

    fn new_broadcast() -> Value {
        json!({
            "name": "Spring sale",
            "audience": {"lists": ["list_1"]},
            "test_settings": {"variations": [{"id": "v1", "name": "A", "template_id": "tpl_1"}]}
        })
    }

    #[tokio::test]
    async fn test_health() {
        let f = fixture().await;
        let response = f.server.get("/health").await;
        response.assert_status_ok();
        assert_eq!(response.json::<Value>()["status"], "healthy");

        f.server.get("/health/ready").await.assert_status_ok();
    }

    #[tokio::test]
    async fn test_missing_api_key_is_unauthorized() {
        let f = fixture().await;
        let response = f
            .server
            .post(&format!("/api/v1/workspaces/{}/broadcasts", WS))
            .json(&new_broadcast())
            .await;

        response.assert_status(StatusCode::UNAUTHORIZED);
        assert_eq!(response.json::<Value>()["error"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn test_broadcast_lifecycle_over_http() {
        let f = fixture().await;
        let (name, value) = bearer();

        let created = f
            .server
            .post(&format!("/api/v1/workspaces/{}/broadcasts", WS))
            .add_header(name.clone(), value.clone())
            .json(&new_broadcast())
            .await;
        created.assert_status(StatusCode::CREATED);
        let broadcast: Broadcast = created.json();

        let fetched = f
            .server
            .get(&format!("/api/v1/workspaces/{}/broadcasts/{}", WS, broadcast.id))
            .add_header(name.clone(), value.clone())
            .await;
        fetched.assert_status_ok();
        assert_eq!(fetched.json::<Broadcast>().id, broadcast.id);

        // drafts cannot be paused
        let paused = f
            .server
            .post(&format!(
                "/api/v1/workspaces/{}/broadcasts/{}/pause",
                WS, broadcast.id
            ))
            .add_header(name.clone(), value.clone())
            .await;
        paused.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(paused.json::<Value>()["error"], "INVALID_STATUS");

        let listed = f
            .server
            .get(&format!("/api/v1/workspaces/{}/broadcasts?status=draft&limit=500", WS))
            .add_header(name.clone(), value.clone())
            .await;
        listed.assert_status_ok();
        assert_eq!(listed.json::<Value>()["total_count"], 1);

        f.server
            .delete(&format!("/api/v1/workspaces/{}/broadcasts/{}", WS, broadcast.id))
            .add_header(name, value)
            .await
            .assert_status(StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_unknown_broadcast_is_404() {
        let f = fixture().await;
        let (name, value) = bearer();

        let response = f
            .server
            .get(&format!("/api/v1/workspaces/{}/broadcasts/nope", WS))
            .add_header(name, value)
            .await;
        response.assert_status(StatusCode::NOT_FOUND);
        assert_eq!(response.json::<Value>()["error"], "BROADCAST_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_webhook_ingestion_and_query() {
        let f = fixture().await;

        let response = f
            .server
            .post(&format!(
                "/webhooks/email?workspace_id={}&integration_id=int_relay",
                WS
            ))
            .json(&json!({
                "event": "delivered",
                "recipient": "jane@example.com",
                "message_id": "msg_42",
                "timestamp": "2024-05-01T12:00:00Z"
            }))
            .await;
        response.assert_status_ok();
        assert_eq!(f.events.all(WS).await.len(), 1);

        let (name, value) = bearer();
        let listed = f
            .server
            .get(&format!("/api/v1/workspaces/{}/webhook-events/by-message/msg_42", WS))
            .add_header(name.clone(), value.clone())
            .await;
        listed.assert_status_ok();
        assert_eq!(listed.json::<Vec<Value>>().len(), 1);

        let count = f
            .server
            .get(&format!("/api/v1/workspaces/{}/webhook-events/count/delivered", WS))
            .add_header(name, value)
            .await;
        assert_eq!(count.json::<Value>()["count"], 1);
    }

    #[tokio::test]
    async fn test_bad_webhook_payload_is_rejected_for_retry() {
        let f = fixture().await;

        let response = f
            .server
            .post(&format!(
                "/webhooks/email?workspace_id={}&integration_id=int_relay",
                WS
            ))
            .text("not json")
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<Value>()["error"], "INVALID_PAYLOAD");
        assert!(f.events.all(WS).await.is_empty());

        let response = f
            .server
            .post("/webhooks/email?workspace_id=ws_api&integration_id=int_unknown")
            .text("{}")
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }
}
