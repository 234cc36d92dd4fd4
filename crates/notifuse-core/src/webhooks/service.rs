//! Webhook ingestion and message-history reconciliation

use super::providers::parse_webhook;
use super::sns::SubscriptionConfirmer;
use crate::auth::{authenticate_user, Authenticator};
use notifuse_common::types::{truncate_chars, Pagination, STATUS_INFO_MAX_LEN};
use notifuse_common::{Context, Error, Result, ResultExt};
use notifuse_storage::models::{
    EmailEventType, MessageEvent, MessageEventUpdate, WebhookEvent, WebhookEventListParams,
};
use notifuse_storage::repository::{
    MessageHistoryRepository, WebhookEventPage, WebhookEventRepository, WorkspaceRepository,
};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Collaborators of the webhook service
pub struct WebhookServiceDeps {
    pub workspaces: Arc<dyn WorkspaceRepository>,
    pub events: Arc<dyn WebhookEventRepository>,
    pub message_history: Arc<dyn MessageHistoryRepository>,
    pub confirmer: Arc<dyn SubscriptionConfirmer>,
    pub auth: Arc<dyn Authenticator>,
}

/// Ingests provider webhooks and serves the stored events
pub struct WebhookEventService {
    workspaces: Arc<dyn WorkspaceRepository>,
    events: Arc<dyn WebhookEventRepository>,
    message_history: Arc<dyn MessageHistoryRepository>,
    confirmer: Arc<dyn SubscriptionConfirmer>,
    auth: Arc<dyn Authenticator>,
}

impl WebhookEventService {
    pub fn new(deps: WebhookServiceDeps) -> Self {
        Self {
            workspaces: deps.workspaces,
            events: deps.events,
            message_history: deps.message_history,
            confirmer: deps.confirmer,
            auth: deps.auth,
        }
    }

    /// Parse, store and reconcile one provider delivery.
    ///
    /// Unauthenticated: providers cannot present API keys. Any error should
    /// make the HTTP layer answer non-2xx so the provider retries.
    pub async fn process_webhook(
        &self,
        ctx: &Context,
        workspace_id: &str,
        integration_id: &str,
        payload: &[u8],
    ) -> Result<()> {
        if let Some(err) = ctx.err() {
            return Err(err);
        }

        let workspace = self
            .workspaces
            .get_by_id(workspace_id)
            .await
            .wrap_err("failed to get workspace")?;

        let integration = workspace.integration(integration_id).ok_or_else(|| {
            Error::UnsupportedProvider(format!("no integration {}", integration_id))
        })?;
        let provider = &integration.email_provider;

        let parsed = parse_webhook(provider, integration_id, payload).map_err(|e| {
            error!(
                workspace_id = %workspace_id,
                integration_id = %integration_id,
                provider = %provider.kind,
                error = %e,
                "Failed to parse webhook payload"
            );
            e
        })?;

        if let Some(url) = parsed.subscription_confirmation.as_deref() {
            self.confirmer
                .confirm(ctx, url)
                .await
                .wrap_err("failed to confirm subscription")?;
            info!(
                workspace_id = %workspace_id,
                integration_id = %integration_id,
                "Confirmed SNS subscription"
            );
        }

        if parsed.events.is_empty() {
            debug!(
                workspace_id = %workspace_id,
                integration_id = %integration_id,
                provider = %provider.kind,
                "Webhook carried no delivery events"
            );
            return Ok(());
        }

        self.events
            .store_events(workspace_id, &parsed.events)
            .await
            .wrap_err("failed to store webhook event")?;

        let updates = message_event_updates(&parsed.events);
        if !updates.is_empty() {
            self.message_history
                .set_statuses_if_not_set(workspace_id, &updates)
                .await
                .wrap_err("failed to update message status")?;
        }

        info!(
            workspace_id = %workspace_id,
            integration_id = %integration_id,
            provider = %provider.kind,
            events = parsed.events.len(),
            status_updates = updates.len(),
            "Processed webhook"
        );
        Ok(())
    }

    pub async fn list_events(
        &self,
        ctx: &Context,
        workspace_id: &str,
        params: &WebhookEventListParams,
    ) -> Result<WebhookEventPage> {
        authenticate_user(self.auth.as_ref(), ctx, workspace_id).await?;
        self.events.list_events(workspace_id, params).await
    }

    pub async fn get_events_by_type(
        &self,
        ctx: &Context,
        workspace_id: &str,
        event_type: EmailEventType,
        pagination: Pagination,
    ) -> Result<Vec<WebhookEvent>> {
        authenticate_user(self.auth.as_ref(), ctx, workspace_id).await?;
        self.events
            .get_events_by_type(workspace_id, event_type, pagination)
            .await
    }

    pub async fn get_events_by_message_id(
        &self,
        ctx: &Context,
        workspace_id: &str,
        message_id: &str,
        pagination: Pagination,
    ) -> Result<Vec<WebhookEvent>> {
        authenticate_user(self.auth.as_ref(), ctx, workspace_id).await?;
        self.events
            .get_events_by_message_id(workspace_id, message_id, pagination)
            .await
    }

    pub async fn get_events_by_transactional_id(
        &self,
        ctx: &Context,
        workspace_id: &str,
        transactional_id: &str,
        pagination: Pagination,
    ) -> Result<Vec<WebhookEvent>> {
        authenticate_user(self.auth.as_ref(), ctx, workspace_id).await?;
        self.events
            .get_events_by_transactional_id(workspace_id, transactional_id, pagination)
            .await
    }

    pub async fn get_events_by_broadcast_id(
        &self,
        ctx: &Context,
        workspace_id: &str,
        broadcast_id: &str,
        pagination: Pagination,
    ) -> Result<Vec<WebhookEvent>> {
        authenticate_user(self.auth.as_ref(), ctx, workspace_id).await?;
        self.events
            .get_events_by_broadcast_id(workspace_id, broadcast_id, pagination)
            .await
    }

    pub async fn get_event_count(
        &self,
        ctx: &Context,
        workspace_id: &str,
        event_type: EmailEventType,
    ) -> Result<i64> {
        authenticate_user(self.auth.as_ref(), ctx, workspace_id).await?;
        self.events.get_event_count(workspace_id, event_type).await
    }
}

/// One status update per event that carries a message id, in payload order
pub fn message_event_updates(events: &[WebhookEvent]) -> Vec<MessageEventUpdate> {
    events
        .iter()
        .filter_map(|event| {
            let message_id = event.message_id.as_deref().filter(|id| !id.is_empty())?;
            let status_info = match event.event_type {
                EmailEventType::Delivered => None,
                EmailEventType::Bounce => event.bounce_diagnostic.as_deref(),
                EmailEventType::Complaint => event.complaint_feedback_type.as_deref(),
            }
            .filter(|info| !info.is_empty())
            .map(|info| truncate_chars(info, STATUS_INFO_MAX_LEN));

            Some(MessageEventUpdate {
                message_id: message_id.to_string(),
                event: MessageEvent::from(event.event_type),
                timestamp: event.timestamp,
                status_info,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use notifuse_common::types::User;
    use notifuse_storage::memory::{
        InMemoryMessageHistoryRepository, InMemoryWebhookEventRepository,
        InMemoryWorkspaceRepository,
    };
    use notifuse_storage::models::{
        EmailProvider, EmailProviderKind, Integration, IntegrationKind, MessageHistory,
        Workspace, WorkspaceSettings,
    };
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingConfirmer {
        urls: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl SubscriptionConfirmer for RecordingConfirmer {
        async fn confirm(&self, _ctx: &Context, subscribe_url: &str) -> Result<()> {
            self.urls.lock().await.push(subscribe_url.to_string());
            if self.fail {
                return Err(Error::Transport("connection refused".to_string()));
            }
            Ok(())
        }
    }

    struct AllowAll;

    #[async_trait]
    impl Authenticator for AllowAll {
        async fn authenticate(&self, _ctx: &Context, workspace_id: &str) -> Result<User> {
            Ok(User {
                id: "user_1".to_string(),
                workspace_id: workspace_id.to_string(),
                name: None,
            })
        }
    }

    struct Harness {
        service: WebhookEventService,
        events: Arc<InMemoryWebhookEventRepository>,
        history: Arc<InMemoryMessageHistoryRepository>,
        confirmer: Arc<RecordingConfirmer>,
    }

    fn integration(id: &str, kind: EmailProviderKind) -> Integration {
        Integration {
            id: id.to_string(),
            name: format!("{} integration", kind),
            kind: IntegrationKind::Email,
            email_provider: EmailProvider {
                kind,
                senders: Vec::new(),
                smtp: None,
                mailgun: None,
            },
        }
    }

    async fn harness(confirmer: RecordingConfirmer) -> Harness {
        let workspaces = Arc::new(InMemoryWorkspaceRepository::new());
        workspaces
            .insert(Workspace {
                id: "ws_1".to_string(),
                name: "Acme".to_string(),
                settings: WorkspaceSettings::default(),
                integrations: vec![
                    integration("int_postmark", EmailProviderKind::Postmark),
                    integration("int_ses", EmailProviderKind::Ses),
                ],
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await;

        let events = Arc::new(InMemoryWebhookEventRepository::new());
        let history = Arc::new(InMemoryMessageHistoryRepository::new());
        let confirmer = Arc::new(confirmer);

        let service = WebhookEventService::new(WebhookServiceDeps {
            workspaces,
            events: events.clone(),
            message_history: history.clone(),
            confirmer: confirmer.clone(),
            auth: Arc::new(AllowAll),
        });

        Harness {
            service,
            events,
            history,
            confirmer,
        }
    }

    fn message(id: &str) -> MessageHistory {
        MessageHistory {
            id: id.to_string(),
            contact_email: "user@example.com".to_string(),
            broadcast_id: Some("b_1".to_string()),
            template_id: None,
            status_info: None,
            sent_at: Utc.with_ymd_and_hms(2024, 5, 1, 11, 0, 0).unwrap(),
            delivered_at: None,
            bounced_at: None,
            complained_at: None,
            updated_at: Utc.with_ymd_and_hms(2024, 5, 1, 11, 0, 0).unwrap(),
        }
    }

    fn postmark_delivery(message_id: &str, delivered_at: &str) -> Vec<u8> {
        json!({
            "RecordType": "Delivery",
            "MessageID": "pm-1",
            "Recipient": "user@example.com",
            "DeliveredAt": delivered_at,
            "Metadata": {"notifuse_message_id": message_id}
        })
        .to_string()
        .into_bytes()
    }

    #[tokio::test]
    async fn test_redelivered_webhook_keeps_first_status() {
        let h = harness(RecordingConfirmer::default()).await;
        h.history.create("ws_1", &message("msg_1")).await.unwrap();
        let ctx = Context::new();

        h.service
            .process_webhook(&ctx, "ws_1", "int_postmark", &postmark_delivery("msg_1", "2024-05-01T12:00:00Z"))
            .await
            .unwrap();
        h.service
            .process_webhook(&ctx, "ws_1", "int_postmark", &postmark_delivery("msg_1", "2024-05-01T13:30:00Z"))
            .await
            .unwrap();

        let stored = h.history.get("ws_1", "msg_1").await.unwrap().unwrap();
        assert_eq!(
            stored.delivered_at,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
        );
        // both deliveries keep their raw event rows
        assert_eq!(h.events.all("ws_1").await.len(), 2);
        assert_eq!(h.history.batches().await.len(), 2);
    }

    #[tokio::test]
    async fn test_long_diagnostic_is_truncated() {
        let h = harness(RecordingConfirmer::default()).await;
        let payload = json!({
            "RecordType": "Bounce",
            "Type": "HardBounce",
            "Email": "gone@example.com",
            "MessageID": "pm-2",
            "Details": "x".repeat(300),
            "Metadata": {"notifuse_message_id": "msg_2"}
        })
        .to_string();

        h.service
            .process_webhook(&Context::new(), "ws_1", "int_postmark", payload.as_bytes())
            .await
            .unwrap();

        let batches = h.history.batches().await;
        let update = &batches[0][0];
        assert_eq!(update.event, MessageEvent::Bounced);
        assert_eq!(update.status_info.as_deref().map(str::len), Some(255));
        // the stored raw event keeps the full diagnostic
        let stored = h.events.all("ws_1").await;
        assert_eq!(stored[0].bounce_diagnostic.as_deref().map(str::len), Some(300));
    }

    #[test]
    fn test_events_without_message_id_are_not_reconciled() {
        let now = Utc::now();
        let with_id = WebhookEvent::new(
            EmailEventType::Complaint,
            EmailProviderKind::Smtp,
            "int",
            "a@example.com",
            Some("msg_1".to_string()),
            now,
            "{}",
        )
        .with_complaint("abuse");
        let without_id = WebhookEvent::new(
            EmailEventType::Delivered,
            EmailProviderKind::Smtp,
            "int",
            "b@example.com",
            None,
            now,
            "{}",
        );

        let updates = message_event_updates(&[without_id, with_id]);
        assert_eq!(
            updates,
            vec![MessageEventUpdate {
                message_id: "msg_1".to_string(),
                event: MessageEvent::Complained,
                timestamp: now,
                status_info: Some("abuse".to_string()),
            }]
        );
    }

    #[tokio::test]
    async fn test_store_failure_is_wrapped_and_skips_reconciliation() {
        let h = harness(RecordingConfirmer::default()).await;
        h.events.fail_store.set("disk full");

        let err = h
            .service
            .process_webhook(&Context::new(), "ws_1", "int_postmark", &postmark_delivery("msg_1", "2024-05-01T12:00:00Z"))
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "failed to store webhook event: Database error: disk full"
        );
        assert!(h.history.batches().await.is_empty());
    }

    #[tokio::test]
    async fn test_reconciliation_failure_is_hard_error_after_store() {
        let h = harness(RecordingConfirmer::default()).await;
        h.history.fail_update.set("deadlock detected");

        let err = h
            .service
            .process_webhook(&Context::new(), "ws_1", "int_postmark", &postmark_delivery("msg_1", "2024-05-01T12:00:00Z"))
            .await
            .unwrap_err();

        assert!(err.to_string().starts_with("failed to update message status: "));
        assert_eq!(h.events.all("ws_1").await.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_workspace_and_integration() {
        let h = harness(RecordingConfirmer::default()).await;
        let payload = postmark_delivery("msg_1", "2024-05-01T12:00:00Z");

        let err = h
            .service
            .process_webhook(&Context::new(), "ws_missing", "int_postmark", &payload)
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("failed to get workspace: "));
        assert!(err.is_not_found());

        let err = h
            .service
            .process_webhook(&Context::new(), "ws_1", "int_missing", &payload)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedProvider(_)));
    }

    #[tokio::test]
    async fn test_subscription_confirmation() {
        let payload = json!({
            "Type": "SubscriptionConfirmation",
            "SubscribeURL": "https://sns.us-east-1.amazonaws.com/?Action=ConfirmSubscription&Token=t"
        })
        .to_string();

        let h = harness(RecordingConfirmer::default()).await;
        h.service
            .process_webhook(&Context::new(), "ws_1", "int_ses", payload.as_bytes())
            .await
            .unwrap();
        assert_eq!(h.confirmer.urls.lock().await.len(), 1);
        assert!(h.events.all("ws_1").await.is_empty());

        let failing = harness(RecordingConfirmer {
            fail: true,
            ..Default::default()
        })
        .await;
        let err = failing
            .service
            .process_webhook(&Context::new(), "ws_1", "int_ses", payload.as_bytes())
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("failed to confirm subscription: "));
    }

    #[tokio::test]
    async fn test_cancelled_context_does_nothing() {
        let h = harness(RecordingConfirmer::default()).await;
        let ctx = Context::new();
        ctx.cancel();

        let err = h
            .service
            .process_webhook(&ctx, "ws_1", "int_postmark", &postmark_delivery("msg_1", "2024-05-01T12:00:00Z"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(h.events.all("ws_1").await.is_empty());
    }

    #[tokio::test]
    async fn test_event_queries_pass_through() {
        let h = harness(RecordingConfirmer::default()).await;
        let ctx = Context::new();
        h.service
            .process_webhook(&ctx, "ws_1", "int_postmark", &postmark_delivery("msg_1", "2024-05-01T12:00:00Z"))
            .await
            .unwrap();

        let by_message = h
            .service
            .get_events_by_message_id(&ctx, "ws_1", "msg_1", Pagination::default())
            .await
            .unwrap();
        assert_eq!(by_message.len(), 1);

        let count = h
            .service
            .get_event_count(&ctx, "ws_1", EmailEventType::Delivered)
            .await
            .unwrap();
        assert_eq!(count, 1);

        let page = h
            .service
            .list_events(&ctx, "ws_1", &WebhookEventListParams::default())
            .await
            .unwrap();
        assert_eq!(page.total_count, 1);
    }
}
