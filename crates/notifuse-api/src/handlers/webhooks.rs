//! Provider webhook intake and webhook event queries

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    Json,
};
use notifuse_common::types::Pagination;
use notifuse_storage::models::{EmailEventType, WebhookEvent, WebhookEventListParams};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::auth::{AppState, RequestContext};
use crate::error::ApiError;

type ApiResult<T> = Result<T, ApiError>;

/// Identifies which integration a provider delivery belongs to
#[derive(Debug, Deserialize)]
pub struct WebhookTarget {
    pub workspace_id: String,
    pub integration_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookAccepted {
    pub status: String,
}

/// Receive a provider delivery. Any error answers non-2xx so the provider retries.
///
/// POST /webhooks/email?workspace_id=...&integration_id=...
pub async fn receive_email_webhook(
    State(state): State<Arc<AppState>>,
    RequestContext(ctx): RequestContext,
    Query(target): Query<WebhookTarget>,
    body: Bytes,
) -> ApiResult<Json<WebhookAccepted>> {
    debug!(
        workspace_id = %target.workspace_id,
        integration_id = %target.integration_id,
        bytes = body.len(),
        "Webhook received"
    );

    state
        .webhooks
        .process_webhook(&ctx, &target.workspace_id, &target.integration_id, &body)
        .await?;

    Ok(Json(WebhookAccepted {
        status: "ok".to_string(),
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListWebhookEventsQuery {
    pub event_type: Option<EmailEventType>,
    pub recipient_email: Option<String>,
    #[serde(default)]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

impl PageQuery {
    fn pagination(&self) -> Pagination {
        Pagination::normalize(self.limit, self.offset)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookEventListResponse {
    pub events: Vec<WebhookEvent>,
    pub total_count: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookEventCountResponse {
    pub event_type: EmailEventType,
    pub count: i64,
}

/// GET /api/v1/workspaces/:workspace_id/webhook-events
pub async fn list_events(
    State(state): State<Arc<AppState>>,
    RequestContext(ctx): RequestContext,
    Path(workspace_id): Path<String>,
    Query(query): Query<ListWebhookEventsQuery>,
) -> ApiResult<Json<WebhookEventListResponse>> {
    let params = WebhookEventListParams {
        event_type: query.event_type,
        recipient_email: query.recipient_email,
        limit: query.limit,
        offset: query.offset,
    };
    let page = state
        .webhooks
        .list_events(&ctx, &workspace_id, &params)
        .await?;

    Ok(Json(WebhookEventListResponse {
        events: page.events,
        total_count: page.total_count,
    }))
}

/// GET /api/v1/workspaces/:workspace_id/webhook-events/by-type/:event_type
pub async fn events_by_type(
    State(state): State<Arc<AppState>>,
    RequestContext(ctx): RequestContext,
    Path((workspace_id, event_type)): Path<(String, EmailEventType)>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<Vec<WebhookEvent>>> {
    let events = state
        .webhooks
        .get_events_by_type(&ctx, &workspace_id, event_type, page.pagination())
        .await?;
    Ok(Json(events))
}

/// GET /api/v1/workspaces/:workspace_id/webhook-events/by-message/:message_id
pub async fn events_by_message(
    State(state): State<Arc<AppState>>,
    RequestContext(ctx): RequestContext,
    Path((workspace_id, message_id)): Path<(String, String)>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<Vec<WebhookEvent>>> {
    let events = state
        .webhooks
        .get_events_by_message_id(&ctx, &workspace_id, &message_id, page.pagination())
        .await?;
    Ok(Json(events))
}

/// GET /api/v1/workspaces/:workspace_id/webhook-events/by-transactional/:transactional_id
pub async fn events_by_transactional(
    State(state): State<Arc<AppState>>,
    RequestContext(ctx): RequestContext,
    Path((workspace_id, transactional_id)): Path<(String, String)>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<Vec<WebhookEvent>>> {
    let events = state
        .webhooks
        .get_events_by_transactional_id(&ctx, &workspace_id, &transactional_id, page.pagination())
        .await?;
    Ok(Json(events))
}

/// GET /api/v1/workspaces/:workspace_id/webhook-events/by-broadcast/:broadcast_id
pub async fn events_by_broadcast(
    State(state): State<Arc<AppState>>,
    RequestContext(ctx): RequestContext,
    Path((workspace_id, broadcast_id)): Path<(String, String)>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<Vec<WebhookEvent>>> {
    let events = state
        .webhooks
        .get_events_by_broadcast_id(&ctx, &workspace_id, &broadcast_id, page.pagination())
        .await?;
    Ok(Json(events))
}

/// GET /api/v1/workspaces/:workspace_id/webhook-events/count/:event_type
pub async fn event_count(
    State(state): State<Arc<AppState>>,
    RequestContext(ctx): RequestContext,
    Path((workspace_id, event_type)): Path<(String, EmailEventType)>,
) -> ApiResult<Json<WebhookEventCountResponse>> {
    let count = state
        .webhooks
        .get_event_count(&ctx, &workspace_id, event_type)
        .await?;
    Ok(Json(WebhookEventCountResponse { event_type, count }))
}
