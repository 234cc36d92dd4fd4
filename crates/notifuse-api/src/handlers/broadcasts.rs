//! Broadcast handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use notifuse_core::broadcast::{
    CreateBroadcastRequest, ListBroadcastsRequest, ListBroadcastsResponse,
    ScheduleBroadcastRequest, SendToIndividualRequest, SendToIndividualResponse,
    UpdateBroadcastRequest,
};
use notifuse_storage::models::Broadcast;
use std::sync::Arc;

use crate::auth::{AppState, RequestContext};
use crate::error::ApiError;

type ApiResult<T> = Result<T, ApiError>;

/// List broadcasts
///
/// GET /api/v1/workspaces/:workspace_id/broadcasts
pub async fn list_broadcasts(
    State(state): State<Arc<AppState>>,
    RequestContext(ctx): RequestContext,
    Path(workspace_id): Path<String>,
    Query(query): Query<ListBroadcastsRequest>,
) -> ApiResult<Json<ListBroadcastsResponse>> {
    let response = state
        .broadcasts
        .list_broadcasts(&ctx, &workspace_id, query)
        .await?;
    Ok(Json(response))
}

/// Create a draft broadcast
///
/// POST /api/v1/workspaces/:workspace_id/broadcasts
pub async fn create_broadcast(
    State(state): State<Arc<AppState>>,
    RequestContext(ctx): RequestContext,
    Path(workspace_id): Path<String>,
    Json(request): Json<CreateBroadcastRequest>,
) -> ApiResult<(StatusCode, Json<Broadcast>)> {
    let broadcast = state
        .broadcasts
        .create_broadcast(&ctx, &workspace_id, request)
        .await?;
    Ok((StatusCode::CREATED, Json(broadcast)))
}

/// GET /api/v1/workspaces/:workspace_id/broadcasts/:broadcast_id
pub async fn get_broadcast(
    State(state): State<Arc<AppState>>,
    RequestContext(ctx): RequestContext,
    Path((workspace_id, broadcast_id)): Path<(String, String)>,
) -> ApiResult<Json<Broadcast>> {
    let broadcast = state
        .broadcasts
        .get_broadcast(&ctx, &workspace_id, &broadcast_id)
        .await?;
    Ok(Json(broadcast))
}

/// PUT /api/v1/workspaces/:workspace_id/broadcasts/:broadcast_id
pub async fn update_broadcast(
    State(state): State<Arc<AppState>>,
    RequestContext(ctx): RequestContext,
    Path((workspace_id, broadcast_id)): Path<(String, String)>,
    Json(request): Json<UpdateBroadcastRequest>,
) -> ApiResult<Json<Broadcast>> {
    let broadcast = state
        .broadcasts
        .update_broadcast(&ctx, &workspace_id, &broadcast_id, request)
        .await?;
    Ok(Json(broadcast))
}

/// DELETE /api/v1/workspaces/:workspace_id/broadcasts/:broadcast_id
pub async fn delete_broadcast(
    State(state): State<Arc<AppState>>,
    RequestContext(ctx): RequestContext,
    Path((workspace_id, broadcast_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    state
        .broadcasts
        .delete_broadcast(&ctx, &workspace_id, &broadcast_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Send now or schedule for later
///
/// POST /api/v1/workspaces/:workspace_id/broadcasts/:broadcast_id/schedule
pub async fn schedule_broadcast(
    State(state): State<Arc<AppState>>,
    RequestContext(ctx): RequestContext,
    Path((workspace_id, broadcast_id)): Path<(String, String)>,
    Json(request): Json<ScheduleBroadcastRequest>,
) -> ApiResult<Json<Broadcast>> {
    let broadcast = state
        .broadcasts
        .schedule_broadcast(&ctx, &workspace_id, &broadcast_id, request)
        .await?;
    Ok(Json(broadcast))
}

/// POST /api/v1/workspaces/:workspace_id/broadcasts/:broadcast_id/pause
pub async fn pause_broadcast(
    State(state): State<Arc<AppState>>,
    RequestContext(ctx): RequestContext,
    Path((workspace_id, broadcast_id)): Path<(String, String)>,
) -> ApiResult<Json<Broadcast>> {
    let broadcast = state
        .broadcasts
        .pause_broadcast(&ctx, &workspace_id, &broadcast_id)
        .await?;
    Ok(Json(broadcast))
}

/// POST /api/v1/workspaces/:workspace_id/broadcasts/:broadcast_id/resume
pub async fn resume_broadcast(
    State(state): State<Arc<AppState>>,
    RequestContext(ctx): RequestContext,
    Path((workspace_id, broadcast_id)): Path<(String, String)>,
) -> ApiResult<Json<Broadcast>> {
    let broadcast = state
        .broadcasts
        .resume_broadcast(&ctx, &workspace_id, &broadcast_id)
        .await?;
    Ok(Json(broadcast))
}

/// POST /api/v1/workspaces/:workspace_id/broadcasts/:broadcast_id/cancel
pub async fn cancel_broadcast(
    State(state): State<Arc<AppState>>,
    RequestContext(ctx): RequestContext,
    Path((workspace_id, broadcast_id)): Path<(String, String)>,
) -> ApiResult<Json<Broadcast>> {
    let broadcast = state
        .broadcasts
        .cancel_broadcast(&ctx, &workspace_id, &broadcast_id)
        .await?;
    Ok(Json(broadcast))
}

/// Send one variation to a single address
///
/// POST /api/v1/workspaces/:workspace_id/broadcasts/:broadcast_id/send-to-individual
pub async fn send_to_individual(
    State(state): State<Arc<AppState>>,
    RequestContext(ctx): RequestContext,
    Path((workspace_id, broadcast_id)): Path<(String, String)>,
    Json(request): Json<SendToIndividualRequest>,
) -> ApiResult<Json<SendToIndividualResponse>> {
    let message_id = state
        .broadcasts
        .send_to_individual(&ctx, &workspace_id, &broadcast_id, request)
        .await?;
    Ok(Json(SendToIndividualResponse { message_id }))
}
