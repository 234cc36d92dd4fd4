//! Application state and per-request context
//!
//! Handlers do not authenticate themselves. The presented API key is carried
//! in the [`Context`] and checked by the service against the workspace being
//! accessed.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use notifuse_common::Context;
use notifuse_core::{BroadcastService, WebhookEventService};
use notifuse_storage::DatabasePool;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub broadcasts: Arc<BroadcastService>,
    pub webhooks: Arc<WebhookEventService>,
    /// Deadline applied to every request context
    pub request_timeout: Duration,
    /// Checked by the readiness probe; `None` when running on in-memory storage
    pub db_pool: Option<DatabasePool>,
}

/// Extract the API key from `Authorization: Bearer` or `X-API-Key`
pub fn extract_api_key(headers: &HeaderMap) -> Option<&str> {
    if let Some(auth) = headers.get(AUTHORIZATION) {
        if let Some(token) = auth.to_str().ok().and_then(|s| s.strip_prefix("Bearer ")) {
            return Some(token.trim());
        }
    }

    headers
        .get("x-api-key")
        .and_then(|key| key.to_str().ok())
        .map(str::trim)
}

/// The request's [`Context`]: caller credentials plus the request deadline
#[derive(Debug, Clone)]
pub struct RequestContext(pub Context);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for RequestContext {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let mut ctx = Context::new().with_timeout(state.request_timeout);
        if let Some(key) = extract_api_key(&parts.headers).filter(|k| !k.is_empty()) {
            ctx = ctx.with_credentials(key);
        }
        Ok(Self(ctx))
    }
}
