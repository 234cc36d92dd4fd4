//! Notifuse API - REST API server
//!
//! This crate exposes the broadcast lifecycle and webhook event queries over
//! HTTP, plus the public endpoint email providers post their webhooks to.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod routes;

pub use auth::{AppState, RequestContext};
pub use error::ApiError;
pub use routes::create_router;
