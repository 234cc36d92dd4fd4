//! HTTP mapping of service errors

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use notifuse_common::Error;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

/// Error response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// A service error on its way out as an HTTP response
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            error!(code = self.0.code(), error = %self.0, "Request failed");
        } else {
            warn!(code = self.0.code(), error = %self.0, "Request rejected");
        }

        let body = ErrorResponse {
            error: self.0.code().to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
