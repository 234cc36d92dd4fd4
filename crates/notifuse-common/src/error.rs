//! Error types for Notifuse

use thiserror::Error;

/// Main error type for Notifuse
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("failed to authenticate user: {0}")]
    Auth(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// The broadcast does not exist in the workspace
    #[error("broadcast not found: {0}")]
    BroadcastNotFound(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A lifecycle transition was requested from a status that does not allow it
    #[error("cannot {action} broadcast: status must be {required}, current status is {actual}")]
    InvalidStatus {
        action: &'static str,
        required: String,
        actual: String,
    },

    #[error("unsupported email provider kind: {0}")]
    UnsupportedProvider(String),

    #[error("invalid webhook payload: {0}")]
    InvalidPayload(String),

    /// The event bus acknowledged a lifecycle event with an error
    #[error("failed to process {action} event: {message}")]
    EventProcessing {
        action: &'static str,
        message: String,
    },

    #[error("context canceled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Internal error: {0}")]
    Internal(String),

    /// An upstream failure prefixed with the stage it happened in
    #[error("{context}: {source}")]
    Wrapped {
        context: String,
        #[source]
        source: Box<Error>,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for Notifuse
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Prefix this error with the stage it occurred in
    pub fn wrap(self, context: impl Into<String>) -> Self {
        Error::Wrapped {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping stage prefixes
    pub fn root(&self) -> &Error {
        let mut current = self;
        while let Error::Wrapped { source, .. } = current {
            current = source;
        }
        current
    }

    /// True when the root cause is a missing entity
    pub fn is_not_found(&self) -> bool {
        matches!(
            self.root(),
            Error::NotFound(_) | Error::BroadcastNotFound(_)
        )
    }

    /// True when the root cause is a cancelled or expired context
    pub fn is_context_error(&self) -> bool {
        matches!(self.root(), Error::Cancelled | Error::DeadlineExceeded)
    }

    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Config(_) => 500,
            Error::Database(_) => 500,
            Error::Storage(_) => 500,
            Error::Auth(_) => 401,
            Error::Validation(_) => 422,
            Error::BroadcastNotFound(_) => 404,
            Error::NotFound(_) => 404,
            Error::InvalidStatus { .. } => 400,
            Error::UnsupportedProvider(_) => 400,
            Error::InvalidPayload(_) => 400,
            Error::EventProcessing { .. } => 500,
            Error::Cancelled => 499,
            Error::DeadlineExceeded => 504,
            Error::Transport(_) => 502,
            Error::Internal(_) => 500,
            Error::Wrapped { source, .. } => source.status_code(),
            Error::Other(_) => 500,
        }
    }

    /// Returns the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "CONFIG_ERROR",
            Error::Database(_) => "DATABASE_ERROR",
            Error::Storage(_) => "STORAGE_ERROR",
            Error::Auth(_) => "UNAUTHORIZED",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::BroadcastNotFound(_) => "BROADCAST_NOT_FOUND",
            Error::NotFound(_) => "NOT_FOUND",
            Error::InvalidStatus { .. } => "INVALID_STATUS",
            Error::UnsupportedProvider(_) => "UNSUPPORTED_PROVIDER",
            Error::InvalidPayload(_) => "INVALID_PAYLOAD",
            Error::EventProcessing { .. } => "EVENT_PROCESSING_ERROR",
            Error::Cancelled => "CANCELLED",
            Error::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Error::Transport(_) => "TRANSPORT_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
            Error::Wrapped { source, .. } => source.code(),
            Error::Other(_) => "INTERNAL_ERROR",
        }
    }
}

/// Stage prefixes for fallible results
pub trait ResultExt<T> {
    /// Wrap the error (if any) with a stage-specific prefix
    fn wrap_err(self, context: &str) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn wrap_err(self, context: &str) -> Result<T> {
        self.map_err(|e| e.wrap(context))
    }
}
