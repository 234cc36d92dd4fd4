//! Request context carrying cancellation, deadline and caller credentials
//!
//! Every public service operation takes a [`Context`]. Blocking waits inside
//! an operation (such as waiting for an event acknowledgement) race against
//! [`Context::done`] so that a cancelled or expired request surfaces its own
//! error instead of hanging.

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::Error;

/// Per-request context
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    credentials: Option<String>,
}

impl Context {
    /// Create a fresh context with no deadline and no credentials
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a bearer credential (API key) presented by the caller
    pub fn with_credentials(mut self, credentials: impl Into<String>) -> Self {
        self.credentials = Some(credentials.into());
        self
    }

    /// Expire the context at the given instant
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    /// Expire the context after the given duration
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// A child context that is cancelled together with this one,
    /// but can also be cancelled on its own
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
            credentials: self.credentials.clone(),
        }
    }

    /// Credentials presented by the caller, if any
    pub fn credentials(&self) -> Option<&str> {
        self.credentials.as_deref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Cancel this context and all of its children
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The context error if the context is already done
    pub fn err(&self) -> Option<Error> {
        if self.cancel.is_cancelled() {
            return Some(Error::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Error::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context is cancelled or its deadline passes,
    /// yielding the corresponding error
    pub async fn done(&self) -> Error {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => Error::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => Error::DeadlineExceeded,
                }
            }
            None => {
                self.cancel.cancelled().await;
                Error::Cancelled
            }
        }
    }
}
