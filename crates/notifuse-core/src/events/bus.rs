//! In-process event bus

use super::{AckCallback, EventBus, EventPayload};
use async_trait::async_trait;
use notifuse_common::{Context, Result};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Consumes one kind of lifecycle event
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, ctx: &Context, payload: &EventPayload) -> Result<()>;
}

/// Dispatches events to handlers registered in this process.
///
/// Handlers for an event run in registration order on a spawned task; the
/// acknowledgement fires after the last one, carrying the first error.
#[derive(Default)]
pub struct InProcessEventBus {
    handlers: RwLock<HashMap<String, Vec<Arc<dyn EventHandler>>>>,
}

impl InProcessEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an event type
    pub fn subscribe(&self, event_type: &str, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers
            .entry(event_type.to_string())
            .or_default()
            .push(handler);
    }

    fn handlers_for(&self, event_type: &str) -> Vec<Arc<dyn EventHandler>> {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        handlers.get(event_type).cloned().unwrap_or_default()
    }
}

impl EventBus for InProcessEventBus {
    fn publish_with_ack(&self, ctx: &Context, payload: EventPayload, callback: AckCallback) {
        let handlers = self.handlers_for(&payload.event_type);
        if handlers.is_empty() {
            debug!(event_type = %payload.event_type, "No handlers registered, acknowledging");
            callback(Ok(()));
            return;
        }

        let ctx = ctx.clone();
        tokio::spawn(async move {
            let mut first_error = None;
            for handler in handlers {
                if let Err(e) = handler.handle(&ctx, &payload).await {
                    warn!(
                        event_type = %payload.event_type,
                        entity_id = %payload.entity_id,
                        error = %e,
                        "Event handler failed"
                    );
                    first_error.get_or_insert(e);
                }
            }

            callback(match first_error {
                Some(e) => Err(e),
                None => Ok(()),
            });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{publish_and_wait, BROADCAST_PAUSED, BROADCAST_RESUMED};
    use notifuse_common::Error;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, _ctx: &Context, payload: &EventPayload) -> Result<()> {
            self.seen.lock().unwrap().push(payload.entity_id.clone());
            if self.fail {
                return Err(Error::Internal("send loop unavailable".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_no_subscribers_acks_immediately() {
        let bus = InProcessEventBus::new();
        let payload = EventPayload::new(BROADCAST_PAUSED, "ws", "b1");
        assert!(publish_and_wait(&bus, &Context::new(), payload, "pause")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_handlers_run_before_ack() {
        let bus = InProcessEventBus::new();
        let recorder = Arc::new(Recorder::default());
        bus.subscribe(BROADCAST_RESUMED, recorder.clone());

        let payload = EventPayload::new(BROADCAST_RESUMED, "ws", "b7");
        publish_and_wait(&bus, &Context::new(), payload, "resume")
            .await
            .unwrap();

        assert_eq!(*recorder.seen.lock().unwrap(), vec!["b7".to_string()]);
    }

    #[tokio::test]
    async fn test_first_handler_error_is_acknowledged() {
        let bus = InProcessEventBus::new();
        let failing = Arc::new(Recorder {
            fail: true,
            ..Default::default()
        });
        let healthy = Arc::new(Recorder::default());
        bus.subscribe(BROADCAST_PAUSED, failing);
        bus.subscribe(BROADCAST_PAUSED, healthy.clone());

        let payload = EventPayload::new(BROADCAST_PAUSED, "ws", "b1");
        let err = publish_and_wait(&bus, &Context::new(), payload, "pause")
            .await
            .unwrap_err();

        assert!(err.to_string().starts_with("failed to process pause event"));
        assert_eq!(healthy.seen.lock().unwrap().len(), 1);
    }
}
