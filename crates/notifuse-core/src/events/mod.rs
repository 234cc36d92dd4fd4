//! Lifecycle events and the synchronous acknowledgement contract

mod bus;

pub use bus::{EventHandler, InProcessEventBus};

use notifuse_common::{Context, Error, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::oneshot;

/// A broadcast was scheduled or started immediately
pub const BROADCAST_SCHEDULED: &str = "broadcast.scheduled";
/// A sending broadcast was paused
pub const BROADCAST_PAUSED: &str = "broadcast.paused";
/// A paused broadcast was resumed
pub const BROADCAST_RESUMED: &str = "broadcast.resumed";
/// A scheduled or paused broadcast was cancelled
pub const BROADCAST_CANCELLED: &str = "broadcast.cancelled";

/// Event delivered to downstream workers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventPayload {
    #[serde(rename = "type")]
    pub event_type: String,
    pub workspace_id: String,
    pub entity_id: String,
    pub data: Map<String, Value>,
}

impl EventPayload {
    pub fn new(
        event_type: &str,
        workspace_id: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        Self {
            event_type: event_type.to_string(),
            workspace_id: workspace_id.into(),
            entity_id: entity_id.into(),
            data: Map::new(),
        }
    }

    pub fn with_data(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }
}

/// Invoked once with the outcome of processing a published event
pub type AckCallback = Box<dyn FnOnce(Result<()>) + Send>;

/// Publishes events and reports their processing outcome through a callback
pub trait EventBus: Send + Sync {
    fn publish_with_ack(&self, ctx: &Context, payload: EventPayload, callback: AckCallback);
}

/// Publish an event and wait for its acknowledgement.
///
/// The wait ends early with the context's error when `ctx` is cancelled or
/// its deadline passes; the publish is not retried and a late callback is
/// discarded.
pub async fn publish_and_wait(
    bus: &dyn EventBus,
    ctx: &Context,
    payload: EventPayload,
    action: &'static str,
) -> Result<()> {
    let (tx, rx) = oneshot::channel();

    bus.publish_with_ack(
        ctx,
        payload,
        Box::new(move |result| {
            // receiver is gone once the caller stopped waiting
            let _ = tx.send(result);
        }),
    );

    tokio::select! {
        biased;
        ack = rx => match ack {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(Error::EventProcessing {
                action,
                message: e.to_string(),
            }),
            Err(_) => Err(Error::EventProcessing {
                action,
                message: "acknowledgement channel closed".to_string(),
            }),
        },
        err = ctx.done() => Err(err),
    }
}
