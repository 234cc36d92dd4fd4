//! Inbound email provider webhooks

pub mod providers;
pub mod service;
pub mod sns;

pub use providers::{parse_webhook, ParsedWebhook};
pub use service::{message_event_updates, WebhookEventService, WebhookServiceDeps};
pub use sns::{SnsSubscriptionConfirmer, SubscriptionConfirmer};
