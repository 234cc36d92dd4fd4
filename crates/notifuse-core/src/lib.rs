//! Notifuse Core - Broadcast lifecycle and webhook ingestion
//!
//! This crate holds the domain services: the broadcast state machine with
//! its synchronous event acknowledgements, inbound email provider webhook
//! processing, template rendering and the outbound test-send transport.

pub mod auth;
pub mod broadcast;
pub mod events;
pub mod sender;
pub mod template;
pub mod webhooks;

pub use auth::{ApiKeyAuthenticator, Authenticator};
pub use broadcast::{BroadcastService, BroadcastServiceDeps};
pub use events::{EventBus, EventHandler, EventPayload, InProcessEventBus};
pub use sender::{EmailSender, OutgoingEmail, SmtpEmailSender};
pub use template::{RenderOptions, RenderedEmail, TemplateRenderer};
pub use webhooks::{
    SnsSubscriptionConfirmer, SubscriptionConfirmer, WebhookEventService, WebhookServiceDeps,
};
