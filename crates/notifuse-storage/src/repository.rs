//! Repository layer for data access

pub mod broadcasts;
pub mod contacts;
pub mod message_history;
pub mod templates;
pub mod webhook_events;
pub mod workspaces;

pub use broadcasts::{
    in_transaction, BroadcastPage, BroadcastRepository, BroadcastTx, DbBroadcastRepository,
    ListBroadcastsParams, TxFuture, TxWork,
};
pub use contacts::{ContactRepository, DbContactRepository};
pub use message_history::{DbMessageHistoryRepository, MessageHistoryRepository};
pub use templates::{DbTemplateRepository, TemplateRepository};
pub use webhook_events::{DbWebhookEventRepository, WebhookEventPage, WebhookEventRepository};
pub use workspaces::{DbWorkspaceRepository, WorkspaceRepository};
