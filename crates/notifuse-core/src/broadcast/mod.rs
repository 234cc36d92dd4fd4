//! Broadcast lifecycle
//!
//! Creation, editing and listing of broadcasts, the status state machine
//! (schedule, pause, resume, cancel) and single-recipient test sends.

pub mod lifecycle;
pub mod service;
pub mod types;
pub mod validation;

pub use service::{BroadcastService, BroadcastServiceDeps};
pub use types::{
    CreateBroadcastRequest, ListBroadcastsRequest, ListBroadcastsResponse,
    ScheduleBroadcastRequest, SendToIndividualRequest, SendToIndividualResponse,
    TemplateAttachError, UpdateBroadcastRequest,
};
