//! Request and response shapes of the broadcast service

use notifuse_storage::models::{
    AbTestSettings, AudienceSettings, Broadcast, BroadcastStatus, ScheduleSettings, UtmParameters,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateBroadcastRequest {
    pub name: String,
    #[serde(default)]
    pub audience: AudienceSettings,
    #[serde(default)]
    pub schedule: ScheduleSettings,
    #[serde(default)]
    pub test_settings: AbTestSettings,
    pub utm_parameters: Option<UtmParameters>,
    #[serde(default)]
    pub tracking_enabled: bool,
}

/// Replaces every mutable field of a draft broadcast
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateBroadcastRequest {
    pub name: String,
    #[serde(default)]
    pub audience: AudienceSettings,
    #[serde(default)]
    pub schedule: ScheduleSettings,
    #[serde(default)]
    pub test_settings: AbTestSettings,
    pub utm_parameters: Option<UtmParameters>,
    #[serde(default)]
    pub tracking_enabled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListBroadcastsRequest {
    pub status: Option<BroadcastStatus>,
    #[serde(default)]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
    #[serde(default)]
    pub with_templates: bool,
}

/// A variation whose template could not be attached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateAttachError {
    pub broadcast_id: String,
    pub variation_id: String,
    pub template_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListBroadcastsResponse {
    pub broadcasts: Vec<Broadcast>,
    pub total_count: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub template_errors: Vec<TemplateAttachError>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleBroadcastRequest {
    #[serde(default)]
    pub send_now: bool,
    /// `YYYY-MM-DD`, required unless sending now
    pub scheduled_date: Option<String>,
    /// `HH:MM`, required unless sending now
    pub scheduled_time: Option<String>,
    pub timezone: Option<String>,
    #[serde(default)]
    pub use_recipient_timezone: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendToIndividualRequest {
    pub recipient_email: String,
    /// Defaults to the first variation
    pub variation_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendToIndividualResponse {
    pub message_id: String,
}
