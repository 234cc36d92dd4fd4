//! Domain models

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc};
use notifuse_common::types::{BroadcastId, IntegrationId, MessageId, WorkspaceId};
use notifuse_common::{Error, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Broadcast status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastStatus {
    Draft,
    Scheduled,
    Sending,
    Paused,
    Sent,
    Cancelled,
}

impl BroadcastStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BroadcastStatus::Draft => "draft",
            BroadcastStatus::Scheduled => "scheduled",
            BroadcastStatus::Sending => "sending",
            BroadcastStatus::Paused => "paused",
            BroadcastStatus::Sent => "sent",
            BroadcastStatus::Cancelled => "cancelled",
        }
    }

    /// Whether a broadcast in this status may be deleted
    pub fn allows_deletion(&self) -> bool {
        !matches!(self, BroadcastStatus::Sending)
    }
}

impl std::fmt::Display for BroadcastStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BroadcastStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "draft" => Ok(BroadcastStatus::Draft),
            "scheduled" => Ok(BroadcastStatus::Scheduled),
            "sending" => Ok(BroadcastStatus::Sending),
            "paused" => Ok(BroadcastStatus::Paused),
            "sent" => Ok(BroadcastStatus::Sent),
            "cancelled" => Ok(BroadcastStatus::Cancelled),
            _ => Err(Error::Validation(format!("Invalid broadcast status: {}", s))),
        }
    }
}

/// Who receives a broadcast
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudienceSettings {
    #[serde(default)]
    pub lists: Vec<String>,
    #[serde(default)]
    pub segments: Vec<String>,
    #[serde(default)]
    pub exclude_unsubscribed: bool,
    #[serde(default)]
    pub skip_duplicate_emails: bool,
    pub rate_limit_per_minute: Option<u32>,
}

impl AudienceSettings {
    pub fn is_empty(&self) -> bool {
        self.lists.is_empty() && self.segments.is_empty()
    }
}

/// When a broadcast goes out
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSettings {
    #[serde(default)]
    pub is_scheduled: bool,
    /// Local date, `YYYY-MM-DD`
    pub scheduled_date: Option<String>,
    /// Local time, `HH:MM`
    pub scheduled_time: Option<String>,
    pub timezone: Option<String>,
    #[serde(default)]
    pub use_recipient_timezone: bool,
}

impl ScheduleSettings {
    /// The scheduled instant in UTC, or `None` when not scheduled
    pub fn parse_scheduled_date_time(&self) -> Result<Option<DateTime<Utc>>> {
        if !self.is_scheduled {
            return Ok(None);
        }

        let (date, time) = match (self.scheduled_date.as_deref(), self.scheduled_time.as_deref()) {
            (Some(d), Some(t)) if !d.is_empty() && !t.is_empty() => (d, t),
            _ => return Ok(None),
        };

        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|e| Error::Validation(format!("invalid scheduled date '{}': {}", date, e)))?;
        let time = NaiveTime::parse_from_str(time, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(time, "%H:%M:%S"))
            .map_err(|e| Error::Validation(format!("invalid scheduled time '{}': {}", time, e)))?;
        let offset = parse_timezone(self.timezone.as_deref().unwrap_or(""))?;

        let local = date.and_time(time);
        let scheduled = offset.from_local_datetime(&local).single().ok_or_else(|| {
            Error::Validation(format!("ambiguous scheduled date time '{}'", local))
        })?;

        Ok(Some(scheduled.with_timezone(&Utc)))
    }
}

/// Resolve a timezone name to a fixed offset.
///
/// Accepts UTC aliases and numeric offsets such as `+02:00` or `-0530`.
pub fn parse_timezone(timezone: &str) -> Result<FixedOffset> {
    let tz = timezone.trim();
    match tz {
        "" | "UTC" | "Etc/UTC" | "GMT" | "Z" => return Ok(Utc.fix()),
        _ => {}
    }

    let unsupported = || Error::Validation(format!("unsupported timezone: {}", timezone));

    let (sign, rest) = match tz.as_bytes().first() {
        Some(b'+') => (1, &tz[1..]),
        Some(b'-') => (-1, &tz[1..]),
        _ => return Err(unsupported()),
    };

    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(unsupported());
    }

    let hours: i32 = digits[..2].parse().map_err(|_| unsupported())?;
    let minutes: i32 = digits[2..].parse().map_err(|_| unsupported())?;
    if hours > 14 || minutes > 59 {
        return Err(unsupported());
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(unsupported)
}

/// A/B test configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AbTestSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub sample_percentage: u32,
    #[serde(default)]
    pub auto_send_winner: bool,
    pub auto_send_winner_metric: Option<String>,
    pub test_duration_hours: Option<u32>,
    #[serde(default)]
    pub variations: Vec<BroadcastVariation>,
}

/// One A/B arm of a broadcast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastVariation {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub template_id: String,
    /// Resolved template, only populated on read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<Template>,
}

/// UTM parameters appended to links
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtmParameters {
    pub source: Option<String>,
    pub medium: Option<String>,
    pub campaign: Option<String>,
    pub content: Option<String>,
    pub term: Option<String>,
}

impl UtmParameters {
    /// Present parameters as `(utm_key, value)` pairs in canonical order
    pub fn pairs(&self) -> Vec<(&'static str, &str)> {
        [
            ("utm_source", &self.source),
            ("utm_medium", &self.medium),
            ("utm_campaign", &self.campaign),
            ("utm_content", &self.content),
            ("utm_term", &self.term),
        ]
        .into_iter()
        .filter_map(|(key, value)| match value.as_deref() {
            Some(v) if !v.is_empty() => Some((key, v)),
            _ => None,
        })
        .collect()
    }
}

/// Broadcast model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Broadcast {
    pub id: BroadcastId,
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub status: BroadcastStatus,
    pub audience: AudienceSettings,
    pub schedule: ScheduleSettings,
    pub test_settings: AbTestSettings,
    pub utm_parameters: Option<UtmParameters>,
    #[serde(default)]
    pub tracking_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl Broadcast {
    /// Find a variation by id, or the first variation when no id is given
    pub fn variation(&self, id: Option<&str>) -> Option<&BroadcastVariation> {
        match id {
            Some(id) if !id.is_empty() => self.test_settings.variations.iter().find(|v| v.id == id),
            _ => self.test_settings.variations.first(),
        }
    }
}

/// Email template, resolved from the template service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub name: String,
    pub version: i64,
    pub subject: String,
    /// Compiled HTML body
    pub html: String,
    pub text: Option<String>,
    pub sender_id: Option<String>,
    pub reply_to: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Contact model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub external_id: Option<String>,
    #[serde(default)]
    pub properties: serde_json::Value,
}

impl Contact {
    /// A contact known only by address
    pub fn from_email(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            first_name: None,
            last_name: None,
            external_id: None,
            properties: serde_json::json!({}),
        }
    }
}

/// Email provider kinds that can be configured on an integration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailProviderKind {
    Smtp,
    Ses,
    SparkPost,
    Postmark,
    Mailgun,
    Mailjet,
}

impl EmailProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailProviderKind::Smtp => "smtp",
            EmailProviderKind::Ses => "ses",
            EmailProviderKind::SparkPost => "sparkpost",
            EmailProviderKind::Postmark => "postmark",
            EmailProviderKind::Mailgun => "mailgun",
            EmailProviderKind::Mailjet => "mailjet",
        }
    }
}

impl std::fmt::Display for EmailProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EmailProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "smtp" => Ok(EmailProviderKind::Smtp),
            "ses" => Ok(EmailProviderKind::Ses),
            "sparkpost" => Ok(EmailProviderKind::SparkPost),
            "postmark" => Ok(EmailProviderKind::Postmark),
            "mailgun" => Ok(EmailProviderKind::Mailgun),
            "mailjet" => Ok(EmailProviderKind::Mailjet),
            other => Err(Error::UnsupportedProvider(other.to_string())),
        }
    }
}

/// A from-address configured on a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

/// SMTP relay settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(default)]
    pub use_tls: bool,
}

/// Mailgun settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailgunSettings {
    pub domain: String,
    pub api_key: Option<String>,
    /// HTTP webhook signing key; when set, inbound webhooks must be signed
    pub webhook_signing_key: Option<String>,
}

/// Email provider configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailProvider {
    pub kind: EmailProviderKind,
    #[serde(default)]
    pub senders: Vec<Sender>,
    pub smtp: Option<SmtpSettings>,
    pub mailgun: Option<MailgunSettings>,
}

impl EmailProvider {
    /// Resolve a sender by id, falling back to the default (or first) sender
    pub fn sender(&self, id: Option<&str>) -> Option<&Sender> {
        if let Some(id) = id.filter(|id| !id.is_empty()) {
            if let Some(sender) = self.senders.iter().find(|s| s.id == id) {
                return Some(sender);
            }
        }
        self.senders
            .iter()
            .find(|s| s.is_default)
            .or_else(|| self.senders.first())
    }
}

/// Integration kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationKind {
    Email,
}

/// A third-party integration configured on a workspace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Integration {
    pub id: IntegrationId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: IntegrationKind,
    pub email_provider: EmailProvider,
}

/// Workspace settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceSettings {
    pub marketing_email_provider_id: Option<IntegrationId>,
    pub transactional_email_provider_id: Option<IntegrationId>,
    #[serde(default)]
    pub email_tracking_enabled: bool,
    pub website_url: Option<String>,
}

/// Workspace model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub name: String,
    #[serde(default)]
    pub settings: WorkspaceSettings,
    #[serde(default)]
    pub integrations: Vec<Integration>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workspace {
    /// Find an integration by id
    pub fn integration(&self, id: &str) -> Option<&Integration> {
        self.integrations.iter().find(|i| i.id == id)
    }

    /// The configured marketing or transactional provider, if any
    pub fn email_provider(&self, is_marketing: bool) -> Result<Option<&EmailProvider>> {
        let provider_id = if is_marketing {
            self.settings.marketing_email_provider_id.as_deref()
        } else {
            self.settings.transactional_email_provider_id.as_deref()
        };

        match provider_id {
            None | Some("") => Ok(None),
            Some(id) => self
                .integration(id)
                .map(|i| Some(&i.email_provider))
                .ok_or_else(|| Error::NotFound(format!("integration {}", id))),
        }
    }
}

/// Canonical webhook event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmailEventType {
    Delivered,
    Bounce,
    Complaint,
}

impl EmailEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailEventType::Delivered => "delivered",
            EmailEventType::Bounce => "bounce",
            EmailEventType::Complaint => "complaint",
        }
    }
}

impl std::fmt::Display for EmailEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EmailEventType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "delivered" => Ok(EmailEventType::Delivered),
            "bounce" => Ok(EmailEventType::Bounce),
            "complaint" => Ok(EmailEventType::Complaint),
            _ => Err(Error::Validation(format!("Invalid webhook event type: {}", s))),
        }
    }
}

/// A normalized provider notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EmailEventType,
    pub email_provider_kind: EmailProviderKind,
    pub integration_id: IntegrationId,
    pub recipient_email: String,
    pub message_id: Option<MessageId>,
    pub transactional_id: Option<String>,
    pub broadcast_id: Option<BroadcastId>,
    pub timestamp: DateTime<Utc>,
    pub raw_payload: String,
    pub bounce_type: Option<String>,
    pub bounce_category: Option<String>,
    pub bounce_diagnostic: Option<String>,
    pub complaint_feedback_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl WebhookEvent {
    pub fn new(
        event_type: EmailEventType,
        email_provider_kind: EmailProviderKind,
        integration_id: impl Into<IntegrationId>,
        recipient_email: impl Into<String>,
        message_id: Option<MessageId>,
        timestamp: DateTime<Utc>,
        raw_payload: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type,
            email_provider_kind,
            integration_id: integration_id.into(),
            recipient_email: recipient_email.into(),
            message_id: message_id.filter(|id| !id.is_empty()),
            transactional_id: None,
            broadcast_id: None,
            timestamp,
            raw_payload: raw_payload.into(),
            bounce_type: None,
            bounce_category: None,
            bounce_diagnostic: None,
            complaint_feedback_type: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_bounce(
        mut self,
        bounce_type: impl Into<String>,
        category: impl Into<String>,
        diagnostic: impl Into<String>,
    ) -> Self {
        self.bounce_type = non_empty(bounce_type.into());
        self.bounce_category = non_empty(category.into());
        self.bounce_diagnostic = non_empty(diagnostic.into());
        self
    }

    pub fn with_complaint(mut self, feedback_type: impl Into<String>) -> Self {
        self.complaint_feedback_type = non_empty(feedback_type.into());
        self
    }

    pub fn with_correlation(
        mut self,
        broadcast_id: Option<String>,
        transactional_id: Option<String>,
    ) -> Self {
        self.broadcast_id = broadcast_id.filter(|id| !id.is_empty());
        self.transactional_id = transactional_id.filter(|id| !id.is_empty());
        self
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Filters for listing webhook events
#[derive(Debug, Clone, Default)]
pub struct WebhookEventListParams {
    pub event_type: Option<EmailEventType>,
    pub recipient_email: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

/// Message-history event kinds reconciled from webhooks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageEvent {
    Delivered,
    Bounced,
    Complained,
}

impl MessageEvent {
    /// Timestamp column recording this event in message history
    pub fn column(&self) -> &'static str {
        match self {
            MessageEvent::Delivered => "delivered_at",
            MessageEvent::Bounced => "bounced_at",
            MessageEvent::Complained => "complained_at",
        }
    }
}

impl From<EmailEventType> for MessageEvent {
    fn from(event_type: EmailEventType) -> Self {
        match event_type {
            EmailEventType::Delivered => MessageEvent::Delivered,
            EmailEventType::Bounce => MessageEvent::Bounced,
            EmailEventType::Complaint => MessageEvent::Complained,
        }
    }
}

/// A status update derived from one webhook event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEventUpdate {
    pub message_id: MessageId,
    pub event: MessageEvent,
    pub timestamp: DateTime<Utc>,
    pub status_info: Option<String>,
}

/// One sent email as tracked in message history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageHistory {
    pub id: MessageId,
    pub contact_email: String,
    pub broadcast_id: Option<BroadcastId>,
    pub template_id: Option<String>,
    pub status_info: Option<String>,
    pub sent_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub bounced_at: Option<DateTime<Utc>>,
    pub complained_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl MessageHistory {
    pub fn event_time(&self, event: MessageEvent) -> Option<DateTime<Utc>> {
        match event {
            MessageEvent::Delivered => self.delivered_at,
            MessageEvent::Bounced => self.bounced_at,
            MessageEvent::Complained => self.complained_at,
        }
    }

    /// Record the event unless it is already recorded; returns whether anything changed
    pub fn apply_if_not_set(&mut self, update: &MessageEventUpdate) -> bool {
        let slot = match update.event {
            MessageEvent::Delivered => &mut self.delivered_at,
            MessageEvent::Bounced => &mut self.bounced_at,
            MessageEvent::Complained => &mut self.complained_at,
        };
        if slot.is_some() {
            return false;
        }

        *slot = Some(update.timestamp);
        if update.status_info.is_some() {
            self.status_info = update.status_info.clone();
        }
        self.updated_at = Utc::now();
        true
    }
}
