//! Postmark webhooks

use super::{from_json, invalid, timestamp_or_now, Correlation, ParsedWebhook};
use notifuse_common::Result;
use notifuse_storage::models::{EmailEventType, EmailProviderKind, WebhookEvent};
use serde::Deserialize;
use serde_json::{Map, Value};

const KIND: EmailProviderKind = EmailProviderKind::Postmark;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PostmarkPayload {
    record_type: String,
    #[serde(rename = "MessageID")]
    message_id: Option<String>,
    recipient: Option<String>,
    email: Option<String>,
    #[serde(rename = "Type")]
    bounce_type: Option<String>,
    description: Option<String>,
    details: Option<String>,
    delivered_at: Option<String>,
    bounced_at: Option<String>,
    metadata: Option<Map<String, Value>>,
}

/// Parse a single Postmark webhook record
pub fn parse(payload: &[u8], integration_id: &str) -> Result<ParsedWebhook> {
    let raw_payload = String::from_utf8_lossy(payload).into_owned();
    let record: PostmarkPayload = from_json(KIND, payload)?;

    let correlation = Correlation::from_map(record.metadata.as_ref());
    let message_id = correlation.resolve_message_id(record.message_id.clone());
    let email = record
        .recipient
        .clone()
        .or_else(|| record.email.clone())
        .unwrap_or_default();

    let event = match record.record_type.as_str() {
        "Delivery" => WebhookEvent::new(
            EmailEventType::Delivered,
            KIND,
            integration_id,
            email,
            message_id,
            timestamp_or_now(record.delivered_at.as_deref()),
            raw_payload,
        ),
        "Bounce" => {
            let category = record.bounce_type.unwrap_or_default();
            let bounce_type = if category == "HardBounce" {
                "HardBounce"
            } else {
                "SoftBounce"
            };
            let diagnostic = record
                .details
                .filter(|d| !d.is_empty())
                .or(record.description)
                .unwrap_or_default();

            WebhookEvent::new(
                EmailEventType::Bounce,
                KIND,
                integration_id,
                email,
                message_id,
                timestamp_or_now(record.bounced_at.as_deref()),
                raw_payload,
            )
            .with_bounce(bounce_type, category, diagnostic)
        }
        "SpamComplaint" => {
            let feedback = record
                .bounce_type
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "SpamComplaint".to_string());

            WebhookEvent::new(
                EmailEventType::Complaint,
                KIND,
                integration_id,
                email,
                message_id,
                timestamp_or_now(record.bounced_at.as_deref()),
                raw_payload,
            )
            .with_complaint(feedback)
        }
        other => return Err(invalid(KIND, format!("unsupported record type: {}", other))),
    };

    Ok(ParsedWebhook::events(vec![correlation.apply(event)]))
}
