//! SparkPost webhooks

use super::{from_json, invalid, unix_or_now, Correlation, ParsedWebhook};
use notifuse_common::Result;
use notifuse_storage::models::{EmailEventType, EmailProviderKind, WebhookEvent};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

const KIND: EmailProviderKind = EmailProviderKind::SparkPost;

#[derive(Debug, Deserialize)]
struct SparkPostItem {
    msys: Option<Msys>,
}

#[derive(Debug, Deserialize)]
struct Msys {
    message_event: Option<MessageEvent>,
}

#[derive(Debug, Deserialize)]
struct MessageEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    rcpt_to: String,
    message_id: Option<String>,
    timestamp: Option<Value>,
    rcpt_meta: Option<Map<String, Value>>,
    bounce_class: Option<Value>,
    reason: Option<String>,
    raw_reason: Option<String>,
    fbtype: Option<String>,
}

/// Parse a SparkPost batch (a JSON array of `msys` wrappers).
///
/// Items we cannot use are logged and skipped so the rest of the batch is kept.
pub fn parse(payload: &[u8], integration_id: &str) -> Result<ParsedWebhook> {
    let items: Vec<Value> = from_json(KIND, payload)?;
    let mut events = Vec::with_capacity(items.len());

    for (index, item) in items.into_iter().enumerate() {
        let raw_payload = item.to_string();
        let parsed = match serde_json::from_value::<SparkPostItem>(item) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(index, error = %e, "Skipping malformed SparkPost item");
                continue;
            }
        };

        // test pings and track/gen events have no message_event
        let Some(event) = parsed.msys.and_then(|m| m.message_event) else {
            debug!(index, "Skipping SparkPost item without message_event");
            continue;
        };

        match convert(event, integration_id, raw_payload) {
            Ok(event) => events.push(event),
            Err(e) => warn!(index, error = %e, "Skipping SparkPost event"),
        }
    }

    Ok(ParsedWebhook::events(events))
}

fn convert(event: MessageEvent, integration_id: &str, raw_payload: String) -> Result<WebhookEvent> {
    let correlation = Correlation::from_map(event.rcpt_meta.as_ref());
    let message_id = correlation.resolve_message_id(event.message_id.clone());
    let timestamp = unix_or_now(event.timestamp.as_ref().and_then(number_or_string));

    let webhook_event = match event.event_type.as_str() {
        "delivery" => WebhookEvent::new(
            EmailEventType::Delivered,
            KIND,
            integration_id,
            event.rcpt_to,
            message_id,
            timestamp,
            raw_payload,
        ),
        "bounce" => {
            let category = event
                .bounce_class
                .as_ref()
                .map(|c| match c {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_default();
            let diagnostic = event.reason.or(event.raw_reason).unwrap_or_default();

            WebhookEvent::new(
                EmailEventType::Bounce,
                KIND,
                integration_id,
                event.rcpt_to,
                message_id,
                timestamp,
                raw_payload,
            )
            .with_bounce("Bounce", category, diagnostic)
        }
        "spam_complaint" => WebhookEvent::new(
            EmailEventType::Complaint,
            KIND,
            integration_id,
            event.rcpt_to,
            message_id,
            timestamp,
            raw_payload,
        )
        .with_complaint(event.fbtype.unwrap_or_else(|| "abuse".to_string())),
        other => return Err(invalid(KIND, format!("unsupported event type: {}", other))),
    };

    Ok(correlation.apply(webhook_event))
}

fn number_or_string(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
