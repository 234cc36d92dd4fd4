//! Mailjet event API

use super::{from_json, invalid, unix_or_now, Correlation, ParsedWebhook};
use notifuse_common::Result;
use notifuse_storage::models::{EmailEventType, EmailProviderKind, WebhookEvent};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

const KIND: EmailProviderKind = EmailProviderKind::Mailjet;

#[derive(Debug, Deserialize)]
struct MailjetEvent {
    event: String,
    time: Option<f64>,
    #[serde(default)]
    email: String,
    #[serde(rename = "MessageID")]
    message_id: Option<Value>,
    #[serde(rename = "CustomID")]
    custom_id: Option<String>,
    #[serde(rename = "Payload")]
    event_payload: Option<String>,
    #[serde(rename = "hard_bounce", alias = "HardBounce", default)]
    hard_bounce: bool,
    #[serde(alias = "Comment", default)]
    comment: String,
    #[serde(alias = "Error", default)]
    error: String,
}

/// Parse a Mailjet callback; Mailjet posts either one event or an array.
///
/// A single event must be supported. In an array, unusable items are logged
/// and skipped so the rest of the batch is kept.
pub fn parse(payload: &[u8], integration_id: &str) -> Result<ParsedWebhook> {
    let body: Value = from_json(KIND, payload)?;
    let items = match body {
        Value::Array(items) => items,
        object @ Value::Object(_) => {
            let event = parse_item(object, integration_id)?;
            return Ok(ParsedWebhook::events(vec![event]));
        }
        _ => return Err(invalid(KIND, "expected an object or an array")),
    };

    let mut events = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        match parse_item(item, integration_id) {
            Ok(event) => events.push(event),
            Err(e) => warn!(index, error = %e, "Skipping Mailjet event"),
        }
    }

    Ok(ParsedWebhook::events(events))
}

fn parse_item(item: Value, integration_id: &str) -> Result<WebhookEvent> {
    let raw_payload = item.to_string();
    let event: MailjetEvent = serde_json::from_value(item).map_err(|e| invalid(KIND, e))?;
    convert(event, integration_id, raw_payload)
}

fn convert(event: MailjetEvent, integration_id: &str, raw_payload: String) -> Result<WebhookEvent> {
    let correlation = correlation(&event);
    let provider_id = event.message_id.as_ref().and_then(|id| match id {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });
    let message_id = correlation.resolve_message_id(provider_id);
    let timestamp = unix_or_now(event.time);
    let diagnostic = diagnostic(&event.comment, &event.error);

    let new_event = |event_type| {
        WebhookEvent::new(
            event_type,
            KIND,
            integration_id,
            event.email.clone(),
            message_id.clone(),
            timestamp,
            raw_payload.clone(),
        )
    };

    let webhook_event = match event.event.as_str() {
        "sent" => new_event(EmailEventType::Delivered),
        "bounce" => {
            let (bounce_type, category) = if event.hard_bounce {
                ("HardBounce", "Permanent")
            } else {
                ("SoftBounce", "Temporary")
            };
            new_event(EmailEventType::Bounce).with_bounce(bounce_type, category, diagnostic)
        }
        "blocked" => new_event(EmailEventType::Bounce).with_bounce("Blocked", "Blocked", diagnostic),
        "spam" => new_event(EmailEventType::Complaint).with_complaint("spam"),
        "unsub" => new_event(EmailEventType::Complaint).with_complaint("unsubscribe"),
        other => return Err(invalid(KIND, format!("unsupported event: {}", other))),
    };

    Ok(correlation.apply(webhook_event))
}

/// `CustomID` carries our message id; the free-form `Payload` may carry the rest
fn correlation(event: &MailjetEvent) -> Correlation {
    let payload: Option<Value> = event
        .event_payload
        .as_deref()
        .filter(|p| !p.is_empty())
        .and_then(|p| serde_json::from_str(p).ok());
    let mut correlation = Correlation::from_map(payload.as_ref().and_then(|p| p.as_object()));

    if let Some(custom_id) = event.custom_id.as_ref().filter(|id| !id.is_empty()) {
        correlation.message_id = Some(custom_id.clone());
    }
    correlation
}

fn diagnostic(comment: &str, error: &str) -> String {
    match (comment.is_empty(), error.is_empty()) {
        (false, false) => format!("{}: {}", comment, error),
        (false, true) => comment.to_string(),
        (true, false) => error.to_string(),
        (true, true) => String::new(),
    }
}
