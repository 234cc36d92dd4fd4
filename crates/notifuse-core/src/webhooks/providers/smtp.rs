//! Delivery events for SMTP relays.
//!
//! Plain SMTP has no callback API, so relays (or a bounce processor in front
//! of the mailbox) post this crate's own JSON format:
//!
//! ```json
//! {
//!   "event": "bounce",
//!   "recipient": "user@example.com",
//!   "message_id": "...",
//!   "timestamp": "2024-05-01T12:00:00Z",
//!   "bounce_type": "HardBounce",
//!   "bounce_category": "Permanent",
//!   "diagnostic": "550 5.1.1 user unknown",
//!   "metadata": {"notifuse_broadcast_id": "..."}
//! }
//! ```

use super::{from_json, invalid, timestamp_or_now, Correlation, ParsedWebhook};
use notifuse_common::Result;
use notifuse_storage::models::{EmailEventType, EmailProviderKind, WebhookEvent};
use serde::Deserialize;
use serde_json::{Map, Value};

const KIND: EmailProviderKind = EmailProviderKind::Smtp;

#[derive(Debug, Deserialize)]
struct SmtpEvent {
    event: String,
    recipient: String,
    message_id: Option<String>,
    timestamp: Option<String>,
    bounce_type: Option<String>,
    bounce_category: Option<String>,
    diagnostic: Option<String>,
    complaint_feedback_type: Option<String>,
    metadata: Option<Map<String, Value>>,
}

pub fn parse(payload: &[u8], integration_id: &str) -> Result<ParsedWebhook> {
    let raw_payload = String::from_utf8_lossy(payload).into_owned();
    let body: SmtpEvent = from_json(KIND, payload)?;

    let event_type: EmailEventType = body
        .event
        .parse()
        .map_err(|_| invalid(KIND, format!("unsupported event: {}", body.event)))?;

    let correlation = Correlation::from_map(body.metadata.as_ref());
    let message_id = correlation.resolve_message_id(body.message_id);

    let event = WebhookEvent::new(
        event_type,
        KIND,
        integration_id,
        body.recipient,
        message_id,
        timestamp_or_now(body.timestamp.as_deref()),
        raw_payload,
    );

    let event = match event_type {
        EmailEventType::Delivered => event,
        EmailEventType::Bounce => event.with_bounce(
            body.bounce_type.unwrap_or_else(|| "Bounce".to_string()),
            body.bounce_category.unwrap_or_default(),
            body.diagnostic.unwrap_or_default(),
        ),
        EmailEventType::Complaint => {
            event.with_complaint(body.complaint_feedback_type.unwrap_or_default())
        }
    };

    Ok(ParsedWebhook::events(vec![correlation.apply(event)]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_bounce_defaults_type() {
        let payload = json!({
            "event": "bounce",
            "recipient": "gone@example.com",
            "message_id": "msg-1",
            "timestamp": "2024-05-01T12:00:00Z",
            "diagnostic": "550 5.1.1 user unknown"
        })
        .to_string();

        let event = parse(payload.as_bytes(), "int").unwrap().events.remove(0);
        assert_eq!(event.event_type, EmailEventType::Bounce);
        assert_eq!(event.bounce_type.as_deref(), Some("Bounce"));
        assert_eq!(event.bounce_category, None);
        assert_eq!(event.bounce_diagnostic.as_deref(), Some("550 5.1.1 user unknown"));
        assert_eq!(event.message_id.as_deref(), Some("msg-1"));
    }

    #[test]
    fn test_delivered_with_metadata() {
        let payload = json!({
            "event": "delivered",
            "recipient": "a@example.com",
            "metadata": {"notifuse_message_id": "msg-2", "notifuse_broadcast_id": "b-1"}
        })
        .to_string();

        let event = parse(payload.as_bytes(), "int").unwrap().events.remove(0);
        assert_eq!(event.message_id.as_deref(), Some("msg-2"));
        assert_eq!(event.broadcast_id.as_deref(), Some("b-1"));
    }

    #[test]
    fn test_complaint_and_unknown_event() {
        let payload = json!({
            "event": "complaint",
            "recipient": "a@example.com",
            "complaint_feedback_type": "abuse"
        })
        .to_string();
        let event = parse(payload.as_bytes(), "int").unwrap().events.remove(0);
        assert_eq!(event.complaint_feedback_type.as_deref(), Some("abuse"));

        let unknown = json!({"event": "opened", "recipient": "a@example.com"}).to_string();
        assert!(parse(unknown.as_bytes(), "int").is_err());
    }
}
