//! Mailgun webhooks

use super::{from_json, invalid, unix_or_now, Correlation, ParsedWebhook};
use hmac::{Hmac, Mac};
use notifuse_common::Result;
use notifuse_storage::models::{EmailEventType, EmailProviderKind, WebhookEvent};
use serde::Deserialize;
use serde_json::{Map, Value};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const KIND: EmailProviderKind = EmailProviderKind::Mailgun;

#[derive(Debug, Deserialize)]
struct MailgunPayload {
    signature: Option<MailgunSignature>,
    #[serde(rename = "event-data")]
    event_data: Value,
}

#[derive(Debug, Deserialize)]
struct MailgunSignature {
    timestamp: String,
    token: String,
    signature: String,
}

#[derive(Debug, Deserialize)]
struct EventData {
    event: String,
    timestamp: Option<f64>,
    #[serde(default)]
    recipient: String,
    severity: Option<String>,
    reason: Option<String>,
    #[serde(default)]
    message: MailgunMessage,
    #[serde(rename = "user-variables")]
    user_variables: Option<Map<String, Value>>,
    #[serde(rename = "delivery-status")]
    delivery_status: Option<DeliveryStatus>,
}

#[derive(Debug, Default, Deserialize)]
struct MailgunMessage {
    #[serde(default)]
    headers: MailgunHeaders,
}

#[derive(Debug, Default, Deserialize)]
struct MailgunHeaders {
    #[serde(rename = "message-id")]
    message_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeliveryStatus {
    message: Option<String>,
    description: Option<String>,
}

/// Parse a Mailgun webhook, verifying its signature when a key is configured
pub fn parse(payload: &[u8], integration_id: &str, signing_key: Option<&str>) -> Result<ParsedWebhook> {
    let body: MailgunPayload = from_json(KIND, payload)?;

    if let Some(key) = signing_key {
        let signature = body
            .signature
            .as_ref()
            .ok_or_else(|| invalid(KIND, "missing signature"))?;
        verify_signature(key, signature)?;
    }

    let raw_payload = body.event_data.to_string();
    let data: EventData = serde_json::from_value(body.event_data).map_err(|e| invalid(KIND, e))?;

    let correlation = Correlation::from_map(data.user_variables.as_ref());
    let message_id = correlation.resolve_message_id(data.message.headers.message_id.clone());
    let timestamp = unix_or_now(data.timestamp);

    let event = match data.event.as_str() {
        "delivered" => WebhookEvent::new(
            EmailEventType::Delivered,
            KIND,
            integration_id,
            data.recipient,
            message_id,
            timestamp,
            raw_payload,
        ),
        "failed" => {
            let category = if data.severity.as_deref() == Some("permanent") {
                "HardBounce"
            } else {
                "SoftBounce"
            };
            let diagnostic = data
                .delivery_status
                .and_then(|s| {
                    s.message
                        .filter(|m| !m.is_empty())
                        .or(s.description.filter(|d| !d.is_empty()))
                })
                .or(data.reason)
                .unwrap_or_default();

            WebhookEvent::new(
                EmailEventType::Bounce,
                KIND,
                integration_id,
                data.recipient,
                message_id,
                timestamp,
                raw_payload,
            )
            .with_bounce("Bounce", category, diagnostic)
        }
        "complained" => WebhookEvent::new(
            EmailEventType::Complaint,
            KIND,
            integration_id,
            data.recipient,
            message_id,
            timestamp,
            raw_payload,
        )
        .with_complaint("abuse"),
        other => return Err(invalid(KIND, format!("unsupported event: {}", other))),
    };

    Ok(ParsedWebhook::events(vec![correlation.apply(event)]))
}

fn verify_signature(key: &str, signature: &MailgunSignature) -> Result<()> {
    let expected = hex::decode(&signature.signature)
        .map_err(|_| invalid(KIND, "malformed signature"))?;

    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|e| invalid(KIND, e))?;
    mac.update(signature.timestamp.as_bytes());
    mac.update(signature.token.as_bytes());

    mac.verify_slice(&expected)
        .map_err(|_| invalid(KIND, "signature mismatch"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sign(key: &str, timestamp: &str, token: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(key.as_bytes()).unwrap();
        mac.update(timestamp.as_bytes());
        mac.update(token.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn payload(event_data: Value, signature: &str) -> Vec<u8> {
        json!({
            "signature": {
                "timestamp": "1714564800",
                "token": "tok",
                "signature": signature
            },
            "event-data": event_data
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn test_delivered_with_user_variables() {
        let body = payload(
            json!({
                "event": "delivered",
                "timestamp": 1714564800.25,
                "recipient": "user@example.com",
                "message": {"headers": {"message-id": "mg-1@example.com"}},
                "user-variables": {"notifuse_message_id": "msg-1"}
            }),
            "",
        );

        let event = parse(&body, "int", None).unwrap().events.remove(0);
        assert_eq!(event.event_type, EmailEventType::Delivered);
        assert_eq!(event.message_id.as_deref(), Some("msg-1"));
        assert_eq!(event.timestamp.timestamp(), 1_714_564_800);
    }

    #[test]
    fn test_failed_permanent_is_hard_bounce() {
        let body = payload(
            json!({
                "event": "failed",
                "severity": "permanent",
                "recipient": "gone@example.com",
                "message": {"headers": {"message-id": "mg-2"}},
                "delivery-status": {"message": "No such user", "code": 550}
            }),
            "",
        );

        let event = parse(&body, "int", None).unwrap().events.remove(0);
        assert_eq!(event.bounce_type.as_deref(), Some("Bounce"));
        assert_eq!(event.bounce_category.as_deref(), Some("HardBounce"));
        assert_eq!(event.bounce_diagnostic.as_deref(), Some("No such user"));
        assert_eq!(event.message_id.as_deref(), Some("mg-2"));
    }

    #[test]
    fn test_failed_temporary_is_soft_bounce() {
        let body = payload(
            json!({"event": "failed", "severity": "temporary", "recipient": "a@example.com", "reason": "greylisted"}),
            "",
        );

        let event = parse(&body, "int", None).unwrap().events.remove(0);
        assert_eq!(event.bounce_category.as_deref(), Some("SoftBounce"));
        assert_eq!(event.bounce_diagnostic.as_deref(), Some("greylisted"));
    }

    #[test]
    fn test_complained_has_abuse_feedback() {
        let body = payload(json!({"event": "complained", "recipient": "a@example.com"}), "");
        let event = parse(&body, "int", None).unwrap().events.remove(0);
        assert_eq!(event.complaint_feedback_type.as_deref(), Some("abuse"));
    }

    #[test]
    fn test_signature_verification() {
        let data = json!({"event": "delivered", "recipient": "a@example.com"});

        let good = payload(data.clone(), &sign("key-1", "1714564800", "tok"));
        assert!(parse(&good, "int", Some("key-1")).is_ok());

        let bad = payload(data, &sign("other-key", "1714564800", "tok"));
        let err = parse(&bad, "int", Some("key-1")).unwrap_err();
        assert_eq!(err.to_string(), "invalid webhook payload: mailgun: signature mismatch");
    }

    #[test]
    fn test_unsupported_event_is_error() {
        let body = payload(json!({"event": "opened", "recipient": "a@example.com"}), "");
        assert!(parse(&body, "int", None).is_err());
    }
}
