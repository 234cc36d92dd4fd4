//! Amazon SES notifications delivered through SNS

use super::{from_json, invalid, timestamp_or_now, Correlation, ParsedWebhook};
use notifuse_common::Result;
use notifuse_storage::models::{EmailEventType, EmailProviderKind, WebhookEvent};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

const KIND: EmailProviderKind = EmailProviderKind::Ses;

/// SNS HTTP(S) envelope
#[derive(Debug, Deserialize)]
struct SnsEnvelope {
    #[serde(rename = "Type")]
    message_type: String,
    #[serde(rename = "Message", default)]
    message: String,
    #[serde(rename = "SubscribeURL")]
    subscribe_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SesNotification {
    notification_type: Option<String>,
    event_type: Option<String>,
    #[serde(default)]
    mail: SesMail,
    bounce: Option<SesBounce>,
    complaint: Option<SesComplaint>,
    delivery: Option<SesDelivery>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SesMail {
    message_id: Option<String>,
    #[serde(default)]
    destination: Vec<String>,
    tags: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SesBounce {
    #[serde(default)]
    bounce_type: String,
    #[serde(default)]
    bounce_sub_type: String,
    #[serde(default)]
    bounced_recipients: Vec<SesBouncedRecipient>,
    timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SesBouncedRecipient {
    email_address: String,
    diagnostic_code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SesComplaint {
    #[serde(default)]
    complained_recipients: Vec<SesRecipient>,
    complaint_feedback_type: Option<String>,
    timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SesRecipient {
    email_address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SesDelivery {
    #[serde(default)]
    recipients: Vec<String>,
    timestamp: Option<String>,
}

/// Parse an SNS delivery.
///
/// Subscription housekeeping and unrecognized SES message types produce no
/// events. A `SubscriptionConfirmation` reports its `SubscribeURL`.
pub fn parse(payload: &[u8], integration_id: &str) -> Result<ParsedWebhook> {
    let value: Value = from_json(KIND, payload)?;

    // Direct SES event (no SNS envelope)
    if value.get("Type").is_none() {
        return parse_notification(value, integration_id).map(ParsedWebhook::events);
    }

    let envelope: SnsEnvelope = serde_json::from_value(value).map_err(|e| invalid(KIND, e))?;

    match envelope.message_type.as_str() {
        "SubscriptionConfirmation" => {
            let url = envelope
                .subscribe_url
                .filter(|u| !u.is_empty())
                .ok_or_else(|| invalid(KIND, "subscription confirmation without SubscribeURL"))?;
            Ok(ParsedWebhook {
                events: Vec::new(),
                subscription_confirmation: Some(url),
            })
        }
        "UnsubscribeConfirmation" => Ok(ParsedWebhook::default()),
        "Notification" => {
            // SES publishes a plain-text message when validating a topic
            let Ok(message) = serde_json::from_str::<Value>(&envelope.message) else {
                debug!(message = %envelope.message, "Ignoring non-JSON SNS notification");
                return Ok(ParsedWebhook::default());
            };
            parse_notification(message, integration_id).map(ParsedWebhook::events)
        }
        other => {
            debug!(message_type = %other, "Ignoring SNS message type");
            Ok(ParsedWebhook::default())
        }
    }
}

fn parse_notification(message: Value, integration_id: &str) -> Result<Vec<WebhookEvent>> {
    let raw_payload = message.to_string();
    let notification: SesNotification =
        serde_json::from_value(message).map_err(|e| invalid(KIND, e))?;

    let kind = notification
        .notification_type
        .as_deref()
        .or(notification.event_type.as_deref())
        .unwrap_or_default();

    let correlation = Correlation::from_map(notification.mail.tags.as_ref());
    let message_id = correlation.resolve_message_id(notification.mail.message_id.clone());
    let first_destination = notification.mail.destination.first().cloned();

    let event = match kind {
        "Bounce" => {
            let bounce = notification
                .bounce
                .ok_or_else(|| invalid(KIND, "bounce notification without bounce object"))?;
            let recipient = bounce.bounced_recipients.first();
            let email = recipient
                .map(|r| r.email_address.clone())
                .or(first_destination)
                .unwrap_or_default();
            let diagnostic = recipient
                .and_then(|r| r.diagnostic_code.clone())
                .unwrap_or_default();

            WebhookEvent::new(
                EmailEventType::Bounce,
                KIND,
                integration_id,
                email,
                message_id,
                timestamp_or_now(bounce.timestamp.as_deref()),
                raw_payload,
            )
            .with_bounce(bounce.bounce_type, bounce.bounce_sub_type, diagnostic)
        }
        "Complaint" => {
            let complaint = notification
                .complaint
                .ok_or_else(|| invalid(KIND, "complaint notification without complaint object"))?;
            let email = complaint
                .complained_recipients
                .first()
                .map(|r| r.email_address.clone())
                .or(first_destination)
                .unwrap_or_default();

            WebhookEvent::new(
                EmailEventType::Complaint,
                KIND,
                integration_id,
                email,
                message_id,
                timestamp_or_now(complaint.timestamp.as_deref()),
                raw_payload,
            )
            .with_complaint(complaint.complaint_feedback_type.unwrap_or_default())
        }
        "Delivery" => {
            let delivery = notification
                .delivery
                .ok_or_else(|| invalid(KIND, "delivery notification without delivery object"))?;
            let email = delivery
                .recipients
                .first()
                .cloned()
                .or(first_destination)
                .unwrap_or_default();

            WebhookEvent::new(
                EmailEventType::Delivered,
                KIND,
                integration_id,
                email,
                message_id,
                timestamp_or_now(delivery.timestamp.as_deref()),
                raw_payload,
            )
        }
        other => {
            debug!(notification_type = %other, "Ignoring SES notification type");
            return Ok(Vec::new());
        }
    };

    Ok(vec![correlation.apply(event)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sns(message: Value) -> Vec<u8> {
        json!({
            "Type": "Notification",
            "MessageId": "sns-1",
            "TopicArn": "arn:aws:sns:us-east-1:123:ses",
            "Message": message.to_string()
        })
        .to_string()
        .into_bytes()
    }

    fn mail() -> Value {
        json!({
            "messageId": "ses-msg-1",
            "destination": ["user@example.com"],
            "tags": {
                "notifuse_message_id": ["msg-42"],
                "notifuse_broadcast_id": ["b-9"]
            }
        })
    }

    #[test]
    fn test_delivery() {
        let payload = sns(json!({
            "notificationType": "Delivery",
            "mail": mail(),
            "delivery": {
                "recipients": ["user@example.com"],
                "timestamp": "2024-05-01T12:00:00.000Z"
            }
        }));

        let parsed = parse(&payload, "int-1").unwrap();
        let event = &parsed.events[0];
        assert_eq!(event.event_type, EmailEventType::Delivered);
        assert_eq!(event.recipient_email, "user@example.com");
        assert_eq!(event.message_id.as_deref(), Some("msg-42"));
        assert_eq!(event.broadcast_id.as_deref(), Some("b-9"));
        assert_eq!(event.integration_id, "int-1");
        assert_eq!(event.timestamp.to_rfc3339(), "2024-05-01T12:00:00+00:00");
    }

    #[test]
    fn test_bounce_uses_first_recipient_diagnostic() {
        let payload = sns(json!({
            "eventType": "Bounce",
            "mail": mail(),
            "bounce": {
                "bounceType": "Permanent",
                "bounceSubType": "General",
                "bouncedRecipients": [
                    {"emailAddress": "user@example.com", "diagnosticCode": "smtp; 550 5.1.1 user unknown"},
                    {"emailAddress": "other@example.com", "diagnosticCode": "ignored"}
                ],
                "timestamp": "2024-05-01T12:00:00Z"
            }
        }));

        let event = parse(&payload, "int-1").unwrap().events.remove(0);
        assert_eq!(event.event_type, EmailEventType::Bounce);
        assert_eq!(event.bounce_type.as_deref(), Some("Permanent"));
        assert_eq!(event.bounce_category.as_deref(), Some("General"));
        assert_eq!(
            event.bounce_diagnostic.as_deref(),
            Some("smtp; 550 5.1.1 user unknown")
        );
    }

    #[test]
    fn test_complaint() {
        let payload = sns(json!({
            "notificationType": "Complaint",
            "mail": {"messageId": "ses-msg-2", "destination": ["user@example.com"]},
            "complaint": {
                "complainedRecipients": [{"emailAddress": "user@example.com"}],
                "complaintFeedbackType": "abuse"
            }
        }));

        let event = parse(&payload, "int-1").unwrap().events.remove(0);
        assert_eq!(event.event_type, EmailEventType::Complaint);
        assert_eq!(event.complaint_feedback_type.as_deref(), Some("abuse"));
        assert_eq!(event.message_id.as_deref(), Some("ses-msg-2"));
    }

    #[test]
    fn test_subscription_confirmation_reports_url() {
        let payload = json!({
            "Type": "SubscriptionConfirmation",
            "Message": "You have chosen to subscribe",
            "SubscribeURL": "https://sns.us-east-1.amazonaws.com/?Action=ConfirmSubscription"
        })
        .to_string();

        let parsed = parse(payload.as_bytes(), "int-1").unwrap();
        assert!(parsed.events.is_empty());
        assert_eq!(
            parsed.subscription_confirmation.as_deref(),
            Some("https://sns.us-east-1.amazonaws.com/?Action=ConfirmSubscription")
        );
    }

    #[test]
    fn test_housekeeping_yields_no_events() {
        let unsubscribe = json!({"Type": "UnsubscribeConfirmation", "Message": "bye"}).to_string();
        assert!(parse(unsubscribe.as_bytes(), "i").unwrap().events.is_empty());

        let validation = json!({
            "Type": "Notification",
            "Message": "Successfully validated SNS topic for Amazon SES event publishing."
        })
        .to_string();
        assert!(parse(validation.as_bytes(), "i").unwrap().events.is_empty());

        let unknown = sns(json!({"eventType": "Open", "mail": mail()}));
        assert!(parse(&unknown, "i").unwrap().events.is_empty());
    }

    #[test]
    fn test_malformed_body_is_error() {
        assert!(parse(b"not json", "i").is_err());
    }
}
