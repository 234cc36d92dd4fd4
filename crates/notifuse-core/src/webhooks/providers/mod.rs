//! Provider adapters
//!
//! Each adapter turns one provider's webhook body into canonical
//! [`WebhookEvent`]s. Adapters do no I/O; the SES adapter reports a pending
//! SNS subscription confirmation instead of performing it.

pub mod mailgun;
pub mod mailjet;
pub mod postmark;
pub mod ses;
pub mod smtp;
pub mod sparkpost;

use chrono::{DateTime, TimeZone, Utc};
use notifuse_common::types::{BROADCAST_ID_TAG, MESSAGE_ID_TAG, TRANSACTIONAL_ID_TAG};
use notifuse_common::{Error, Result};
use notifuse_storage::models::{EmailProvider, EmailProviderKind, WebhookEvent};
use serde_json::{Map, Value};

/// Outcome of parsing one webhook delivery
#[derive(Debug, Default)]
pub struct ParsedWebhook {
    pub events: Vec<WebhookEvent>,
    /// SNS `SubscribeURL` that must be visited to confirm a subscription
    pub subscription_confirmation: Option<String>,
}

impl ParsedWebhook {
    pub fn events(events: Vec<WebhookEvent>) -> Self {
        Self {
            events,
            subscription_confirmation: None,
        }
    }
}

/// Parse a webhook body with the adapter matching the provider kind
pub fn parse_webhook(
    provider: &EmailProvider,
    integration_id: &str,
    payload: &[u8],
) -> Result<ParsedWebhook> {
    match provider.kind {
        EmailProviderKind::Ses => ses::parse(payload, integration_id),
        EmailProviderKind::Postmark => postmark::parse(payload, integration_id),
        EmailProviderKind::SparkPost => sparkpost::parse(payload, integration_id),
        EmailProviderKind::Mailgun => {
            let signing_key = provider
                .mailgun
                .as_ref()
                .and_then(|m| m.webhook_signing_key.as_deref())
                .filter(|k| !k.is_empty());
            mailgun::parse(payload, integration_id, signing_key)
        }
        EmailProviderKind::Mailjet => mailjet::parse(payload, integration_id),
        EmailProviderKind::Smtp => smtp::parse(payload, integration_id),
    }
}

pub(crate) fn invalid(provider: EmailProviderKind, message: impl std::fmt::Display) -> Error {
    Error::InvalidPayload(format!("{}: {}", provider, message))
}

pub(crate) fn from_json<T: serde::de::DeserializeOwned>(
    provider: EmailProviderKind,
    payload: &[u8],
) -> Result<T> {
    serde_json::from_slice(payload).map_err(|e| invalid(provider, e))
}

/// RFC 3339 timestamp, or now when absent or malformed
pub(crate) fn timestamp_or_now(value: Option<&str>) -> DateTime<Utc> {
    value
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

/// Unix seconds (possibly fractional), or now when out of range
pub(crate) fn unix_or_now(seconds: Option<f64>) -> DateTime<Utc> {
    seconds
        .filter(|s| s.is_finite() && *s > 0.0)
        .and_then(|s| {
            let whole = s.trunc() as i64;
            let nanos = ((s - s.trunc()) * 1e9) as u32;
            Utc.timestamp_opt(whole, nanos).single()
        })
        .unwrap_or_else(Utc::now)
}

/// Correlation ids carried through a provider as tags or metadata
#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct Correlation {
    pub message_id: Option<String>,
    pub broadcast_id: Option<String>,
    pub transactional_id: Option<String>,
}

impl Correlation {
    /// Read the correlation tags from a metadata object.
    ///
    /// Values may be strings or (as with SES tags) arrays of strings.
    pub fn from_map(map: Option<&Map<String, Value>>) -> Self {
        let Some(map) = map else {
            return Self::default();
        };
        Self {
            message_id: tag_value(map, MESSAGE_ID_TAG),
            broadcast_id: tag_value(map, BROADCAST_ID_TAG),
            transactional_id: tag_value(map, TRANSACTIONAL_ID_TAG),
        }
    }

    /// Our message id when tagged, otherwise the provider's
    pub fn resolve_message_id(&self, provider_message_id: Option<String>) -> Option<String> {
        self.message_id
            .clone()
            .or(provider_message_id)
            .filter(|id| !id.is_empty())
    }

    pub fn apply(&self, event: WebhookEvent) -> WebhookEvent {
        event.with_correlation(self.broadcast_id.clone(), self.transactional_id.clone())
    }
}

fn tag_value(map: &Map<String, Value>, key: &str) -> Option<String> {
    let value = match map.get(key)? {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().find_map(|v| v.as_str())?.to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
