//! SNS subscription confirmation

use async_trait::async_trait;
use notifuse_common::config::WebhookConfig;
use notifuse_common::{Context, Error, Result};
use reqwest::{Client, Url};
use std::time::Duration;
use tracing::{debug, info};

/// Visits an SNS `SubscribeURL` to confirm a topic subscription
#[async_trait]
pub trait SubscriptionConfirmer: Send + Sync {
    async fn confirm(&self, ctx: &Context, subscribe_url: &str) -> Result<()>;
}

/// Confirms subscriptions over HTTP
pub struct SnsSubscriptionConfirmer {
    client: Client,
    verify_host: bool,
}

impl SnsSubscriptionConfirmer {
    pub fn new(config: &WebhookConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            verify_host: config.verify_sns_subscribe_host,
        })
    }
}

#[async_trait]
impl SubscriptionConfirmer for SnsSubscriptionConfirmer {
    async fn confirm(&self, ctx: &Context, subscribe_url: &str) -> Result<()> {
        let url = validate_subscribe_url(subscribe_url, self.verify_host)?;
        debug!(host = ?url.host_str(), "Confirming SNS subscription");

        let response = tokio::select! {
            biased;
            err = ctx.done() => return Err(err),
            response = self.client.get(url).send() => {
                response.map_err(|e| Error::Transport(e.to_string()))?
            }
        };

        if !response.status().is_success() {
            return Err(Error::Transport(format!(
                "subscription confirmation returned status {}",
                response.status()
            )));
        }

        info!("SNS subscription confirmed");
        Ok(())
    }
}

/// Only http(s) URLs are visited; with `verify_host`, only https on amazonaws.com
pub fn validate_subscribe_url(url_str: &str, verify_host: bool) -> Result<Url> {
    let url = Url::parse(url_str)
        .map_err(|e| Error::InvalidPayload(format!("invalid SubscribeURL: {}", e)))?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(Error::InvalidPayload(format!(
                "SubscribeURL scheme '{}' is not allowed",
                scheme
            )));
        }
    }

    let host = url
        .host_str()
        .ok_or_else(|| Error::InvalidPayload("SubscribeURL has no host".to_string()))?
        .to_lowercase();

    if verify_host {
        if url.scheme() != "https" {
            return Err(Error::InvalidPayload(
                "SubscribeURL must use https".to_string(),
            ));
        }
        if host != "amazonaws.com" && !host.ends_with(".amazonaws.com") {
            return Err(Error::InvalidPayload(format!(
                "SubscribeURL host '{}' is not an AWS endpoint",
                host
            )));
        }
    }

    Ok(url)
}
