//! Template Renderer - personalizes broadcast templates for one contact

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use notifuse_common::config::TrackingConfig;
use notifuse_common::{Error, Result};
use notifuse_storage::models::{Contact, Template, UtmParameters};
use regex::{Captures, Regex};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use std::collections::HashMap;

type HmacSha256 = Hmac<Sha256>;

/// Per-message rendering inputs
#[derive(Debug, Clone, Default)]
pub struct RenderOptions<'a> {
    pub workspace_id: &'a str,
    pub broadcast_id: Option<&'a str>,
    pub message_id: &'a str,
    pub utm: Option<&'a UtmParameters>,
    pub tracking_enabled: bool,
}

/// Subject and bodies ready to hand to a transport
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
    pub text: Option<String>,
}

/// What an unsubscribe token asserts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsubscribeClaims {
    pub workspace_id: String,
    pub email: String,
    pub broadcast_id: Option<String>,
}

/// Template renderer for personalizing email content
pub struct TemplateRenderer {
    tracking_endpoint: Option<String>,
    unsubscribe_secret: String,
    placeholder: Regex,
    href: Regex,
}

impl TemplateRenderer {
    pub fn new(config: &TrackingConfig) -> Result<Self> {
        let placeholder = Regex::new(r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}")
            .map_err(|e| Error::Internal(format!("invalid placeholder pattern: {}", e)))?;
        let href = Regex::new(r#"href="(https?://[^"]+)""#)
            .map_err(|e| Error::Internal(format!("invalid href pattern: {}", e)))?;

        Ok(Self {
            tracking_endpoint: config
                .endpoint
                .as_deref()
                .map(|e| e.trim_end_matches('/').to_string())
                .filter(|e| !e.is_empty()),
            unsubscribe_secret: config.unsubscribe_secret.clone(),
            placeholder,
            href,
        })
    }

    /// Render subject, HTML and text of a template for one contact
    pub fn render(
        &self,
        template: &Template,
        contact: &Contact,
        options: &RenderOptions<'_>,
    ) -> RenderedEmail {
        let vars = self.variables(contact, options);

        let mut html = self.replace_placeholders(&template.html, &vars);
        if let Some(utm) = options.utm {
            html = self.apply_utm(&html, utm);
        }
        if options.tracking_enabled {
            if let Some(pixel) = self.open_pixel(options) {
                html = insert_before_body_end(&html, &pixel);
            }
        }

        RenderedEmail {
            subject: self.replace_placeholders(&template.subject, &vars),
            html,
            text: template
                .text
                .as_deref()
                .map(|text| self.replace_placeholders(text, &vars)),
        }
    }

    fn variables(&self, contact: &Contact, options: &RenderOptions<'_>) -> HashMap<String, String> {
        let mut vars = HashMap::new();

        let first_name = contact.first_name.clone().unwrap_or_default();
        let last_name = contact.last_name.clone().unwrap_or_default();
        let name = format!("{} {}", first_name, last_name).trim().to_string();

        for (key, value) in [
            ("email", contact.email.clone()),
            ("first_name", first_name),
            ("last_name", last_name),
            ("name", name),
            ("external_id", contact.external_id.clone().unwrap_or_default()),
        ] {
            vars.insert(format!("contact.{}", key), value.clone());
            vars.insert(key.to_string(), value);
        }

        if let Some(properties) = contact.properties.as_object() {
            for (key, value) in properties {
                let value = match value {
                    Value::String(s) => s.clone(),
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                vars.insert(format!("properties.{}", key), value);
            }
        }

        vars.insert("message_id".to_string(), options.message_id.to_string());
        if let Some(broadcast_id) = options.broadcast_id {
            vars.insert("broadcast_id".to_string(), broadcast_id.to_string());
        }
        if let Some(url) = self.unsubscribe_url(options.workspace_id, &contact.email, options.broadcast_id) {
            vars.insert("unsubscribe_url".to_string(), url);
        }

        vars
    }

    /// Replace known placeholders; unknown ones render empty
    fn replace_placeholders(&self, content: &str, vars: &HashMap<String, String>) -> String {
        self.placeholder
            .replace_all(content, |caps: &Captures| {
                vars.get(&caps[1]).cloned().unwrap_or_default()
            })
            .into_owned()
    }

    fn unsubscribe_url(&self, workspace_id: &str, email: &str, broadcast_id: Option<&str>) -> Option<String> {
        let endpoint = self.tracking_endpoint.as_deref()?;
        let token = self.unsubscribe_token(&UnsubscribeClaims {
            workspace_id: workspace_id.to_string(),
            email: email.to_string(),
            broadcast_id: broadcast_id.map(str::to_string),
        });
        Url::parse_with_params(&format!("{}/unsubscribe", endpoint), &[("token", token)])
            .ok()
            .map(String::from)
    }

    /// `base64url(claims) "." hex(hmac)`
    pub fn unsubscribe_token(&self, claims: &UnsubscribeClaims) -> String {
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap_or_default());
        format!("{}.{}", payload, self.sign(&payload))
    }

    /// Claims of a token signed with this renderer's secret
    pub fn verify_unsubscribe_token(&self, token: &str) -> Option<UnsubscribeClaims> {
        let (payload, signature) = token.split_once('.')?;
        let signature = hex::decode(signature).ok()?;

        let mut mac = HmacSha256::new_from_slice(self.unsubscribe_secret.as_bytes()).ok()?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature).ok()?;

        let decoded = URL_SAFE_NO_PAD.decode(payload).ok()?;
        serde_json::from_slice(&decoded).ok()
    }

    fn sign(&self, payload: &str) -> String {
        match HmacSha256::new_from_slice(self.unsubscribe_secret.as_bytes()) {
            Ok(mut mac) => {
                mac.update(payload.as_bytes());
                hex::encode(mac.finalize().into_bytes())
            }
            Err(_) => String::new(),
        }
    }

    /// Append UTM parameters to outbound links, keeping any the link already sets
    fn apply_utm(&self, html: &str, utm: &UtmParameters) -> String {
        let pairs = utm.pairs();
        if pairs.is_empty() {
            return html.to_string();
        }

        self.href
            .replace_all(html, |caps: &Captures| {
                let link = &caps[1];
                if self.is_tracking_link(link) {
                    return caps[0].to_string();
                }
                let Ok(mut url) = Url::parse(link) else {
                    return caps[0].to_string();
                };

                let existing: Vec<String> = url.query_pairs().map(|(k, _)| k.into_owned()).collect();
                {
                    let mut query = url.query_pairs_mut();
                    for (key, value) in &pairs {
                        if !existing.iter().any(|k| k == key) {
                            query.append_pair(key, value);
                        }
                    }
                }
                format!(r#"href="{}""#, url)
            })
            .into_owned()
    }

    fn is_tracking_link(&self, link: &str) -> bool {
        self.tracking_endpoint
            .as_deref()
            .map_or(false, |endpoint| link.starts_with(endpoint))
    }

    fn open_pixel(&self, options: &RenderOptions<'_>) -> Option<String> {
        let endpoint = self.tracking_endpoint.as_deref()?;
        let url = Url::parse_with_params(
            &format!("{}/opens", endpoint),
            &[("wid", options.workspace_id), ("mid", options.message_id)],
        )
        .ok()?;
        Some(format!(
            r#"<img src="{}" width="1" height="1" alt="" style="display:none" />"#,
            url
        ))
    }
}

fn insert_before_body_end(html: &str, snippet: &str) -> String {
    match html.rfind("</body>") {
        Some(pos) => format!("{}{}{}", &html[..pos], snippet, &html[pos..]),
        None => format!("{}{}", html, snippet),
    }
}
