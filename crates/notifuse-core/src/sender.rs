//! Outbound email transport used by the test-send path

use async_trait::async_trait;
use lettre::{
    message::{
        header::{ContentType, Header, HeaderName, HeaderValue},
        Mailbox, MultiPart, SinglePart,
    },
    transport::smtp::authentication::Credentials,
    Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use notifuse_common::{Context, Error, Result};
use notifuse_storage::models::{EmailProvider, EmailProviderKind, SmtpSettings};
use std::time::Duration;
use tracing::{debug, info};

/// A fully rendered email addressed to one recipient
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingEmail {
    /// Our message id, carried in `X-Notifuse-Message-ID`
    pub message_id: String,
    pub from_email: String,
    pub from_name: Option<String>,
    pub to: String,
    pub reply_to: Option<String>,
    pub subject: String,
    pub html: String,
    pub text: Option<String>,
}

/// Delivers an email through a workspace's provider integration
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, ctx: &Context, provider: &EmailProvider, email: &OutgoingEmail) -> Result<()>;
}

/// `X-Notifuse-Message-ID` header
#[derive(Debug, Clone, PartialEq)]
struct NotifuseMessageId(String);

impl Header for NotifuseMessageId {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("X-Notifuse-Message-ID")
    }

    fn parse(s: &str) -> std::result::Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self(s.to_string()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

/// Sends through an SMTP relay with lettre
pub struct SmtpEmailSender {
    timeout: Duration,
}

impl SmtpEmailSender {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn transport(&self, smtp: &SmtpSettings) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        let mut builder = if smtp.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host)
                .map_err(|e| Error::Transport(format!("Failed to create SMTP transport: {}", e)))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp.host)
        }
        .port(smtp.port);

        if let (Some(username), Some(password)) = (&smtp.username, &smtp.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(builder.timeout(Some(self.timeout)).build())
    }
}

impl Default for SmtpEmailSender {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    async fn send(&self, ctx: &Context, provider: &EmailProvider, email: &OutgoingEmail) -> Result<()> {
        let smtp = match provider.kind {
            EmailProviderKind::Smtp => provider
                .smtp
                .as_ref()
                .ok_or_else(|| Error::Config("SMTP integration has no SMTP settings".to_string()))?,
            other => return Err(Error::UnsupportedProvider(other.to_string())),
        };

        let message = build_message(email)?;
        let mailer = self.transport(smtp)?;

        debug!(host = %smtp.host, port = smtp.port, to = %email.to, "Sending email");

        tokio::select! {
            biased;
            err = ctx.done() => return Err(err),
            result = mailer.send(message) => {
                result.map_err(|e| Error::Transport(e.to_string()))?;
            }
        }

        info!(message_id = %email.message_id, to = %email.to, "Email sent");
        Ok(())
    }
}

fn mailbox(name: Option<&str>, address: &str, field: &str) -> Result<Mailbox> {
    let address: Address = address
        .parse()
        .map_err(|e| Error::Validation(format!("Invalid {} address '{}': {}", field, address, e)))?;
    Ok(Mailbox::new(name.filter(|n| !n.is_empty()).map(str::to_string), address))
}

/// Build the MIME message
pub fn build_message(email: &OutgoingEmail) -> Result<Message> {
    let mut builder = Message::builder()
        .from(mailbox(email.from_name.as_deref(), &email.from_email, "from")?)
        .to(mailbox(None, &email.to, "to")?)
        .subject(email.subject.clone())
        .header(NotifuseMessageId(email.message_id.clone()));

    if let Some(reply_to) = email.reply_to.as_deref().filter(|r| !r.is_empty()) {
        builder = builder.reply_to(mailbox(None, reply_to, "reply-to")?);
    }

    let message = match &email.text {
        Some(text) => builder.multipart(
            MultiPart::alternative()
                .singlepart(SinglePart::plain(text.clone()))
                .singlepart(SinglePart::html(email.html.clone())),
        ),
        None => builder
            .header(ContentType::TEXT_HTML)
            .body(email.html.clone()),
    };

    message.map_err(|e| Error::Validation(format!("Failed to build email: {}", e)))
}
