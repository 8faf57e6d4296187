//! Email delivery.
//!
//! The poller only sees the [`Notifier`] trait; [`SmtpNotifier`] is the
//! production implementation on top of lettre's async SMTP transport.
use crate::config::EmailConfig;
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use secrecy::ExposeSecret;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Invalid email address `{address}`: {reason}")]
    Address { address: String, reason: String },

    #[error("Could not build message: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

/// Sends one rendered notification.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver an HTML message. `to` is never empty; the poller skips
    /// entries without recipients before calling this.
    async fn send(&self, from: &str, to: &[String], subject: &str, body_html: &str)
        -> Result<(), NotifyError>;
}

/// SMTP delivery with optional STARTTLS and login.
pub struct SmtpNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpNotifier {
    pub fn new(config: &EmailConfig) -> Result<Self, NotifyError> {
        let mut builder = if config.tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };
        builder = builder.port(config.port);

        if !config.user.is_empty() {
            let pass = config
                .pass
                .as_ref()
                .map(|p| p.expose_secret().to_string())
                .unwrap_or_default();
            builder = builder.credentials(Credentials::new(config.user.clone(), pass));
        }

        tracing::debug!(
            host = %config.host,
            port = config.port,
            tls = config.tls,
            "SMTP transport configured"
        );
        Ok(Self {
            transport: builder.build(),
        })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn send(
        &self,
        from: &str,
        to: &[String],
        subject: &str,
        body_html: &str,
    ) -> Result<(), NotifyError> {
        let message = build_message(from, to, subject, body_html)?;
        self.transport.send(message).await?;
        tracing::debug!(recipients = to.len(), subject = %subject, "Email sent");
        Ok(())
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, NotifyError> {
    address.trim().parse().map_err(|e: lettre::address::AddressError| NotifyError::Address {
        address: address.to_string(),
        reason: e.to_string(),
    })
}

pub(crate) fn build_message(
    from: &str,
    to: &[String],
    subject: &str,
    body_html: &str,
) -> Result<Message, NotifyError> {
    let mut builder = Message::builder()
        .from(parse_mailbox(from)?)
        .subject(subject)
        .header(ContentType::TEXT_HTML);
    for recipient in to {
        builder = builder.to(parse_mailbox(recipient)?);
    }
    Ok(builder.body(body_html.to_string())?)
}
