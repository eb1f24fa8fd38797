//! SMTP delivery.
//!
//! One plain-text message per notification, addressed to every configured
//! recipient. The body is the transcript verbatim so merge output keeps its
//! layout in a mail client.

use lettre::message::{header::ContentType, Mailbox};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, info, warn};

use crate::errors::NotificationError;
use crate::models::Notification;

const SUBJECT_TAG: &str = "[cvsgitsync]";
const DEFAULT_SMTP_PORT: u16 = 587;

/// STARTTLS relay plus fixed sender and recipients.
pub struct EmailNotifier {
    smtp_addr: String,
    from: String,
    recipients: Vec<String>,
}

impl EmailNotifier {
    /// `smtp_addr` is `host:port`; the port defaults to 587.
    pub fn new(smtp_addr: String, from: String, recipients: Vec<String>) -> Self {
        Self {
            smtp_addr,
            from,
            recipients,
        }
    }

    pub async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        let message = self.message(notification)?;
        debug!(subject = %notification.subject, to = ?self.recipients, "sending email");

        let (host, port) = split_host_port(&self.smtp_addr);
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .map_err(|e| NotificationError::EmailError(format!("SMTP relay {}: {}", host, e)))?
            .port(port)
            .build();

        transport.send(message).await.map_err(|e| {
            warn!(smtp = %self.smtp_addr, error = %e, "SMTP send failed");
            NotificationError::EmailError(format!("SMTP send via {} failed: {}", self.smtp_addr, e))
        })?;

        info!(subject = %notification.subject, recipients = self.recipients.len(), "email sent");
        Ok(())
    }

    fn message(&self, notification: &Notification) -> Result<Message, NotificationError> {
        let from: Mailbox = self
            .from
            .parse()
            .map_err(|e| NotificationError::EmailError(format!("invalid from address: {}", e)))?;

        let mut builder = Message::builder()
            .from(from)
            .subject(format!("{} {}", SUBJECT_TAG, notification.subject))
            .header(ContentType::TEXT_PLAIN);
        for recipient in &self.recipients {
            let to: Mailbox = recipient.parse().map_err(|e| {
                NotificationError::EmailError(format!("invalid recipient '{}': {}", recipient, e))
            })?;
            builder = builder.to(to);
        }

        builder
            .body(notification.body.clone())
            .map_err(|e| NotificationError::EmailError(format!("failed to build email: {}", e)))
    }
}

fn split_host_port(addr: &str) -> (&str, u16) {
    match addr.rsplit_once(':') {
        Some((host, port)) => (host, port.parse().unwrap_or(DEFAULT_SMTP_PORT)),
        None => (addr, DEFAULT_SMTP_PORT),
    }
}
