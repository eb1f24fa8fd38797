//! Delivery of queued [`Notification`]s.
//!
//! The engine only decides *that* something must be reported (a merge
//! conflict transcript, a failed repository). This module carries those
//! messages to Slack and SMTP. The [`Notifier`] facade dispatches to all
//! configured channels and logs failures without aborting.

pub mod email;
pub mod slack;

use tracing::{info, warn};

use crate::config::NotificationConfig;
use crate::errors::NotificationError;
use crate::models::Notification;

/// Unified notifier that dispatches to all configured channels.
pub struct Notifier {
    slack: Option<slack::SlackNotifier>,
    email: Option<email::EmailNotifier>,
}

impl Notifier {
    /// Create a new notifier from the notification configuration.
    pub fn new(config: &NotificationConfig) -> Self {
        let slack = config.slack_webhook_url.as_ref().map(|url| {
            info!("Slack notifications enabled");
            slack::SlackNotifier::new(url.clone())
        });

        let email = match (&config.email_smtp, &config.email_from) {
            (Some(smtp), Some(from)) if !config.email_recipients.is_empty() => {
                info!("email notifications enabled");
                Some(email::EmailNotifier::new(
                    smtp.clone(),
                    from.clone(),
                    config.email_recipients.clone(),
                ))
            }
            _ => None,
        };

        Self { slack, email }
    }

    /// Send one notification to every configured channel. Fails only when
    /// every channel failed.
    pub async fn deliver(&self, notification: &Notification) -> Result<(), NotificationError> {
        if !self.is_configured() {
            warn!(
                subject = %notification.subject,
                body = %notification.body,
                "no notification channel configured"
            );
            return Ok(());
        }

        info!(subject = %notification.subject, "sending notification");
        let mut errors = Vec::new();

        if let Some(ref slack) = self.slack {
            if let Err(e) = slack.send(notification).await {
                warn!(error = %e, "Slack notification failed");
                errors.push(format!("Slack: {}", e));
            }
        }

        if let Some(ref email) = self.email {
            if let Err(e) = email.send(notification).await {
                warn!(error = %e, "email notification failed");
                errors.push(format!("Email: {}", e));
            }
        }

        let total_channels = self.slack.is_some() as usize + self.email.is_some() as usize;
        if errors.len() >= total_channels {
            return Err(NotificationError::AllChannelsFailed(errors.join("; ")));
        }
        Ok(())
    }

    /// Deliver every notification in order; returns how many could not be
    /// delivered anywhere.
    pub async fn deliver_all(&self, notifications: &[Notification]) -> usize {
        let mut failed = 0;
        for notification in notifications {
            if let Err(e) = self.deliver(notification).await {
                warn!(subject = %notification.subject, error = %e, "notification lost");
                failed += 1;
            }
        }
        failed
    }

    /// Return whether any notification channel is configured.
    pub fn is_configured(&self) -> bool {
        self.slack.is_some() || self.email.is_some()
    }
}
