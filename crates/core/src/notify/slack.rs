//! Slack incoming-webhook delivery.
//!
//! A notification becomes a Block Kit message: the subject as a header and
//! the transcript (merge output, failure detail) as a preformatted section.
//! `text` carries the subject alone for clients that do not render blocks.

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::errors::NotificationError;
use crate::models::Notification;

/// Slack caps a header block at 150 characters.
const MAX_HEADER_CHARS: usize = 150;

/// Slack caps a section's text at 3000 characters, fences included.
const MAX_TRANSCRIPT_CHARS: usize = 2900;

/// Posts notifications to one incoming webhook.
pub struct SlackNotifier {
    webhook_url: String,
    http: reqwest::Client,
}

impl SlackNotifier {
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url,
            http: reqwest::Client::new(),
        }
    }

    pub async fn send(&self, notification: &Notification) -> Result<(), NotificationError> {
        let payload = payload(notification);
        debug!(subject = %notification.subject, "posting to Slack webhook");

        let resp = self
            .http
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(NotificationError::HttpError)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(%status, %body, "Slack webhook rejected notification");
            return Err(NotificationError::SlackError(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        info!(subject = %notification.subject, "Slack notification posted");
        Ok(())
    }
}

/// Build the webhook body for `notification`.
fn payload(notification: &Notification) -> Value {
    let mut blocks = vec![json!({
        "type": "header",
        "text": {
            "type": "plain_text",
            "text": truncate(&notification.subject, MAX_HEADER_CHARS),
        },
    })];

    let transcript = notification.body.trim_end();
    if !transcript.is_empty() {
        blocks.push(json!({
            "type": "section",
            "text": {
                "type": "mrkdwn",
                "text": format!("```{}```", truncate(transcript, MAX_TRANSCRIPT_CHARS)),
            },
        }));
    }

    json!({
        "username": "cvsgitsync",
        "text": notification.subject,
        "blocks": blocks,
        "unfurl_links": false,
        "unfurl_media": false,
    })
}

/// Keep the head of `text`, marking the cut.
fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{}…", head)
}
