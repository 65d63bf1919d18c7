//! Webhook delivery with deduplication and filtering
//!
//! Each processed message is offered to the configured webhook endpoint at
//! most once per dedup window. The message id is recorded as seen before
//! filters run, so a filtered-out message still consumes its dedup slot and
//! a later duplicate is dropped by dedup rather than re-filtered. That
//! ordering is intentional and relied upon by tests.

pub mod dedup;

use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::WebhookConfig;
use crate::{Error, Result};

pub use dedup::{SeenCache, SEEN_TTL};

/// Client timeout for a single webhook POST
const POST_TIMEOUT: Duration = Duration::from_secs(10);

/// JSON body sent to the webhook endpoint for each inbound message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    /// Chat JID the message arrived in
    pub from: String,
    /// Sender display name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Extracted text or caption
    pub message: String,
    /// Unix timestamp (seconds)
    pub timestamp: i64,
    /// Message type ("text", "image", …)
    #[serde(rename = "type")]
    pub kind: String,
    /// Local path of the downloaded attachment, if any
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub media_url: String,
    /// "dm" or "group"
    pub chat_type: String,
    /// Group name when the chat is a group
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group_name: String,
    /// Network message id
    pub message_id: String,
}

impl WebhookPayload {
    /// Whether this payload came from a group chat
    #[must_use]
    pub fn is_group(&self) -> bool {
        self.chat_type == "group"
    }
}

/// Delivers webhook payloads to an external HTTP endpoint
pub struct WebhookSender {
    config: WebhookConfig,
    seen: Mutex<SeenCache>,
    client: reqwest::Client,
}

impl WebhookSender {
    /// Create a sender for the given configuration. Without a destination
    /// URL the sender is a no-op.
    #[must_use]
    pub fn new(config: WebhookConfig) -> Self {
        Self {
            config,
            seen: Mutex::new(SeenCache::default()),
            client: reqwest::Client::builder()
                .timeout(POST_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    /// Deliver a payload.
    ///
    /// Returns `Ok` without sending when no URL is configured, when the
    /// message id was already seen within the dedup window, or when filters
    /// exclude the message.
    ///
    /// # Errors
    ///
    /// Returns an error when the POST fails at the network level. The
    /// caller logs and moves on; nothing retries.
    pub async fn send(&self, payload: &WebhookPayload) -> Result<()> {
        let Some(url) = self.config.url.as_deref() else {
            return Ok(());
        };

        // Dedup before filtering: a filtered message still takes a slot.
        {
            let mut seen = self.seen.lock().expect("seen cache lock poisoned");
            if seen.check_and_record(&payload.message_id) {
                tracing::debug!(message_id = %payload.message_id, "skipping duplicate message");
                return Ok(());
            }
        }

        if self.config.dm_only && payload.is_group() {
            tracing::debug!(message_id = %payload.message_id, "skipping group message (dm_only)");
            return Ok(());
        }
        if let Some(ignored) = self
            .config
            .ignore_groups
            .iter()
            .find(|g| payload.from == **g || payload.group_name == **g)
        {
            tracing::debug!(
                group = %ignored,
                message_id = %payload.message_id,
                "skipping ignored group"
            );
            return Ok(());
        }

        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    message_id = %payload.message_id,
                    "webhook delivery failed"
                );
                Error::Webhook(format!("POST {url}: {e}"))
            })?;

        let status = response.status();
        if status.is_success() {
            tracing::info!(
                status = status.as_u16(),
                message_id = %payload.message_id,
                "webhook delivered"
            );
        } else {
            tracing::warn!(
                status = status.as_u16(),
                message_id = %payload.message_id,
                "webhook non-2xx response"
            );
        }

        Ok(())
    }
}
