//! Inbound event pipeline
//!
//! Single dispatch entrypoint for everything the engine emits. Transport
//! events go to the session state machine; messages are classified,
//! persisted, and fanned out to webhook delivery and the agent trigger.
//! The pipeline runs inline on the event-consumer task, so attachment
//! download latency delays later events — an accepted trade-off. Webhook
//! and agent failures are independent: neither aborts the other, and
//! neither aborts processing.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::agent::AgentTrigger;
use crate::engine::{EngineEvent, InboundMessage, MediaRef, MessageBody, ProtocolEngine};
use crate::session::SessionManager;
use crate::store::{MessageStore, StoredMessage};
use crate::webhook::{WebhookPayload, WebhookSender};

/// Fans inbound engine events out to persistence, webhook, and agent
pub struct EventPipeline {
    engine: Arc<dyn ProtocolEngine>,
    session: Arc<SessionManager>,
    store: MessageStore,
    webhook: WebhookSender,
    agent: AgentTrigger,
    media_dir: PathBuf,
}

impl EventPipeline {
    /// Wire up a pipeline over the given collaborators
    #[must_use]
    pub fn new(
        engine: Arc<dyn ProtocolEngine>,
        session: Arc<SessionManager>,
        store: MessageStore,
        webhook: WebhookSender,
        agent: AgentTrigger,
        media_dir: PathBuf,
    ) -> Self {
        Self {
            engine,
            session,
            store,
            webhook,
            agent,
            media_dir,
        }
    }

    /// Handle one engine event. Invoked once per event, in arrival order.
    pub async fn handle_event(&self, event: EngineEvent) {
        match event {
            EngineEvent::Message(msg) => self.process_message(*msg).await,
            other => self.session.apply_engine_event(&other),
        }
    }

    /// Process a single inbound message through all pipeline stages
    async fn process_message(&self, msg: InboundMessage) {
        // Self-originated and status broadcasts never enter the pipeline.
        if msg.from_me {
            return;
        }
        if msg.chat.is_status_broadcast() {
            return;
        }

        let (kind, content, media_path) = self.classify(&msg).await;

        // Best-effort group name; lookup failure leaves it empty.
        let group_name = if msg.chat.is_group() {
            match self.engine.group_name(&msg.chat).await {
                Ok(name) => name.unwrap_or_default(),
                Err(e) => {
                    tracing::debug!(error = %e, chat = %msg.chat, "group name lookup failed");
                    String::new()
                }
            }
        } else {
            String::new()
        };

        let stored = StoredMessage {
            id: msg.id.clone(),
            chat_jid: msg.chat.to_string(),
            sender_jid: msg.sender.to_string(),
            sender_name: msg.sender_name.clone(),
            content: content.clone(),
            msg_type: kind.to_string(),
            media_path: media_path.clone(),
            timestamp: msg.timestamp.timestamp(),
            is_from_me: false,
            is_group: msg.chat.is_group(),
            group_name: group_name.clone(),
        };
        if let Err(e) = self.store.save(&stored) {
            tracing::error!(error = %e, message_id = %msg.id, "failed to persist message");
        }

        let payload = WebhookPayload {
            from: msg.chat.to_string(),
            name: msg.sender_name.clone(),
            message: content,
            timestamp: msg.timestamp.timestamp(),
            kind: kind.to_string(),
            media_url: media_path,
            chat_type: if msg.chat.is_group() { "group" } else { "dm" }.to_string(),
            group_name,
            message_id: msg.id.clone(),
        };

        if let Err(e) = self.webhook.send(&payload).await {
            tracing::error!(error = %e, message_id = %msg.id, "webhook send failed");
        }
        self.agent.trigger(&payload, msg.from_me).await;

        tracing::info!(
            message_id = %msg.id,
            kind,
            from = %msg.sender,
            chat = %msg.chat,
            is_group = msg.chat.is_group(),
            "message processed"
        );
    }

    /// Determine message type, extract text/caption, and download any
    /// attachment inline. A failed download yields an empty media path,
    /// never an abort.
    async fn classify(&self, msg: &InboundMessage) -> (&'static str, String, String) {
        match &msg.body {
            MessageBody::Text { text } => ("text", text.clone(), String::new()),
            MessageBody::Media {
                kind,
                caption,
                media,
            } => {
                let path = match media {
                    Some(media) => self.download_media(media, &msg.id).await,
                    None => String::new(),
                };
                (kind.as_str(), caption.clone(), path)
            }
            MessageBody::Contact { display_name } => {
                ("contact", display_name.clone(), String::new())
            }
            MessageBody::Location {
                latitude,
                longitude,
            } => (
                "location",
                format!("{latitude:.6},{longitude:.6}"),
                String::new(),
            ),
            MessageBody::Unknown => {
                tracing::debug!(message_id = %msg.id, "received unhandled message type");
                ("unknown", String::new(), String::new())
            }
        }
    }

    /// Download an attachment to `<media_dir>/<message_id><ext>`, returning
    /// the path on success or an empty string on any failure.
    async fn download_media(&self, media: &MediaRef, message_id: &str) -> String {
        let data = match self.engine.download(media).await {
            Ok(data) => data,
            Err(e) => {
                tracing::error!(error = %e, message_id, "failed to download media");
                return String::new();
            }
        };

        if let Err(e) = tokio::fs::create_dir_all(&self.media_dir).await {
            tracing::error!(error = %e, message_id, "failed to create media directory");
            return String::new();
        }

        let path = self
            .media_dir
            .join(format!("{message_id}{}", extension_for(&media.mime_type)));
        if let Err(e) = tokio::fs::write(&path, &data).await {
            tracing::error!(error = %e, path = %path.display(), message_id, "failed to write media");
            return String::new();
        }

        tracing::debug!(path = %path.display(), size = data.len(), message_id, "media saved");
        path.display().to_string()
    }

    /// Directory attachments are written to
    #[must_use]
    pub fn media_dir(&self) -> &Path {
        &self.media_dir
    }
}

/// Map a MIME type to a file extension (with leading dot).
///
/// Parameters after `;` are ignored (`audio/ogg; codecs=opus`). Unknown
/// types fall back to `.bin`.
#[must_use]
pub fn extension_for(mime_type: &str) -> &'static str {
    let mime = mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase();

    match mime.as_str() {
        "image/jpeg" => ".jpg",
        "image/png" => ".png",
        "image/gif" => ".gif",
        "image/webp" => ".webp",
        "video/mp4" => ".mp4",
        "video/3gpp" => ".3gp",
        "audio/ogg" => ".ogg",
        "audio/mpeg" => ".mp3",
        "audio/mp4" => ".m4a",
        "audio/aac" => ".aac",
        "application/pdf" => ".pdf",
        "application/msword" => ".doc",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => ".docx",
        "application/vnd.ms-excel" => ".xls",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => ".xlsx",
        "application/vnd.ms-powerpoint" => ".ppt",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation" => ".pptx",
        "application/zip" => ".zip",
        "text/plain" => ".txt",
        _ => ".bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -- extension_for --------------------------------------------------------

    #[test]
    fn maps_common_types() {
        assert_eq!(extension_for("image/jpeg"), ".jpg");
        assert_eq!(extension_for("video/mp4"), ".mp4");
        assert_eq!(extension_for("application/pdf"), ".pdf");
    }

    #[test]
    fn strips_mime_parameters() {
        assert_eq!(extension_for("audio/ogg; codecs=opus"), ".ogg");
    }

    #[test]
    fn is_case_insensitive() {
        assert_eq!(extension_for("IMAGE/PNG"), ".png");
    }

    #[test]
    fn unknown_types_fall_back_to_bin() {
        assert_eq!(extension_for("application/x-octopus"), ".bin");
        assert_eq!(extension_for(""), ".bin");
    }
}
