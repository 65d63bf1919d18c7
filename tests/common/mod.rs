//! Shared test support: a scriptable mock protocol engine

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::sync::mpsc;

use wavelink::engine::{
    InboundMessage, MediaRef, MessageBody, PairingUpdate, Presence, ProtocolEngine,
};
use wavelink::jid::Jid;
use wavelink::{Error, Result};

/// Mock engine whose behavior is scripted field by field
#[derive(Default)]
pub struct MockEngine {
    pub connected: AtomicBool,
    pub device: Mutex<Option<String>>,
    /// Fail this many `start` calls before succeeding
    pub start_failures: AtomicU32,
    pub start_attempts: AtomicU32,
    /// Downloadable media by URL
    pub media: Mutex<HashMap<String, Vec<u8>>>,
    /// Group names by chat JID
    pub group_names: Mutex<HashMap<String, String>>,
    /// Recorded presence signals (chat, state)
    pub presence: Mutex<Vec<(String, Presence)>>,
    /// Recorded outbound text messages (to, body)
    pub sent: Mutex<Vec<(String, String)>>,
    pairing: Mutex<Option<mpsc::Sender<PairingUpdate>>>,
}

impl MockEngine {
    pub fn with_session(device: &str) -> Self {
        let engine = Self::default();
        *engine.device.lock().unwrap() = Some(device.to_string());
        engine
    }

    pub fn presence_log(&self) -> Vec<(String, Presence)> {
        self.presence.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProtocolEngine for MockEngine {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn device_id(&self) -> Option<String> {
        self.device.lock().unwrap().clone()
    }

    async fn start(&self) -> Result<()> {
        let attempt = self.start_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.start_failures.load(Ordering::SeqCst) {
            return Err(Error::Engine("transport refused".into()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn logout(&self) -> Result<()> {
        *self.device.lock().unwrap() = None;
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn pairing_channel(&self) -> Result<mpsc::Receiver<PairingUpdate>> {
        let (tx, rx) = mpsc::channel(8);
        *self.pairing.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn send_text(&self, to: &Jid, body: &str) -> Result<String> {
        self.sent
            .lock()
            .unwrap()
            .push((to.as_str().to_string(), body.to_string()));
        Ok(format!("sent-{}", self.sent.lock().unwrap().len()))
    }

    async fn send_file(&self, to: &Jid, _: &[u8], _: &str, _: &str, caption: &str) -> Result<String> {
        self.sent
            .lock()
            .unwrap()
            .push((to.as_str().to_string(), caption.to_string()));
        Ok("sent-file".into())
    }

    async fn download(&self, media: &MediaRef) -> Result<Vec<u8>> {
        self.media
            .lock()
            .unwrap()
            .get(&media.url)
            .cloned()
            .ok_or_else(|| Error::Engine(format!("no media at {}", media.url)))
    }

    async fn chat_presence(&self, chat: &Jid, presence: Presence) -> Result<()> {
        self.presence
            .lock()
            .unwrap()
            .push((chat.as_str().to_string(), presence));
        Ok(())
    }

    async fn group_name(&self, chat: &Jid) -> Result<Option<String>> {
        Ok(self.group_names.lock().unwrap().get(chat.as_str()).cloned())
    }
}

/// Build a plain inbound text message
pub fn text_message(id: &str, chat: &str, sender: &str, text: &str) -> InboundMessage {
    InboundMessage {
        id: id.to_string(),
        chat: Jid::parse(chat).unwrap(),
        sender: Jid::parse(sender).unwrap(),
        sender_name: "Alice".to_string(),
        timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        from_me: false,
        body: MessageBody::Text {
            text: text.to_string(),
        },
    }
}
