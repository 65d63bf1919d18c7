//! Protocol engine adapter interface
//!
//! The bridge core never speaks the WhatsApp wire protocol itself. It calls
//! into a [`ProtocolEngine`] — a narrow adapter over whatever owns the
//! cryptographic session (in production the WebSocket sidecar daemon, in
//! tests a mock). Engines deliver inbound events through a single
//! `mpsc::Receiver<EngineEvent>` handed out at construction, so the core can
//! be exercised by feeding synthetic events without a real engine.

pub mod sidecar;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::Result;
use crate::jid::Jid;

pub use sidecar::SidecarEngine;

/// An event emitted by the protocol engine
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Transport established with a paired identity
    Connected {
        /// JID of the paired device
        device_id: String,
    },
    /// Transport lost; the stored session is still valid
    Disconnected,
    /// The stored session was invalidated remotely
    LoggedOut,
    /// Another client took over this session
    SessionReplaced,
    /// An inbound message arrived
    Message(Box<InboundMessage>),
}

/// A normalized inbound message
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Network message id (unique per chat)
    pub id: String,
    /// Chat the message belongs to
    pub chat: Jid,
    /// Sender of the message
    pub sender: Jid,
    /// Sender display name (push name)
    pub sender_name: String,
    /// Server timestamp
    pub timestamp: DateTime<Utc>,
    /// Whether this device sent the message
    pub from_me: bool,
    /// Typed message content
    pub body: MessageBody,
}

/// Message content by type
#[derive(Debug, Clone)]
pub enum MessageBody {
    /// Plain or extended text
    Text {
        /// Message text
        text: String,
    },
    /// Media attachment with an optional caption
    Media {
        /// Attachment kind
        kind: MediaKind,
        /// Caption, or document title; may be empty
        caption: String,
        /// Download reference, absent when the engine could not provide one
        media: Option<MediaRef>,
    },
    /// Shared contact card
    Contact {
        /// Display name on the card
        display_name: String,
    },
    /// Shared location
    Location {
        /// Latitude in degrees
        latitude: f64,
        /// Longitude in degrees
        longitude: f64,
    },
    /// Anything the engine could not classify
    Unknown,
}

/// Kind of media attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// Still image
    Image,
    /// Video clip
    Video,
    /// Voice note or audio file
    Audio,
    /// Generic document
    Document,
    /// Sticker
    Sticker,
}

impl MediaKind {
    /// Wire name of this kind, as used in payloads and the store
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
            Self::Sticker => "sticker",
        }
    }
}

/// Reference to downloadable media held by the engine
#[derive(Debug, Clone)]
pub struct MediaRef {
    /// Engine-resolvable location of the payload
    pub url: String,
    /// MIME type as reported by the sender
    pub mime_type: String,
}

/// Progress of an in-flight QR pairing attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingUpdate {
    /// A fresh pairing code to display; supersedes any previous one
    Code(String),
    /// The code was scanned and the session is paired
    Success,
    /// No scan arrived in time; the attempt is over
    Timeout,
}

/// Ephemeral chat presence indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// "typing…" shown to chat participants
    Composing,
    /// Clears a previous composing indicator
    Paused,
}

impl Presence {
    /// Wire name of this presence state
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Composing => "composing",
            Self::Paused => "paused",
        }
    }
}

/// Narrow interface to the external protocol engine.
///
/// Connectivity and identity queries are synchronous reads of the engine's
/// last-known state; everything that touches the network is async.
#[async_trait]
pub trait ProtocolEngine: Send + Sync {
    /// Whether the transport is currently live
    fn is_connected(&self) -> bool;

    /// JID of the paired identity, `None` when the device was never paired
    /// (or was logged out)
    fn device_id(&self) -> Option<String>;

    /// Open the transport. With a stored session this resumes it; without
    /// one the engine begins QR pairing and emits codes on the channel
    /// obtained from [`Self::pairing_channel`].
    ///
    /// # Errors
    ///
    /// Returns an error when the transport cannot be opened.
    async fn start(&self) -> Result<()>;

    /// Close the transport, keeping the stored session
    async fn stop(&self);

    /// Invalidate and remove the stored session, then close the transport
    ///
    /// # Errors
    ///
    /// Returns an error when the engine rejects the logout.
    async fn logout(&self) -> Result<()>;

    /// Obtain a fresh channel of pairing updates for the next pairing
    /// attempt. Must be called before [`Self::start`] when no session
    /// exists.
    ///
    /// # Errors
    ///
    /// Returns an error when the engine cannot begin pairing.
    async fn pairing_channel(&self) -> Result<mpsc::Receiver<PairingUpdate>>;

    /// Send a text message; returns the network message id
    ///
    /// # Errors
    ///
    /// Returns an error when the engine reports a send failure.
    async fn send_text(&self, to: &Jid, body: &str) -> Result<String>;

    /// Upload and send a media file; returns the network message id
    ///
    /// # Errors
    ///
    /// Returns an error when the upload or send fails.
    async fn send_file(
        &self,
        to: &Jid,
        data: &[u8],
        mime_type: &str,
        filename: &str,
        caption: &str,
    ) -> Result<String>;

    /// Download the payload behind a media reference
    ///
    /// # Errors
    ///
    /// Returns an error when the download fails.
    async fn download(&self, media: &MediaRef) -> Result<Vec<u8>>;

    /// Send an ephemeral presence indicator to a chat
    ///
    /// # Errors
    ///
    /// Returns an error when the engine rejects the signal.
    async fn chat_presence(&self, chat: &Jid, presence: Presence) -> Result<()>;

    /// Resolve the human-readable name of a group chat
    ///
    /// # Errors
    ///
    /// Returns an error when the lookup fails.
    async fn group_name(&self, chat: &Jid) -> Result<Option<String>>;
}
