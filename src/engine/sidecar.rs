//! WebSocket adapter to an external protocol-engine daemon
//!
//! The wire protocol and cryptographic session live in a separate engine
//! daemon (a Baileys-style sidecar). This adapter speaks JSON frames to it
//! over a WebSocket: commands go out with UUID request ids, events and acks
//! come back on the same socket. Connection/identity state is mirrored
//! locally from engine events so the synchronous queries never touch the
//! network.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use uuid::Uuid;

use super::{
    EngineEvent, InboundMessage, MediaKind, MediaRef, MessageBody, PairingUpdate, Presence,
    ProtocolEngine,
};
use crate::jid::Jid;
use crate::{Error, Result};

/// Attempts before giving up on the initial daemon connection
const CONNECT_ATTEMPTS: u32 = 10;

/// Delay between connection attempts
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// How long to wait for the daemon to ack a request
const ACK_TIMEOUT: Duration = Duration::from_secs(15);

/// Buffered engine events before backpressure
const EVENT_BUFFER: usize = 64;

/// A command sent to the engine daemon
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum GatewayCommand {
    /// Open the transport; starts QR pairing when no session is stored
    Login { auth_dir: String },
    /// Close the transport, keeping stored credentials
    Disconnect,
    /// Invalidate stored credentials and close the transport
    Logout { request_id: String },
    /// Send a text message
    SendText {
        request_id: String,
        to: String,
        body: String,
    },
    /// Upload and send a media file (payload base64-encoded)
    SendMedia {
        request_id: String,
        to: String,
        data: String,
        mime_type: String,
        filename: String,
        caption: String,
    },
    /// Ephemeral chat presence
    Presence { chat: String, state: String },
    /// Resolve group metadata
    GroupInfo { request_id: String, chat: String },
}

/// A frame received from the engine daemon
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SidecarEvent {
    /// Snapshot sent by the daemon on socket connect
    Status {
        connected: bool,
        device_id: Option<String>,
    },
    /// Fresh pairing code
    Qr { code: String },
    /// Pairing attempt expired without a scan
    PairTimeout,
    /// Transport up with a paired identity
    Connected { device_id: String },
    /// Transport lost
    Disconnected {
        #[serde(default)]
        reason: Option<String>,
    },
    /// Stored session invalidated
    LoggedOut,
    /// Another client took over the session
    Replaced,
    /// Inbound message
    Message(InboundFrame),
    /// Response to a request-carrying command
    Ack(AckFrame),
}

/// Inbound message as the daemon encodes it
#[derive(Debug, Deserialize)]
struct InboundFrame {
    message_id: String,
    chat_jid: String,
    sender_jid: String,
    #[serde(default)]
    sender_name: String,
    timestamp: i64,
    #[serde(default)]
    from_me: bool,
    kind: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    media_url: Option<String>,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    longitude: Option<f64>,
}

/// Ack for a request-carrying command
#[derive(Debug, Deserialize)]
struct AckFrame {
    request_id: String,
    success: bool,
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default)]
struct EngineState {
    connected: bool,
    device_id: Option<String>,
}

/// Request/response and pairing plumbing shared with the reader task
#[derive(Default)]
struct Shared {
    pending: Mutex<HashMap<String, oneshot::Sender<AckFrame>>>,
    pairing_tx: Mutex<Option<mpsc::Sender<PairingUpdate>>>,
}

/// [`ProtocolEngine`] implementation over a WebSocket engine daemon
pub struct SidecarEngine {
    cmd_tx: mpsc::Sender<GatewayCommand>,
    state: Arc<RwLock<EngineState>>,
    shared: Arc<Shared>,
    http: reqwest::Client,
    auth_dir: PathBuf,
}

impl SidecarEngine {
    /// Connect to the engine daemon at `url` and return the engine together
    /// with its event stream. Retries the socket a few times since the
    /// daemon may still be starting.
    ///
    /// # Errors
    ///
    /// Returns an error when the daemon stays unreachable.
    pub async fn connect(
        url: &str,
        auth_dir: &Path,
    ) -> Result<(Arc<Self>, mpsc::Receiver<EngineEvent>)> {
        let mut attempt = 0;
        let ws = loop {
            match connect_async(url).await {
                Ok((ws, _)) => break ws,
                Err(e) => {
                    attempt += 1;
                    if attempt >= CONNECT_ATTEMPTS {
                        return Err(Error::Engine(format!(
                            "engine daemon unreachable at {url}: {e}"
                        )));
                    }
                    tracing::warn!(error = %e, attempt, "engine daemon not ready, retrying");
                    tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                }
            }
        };
        tracing::info!(url, "connected to engine daemon");

        let (mut ws_tx, mut ws_rx) = ws.split();
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<GatewayCommand>(32);
        let (event_tx, event_rx) = mpsc::channel::<EngineEvent>(EVENT_BUFFER);

        let state = Arc::new(RwLock::new(EngineState::default()));
        let shared = Arc::new(Shared::default());

        // Writer: serialize commands onto the socket.
        tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                let frame = match serde_json::to_string(&cmd) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to encode engine command");
                        continue;
                    }
                };
                if let Err(e) = ws_tx.send(WsMessage::Text(frame.into())).await {
                    tracing::error!(error = %e, "engine daemon write failed");
                    break;
                }
            }
        });

        // Reader: decode frames, mirror state, forward events.
        {
            let state = Arc::clone(&state);
            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                while let Some(msg) = ws_rx.next().await {
                    match msg {
                        Ok(WsMessage::Text(frame)) => {
                            handle_frame(&frame, &state, &shared, &event_tx).await;
                        }
                        Ok(WsMessage::Close(_)) | Err(_) => break,
                        Ok(_) => {}
                    }
                }
                // Socket gone: everything downstream sees a disconnect.
                state.write().expect("engine state lock poisoned").connected = false;
                let _ = event_tx.send(EngineEvent::Disconnected).await;
                tracing::warn!("engine daemon connection closed");
            });
        }

        let engine = Arc::new(Self {
            cmd_tx,
            state,
            shared,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            auth_dir: auth_dir.to_path_buf(),
        });
        Ok((engine, event_rx))
    }

    async fn send_command(&self, cmd: GatewayCommand) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| Error::Engine("engine daemon connection lost".into()))
    }

    /// Send a command carrying `request_id` and wait for its ack
    async fn request(&self, request_id: String, cmd: GatewayCommand) -> Result<AckFrame> {
        let (tx, rx) = oneshot::channel();
        self.shared
            .pending
            .lock()
            .expect("pending map lock poisoned")
            .insert(request_id.clone(), tx);

        if let Err(e) = self.send_command(cmd).await {
            self.forget(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(ACK_TIMEOUT, rx).await {
            Ok(Ok(ack)) if ack.success => Ok(ack),
            Ok(Ok(ack)) => Err(Error::Engine(
                ack.error.unwrap_or_else(|| "engine rejected request".into()),
            )),
            Ok(Err(_)) => {
                self.forget(&request_id);
                Err(Error::Engine("engine daemon connection lost".into()))
            }
            Err(_) => {
                self.forget(&request_id);
                Err(Error::Engine("engine request timed out".into()))
            }
        }
    }

    fn forget(&self, request_id: &str) {
        self.shared
            .pending
            .lock()
            .expect("pending map lock poisoned")
            .remove(request_id);
    }
}

#[async_trait]
impl ProtocolEngine for SidecarEngine {
    fn is_connected(&self) -> bool {
        self.state.read().expect("engine state lock poisoned").connected
    }

    fn device_id(&self) -> Option<String> {
        self.state
            .read()
            .expect("engine state lock poisoned")
            .device_id
            .clone()
    }

    async fn start(&self) -> Result<()> {
        self.send_command(GatewayCommand::Login {
            auth_dir: self.auth_dir.display().to_string(),
        })
        .await
    }

    async fn stop(&self) {
        if let Err(e) = self.send_command(GatewayCommand::Disconnect).await {
            tracing::debug!(error = %e, "engine disconnect command failed");
        }
        self.state.write().expect("engine state lock poisoned").connected = false;
    }

    async fn logout(&self) -> Result<()> {
        let request_id = Uuid::new_v4().to_string();
        self.request(
            request_id.clone(),
            GatewayCommand::Logout { request_id },
        )
        .await?;
        let mut state = self.state.write().expect("engine state lock poisoned");
        state.device_id = None;
        state.connected = false;
        Ok(())
    }

    async fn pairing_channel(&self) -> Result<mpsc::Receiver<PairingUpdate>> {
        let (tx, rx) = mpsc::channel(8);
        *self
            .shared
            .pairing_tx
            .lock()
            .expect("pairing lock poisoned") = Some(tx);
        Ok(rx)
    }

    async fn send_text(&self, to: &Jid, body: &str) -> Result<String> {
        let request_id = Uuid::new_v4().to_string();
        let ack = self
            .request(
                request_id.clone(),
                GatewayCommand::SendText {
                    request_id,
                    to: to.as_str().to_string(),
                    body: body.to_string(),
                },
            )
            .await?;
        Ok(ack.message_id.unwrap_or_default())
    }

    async fn send_file(
        &self,
        to: &Jid,
        data: &[u8],
        mime_type: &str,
        filename: &str,
        caption: &str,
    ) -> Result<String> {
        let request_id = Uuid::new_v4().to_string();
        let ack = self
            .request(
                request_id.clone(),
                GatewayCommand::SendMedia {
                    request_id,
                    to: to.as_str().to_string(),
                    data: BASE64.encode(data),
                    mime_type: mime_type.to_string(),
                    filename: filename.to_string(),
                    caption: caption.to_string(),
                },
            )
            .await?;
        Ok(ack.message_id.unwrap_or_default())
    }

    async fn download(&self, media: &MediaRef) -> Result<Vec<u8>> {
        let response = self.http.get(&media.url).send().await?;
        if !response.status().is_success() {
            return Err(Error::Engine(format!(
                "media download returned {}",
                response.status()
            )));
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn chat_presence(&self, chat: &Jid, presence: Presence) -> Result<()> {
        self.send_command(GatewayCommand::Presence {
            chat: chat.as_str().to_string(),
            state: presence.as_str().to_string(),
        })
        .await
    }

    async fn group_name(&self, chat: &Jid) -> Result<Option<String>> {
        let request_id = Uuid::new_v4().to_string();
        let ack = self
            .request(
                request_id.clone(),
                GatewayCommand::GroupInfo {
                    request_id,
                    chat: chat.as_str().to_string(),
                },
            )
            .await?;
        Ok(ack.name.filter(|n| !n.is_empty()))
    }
}

/// Decode one frame and route it
async fn handle_frame(
    frame: &str,
    state: &Arc<RwLock<EngineState>>,
    shared: &Arc<Shared>,
    event_tx: &mpsc::Sender<EngineEvent>,
) {
    let event: SidecarEvent = match serde_json::from_str(frame) {
        Ok(event) => event,
        Err(e) => {
            tracing::debug!(error = %e, "ignoring unrecognized engine frame");
            return;
        }
    };

    match event {
        SidecarEvent::Status {
            connected,
            device_id,
        } => {
            let mut s = state.write().expect("engine state lock poisoned");
            s.connected = connected;
            s.device_id = device_id;
        }
        SidecarEvent::Qr { code } => {
            tracing::debug!("received pairing code from engine");
            notify_pairing(shared, PairingUpdate::Code(code), false).await;
        }
        SidecarEvent::PairTimeout => {
            notify_pairing(shared, PairingUpdate::Timeout, true).await;
        }
        SidecarEvent::Connected { device_id } => {
            {
                let mut s = state.write().expect("engine state lock poisoned");
                s.connected = true;
                s.device_id = Some(device_id.clone());
            }
            // A pairing attempt in flight has just succeeded.
            notify_pairing(shared, PairingUpdate::Success, true).await;
            let _ = event_tx.send(EngineEvent::Connected { device_id }).await;
        }
        SidecarEvent::Disconnected { reason } => {
            state.write().expect("engine state lock poisoned").connected = false;
            if let Some(reason) = reason {
                tracing::debug!(%reason, "engine reported disconnect");
            }
            let _ = event_tx.send(EngineEvent::Disconnected).await;
        }
        SidecarEvent::LoggedOut => {
            {
                let mut s = state.write().expect("engine state lock poisoned");
                s.connected = false;
                s.device_id = None;
            }
            let _ = event_tx.send(EngineEvent::LoggedOut).await;
        }
        SidecarEvent::Replaced => {
            state.write().expect("engine state lock poisoned").connected = false;
            let _ = event_tx.send(EngineEvent::SessionReplaced).await;
        }
        SidecarEvent::Message(inbound) => match convert_inbound(inbound) {
            Ok(msg) => {
                let _ = event_tx.send(EngineEvent::Message(Box::new(msg))).await;
            }
            Err(e) => tracing::warn!(error = %e, "dropping malformed inbound message"),
        },
        SidecarEvent::Ack(ack) => {
            let waiter = shared
                .pending
                .lock()
                .expect("pending map lock poisoned")
                .remove(&ack.request_id);
            match waiter {
                Some(tx) => {
                    let _ = tx.send(ack);
                }
                None => {
                    tracing::debug!(request_id = %ack.request_id, "ack for unknown request");
                }
            }
        }
    }
}

/// Forward a pairing update; `terminal` drops the sender afterwards
async fn notify_pairing(shared: &Arc<Shared>, update: PairingUpdate, terminal: bool) {
    let tx = {
        let mut guard = shared.pairing_tx.lock().expect("pairing lock poisoned");
        if terminal {
            guard.take()
        } else {
            guard.clone()
        }
    };
    if let Some(tx) = tx {
        let _ = tx.send(update).await;
    }
}

/// Translate a daemon message frame into the engine-neutral type
fn convert_inbound(frame: InboundFrame) -> Result<InboundMessage> {
    let chat = Jid::parse(&frame.chat_jid)?;
    let sender = Jid::parse(&frame.sender_jid)?;
    let timestamp: DateTime<Utc> =
        DateTime::from_timestamp(frame.timestamp, 0).unwrap_or_else(Utc::now);

    let media = frame.media_url.map(|url| MediaRef {
        url,
        mime_type: frame.mime_type.unwrap_or_default(),
    });

    let body = match frame.kind.as_str() {
        "text" => MessageBody::Text { text: frame.body },
        "image" => media_body(MediaKind::Image, frame.body, media),
        "video" => media_body(MediaKind::Video, frame.body, media),
        "audio" => media_body(MediaKind::Audio, frame.body, media),
        "document" => media_body(MediaKind::Document, frame.body, media),
        "sticker" => media_body(MediaKind::Sticker, frame.body, media),
        "contact" => MessageBody::Contact {
            display_name: frame.body,
        },
        "location" => MessageBody::Location {
            latitude: frame.latitude.unwrap_or_default(),
            longitude: frame.longitude.unwrap_or_default(),
        },
        _ => MessageBody::Unknown,
    };

    Ok(InboundMessage {
        id: frame.message_id,
        chat,
        sender,
        sender_name: frame.sender_name,
        timestamp,
        from_me: frame.from_me,
        body,
    })
}

fn media_body(kind: MediaKind, caption: String, media: Option<MediaRef>) -> MessageBody {
    MessageBody::Media {
        kind,
        caption,
        media,
    }
}
