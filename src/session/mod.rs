//! Connection lifecycle management
//!
//! [`SessionManager`] owns the Disconnected → Connecting → Connected state
//! machine around the protocol engine: QR pairing for fresh devices, direct
//! resume for stored sessions, and status queries that cross-check the
//! engine's live transport and paired identity rather than trusting the last
//! stored value. Nothing here retries — failed connects surface to the
//! caller and the reconnect supervisor owns the retry schedule.

pub mod reconnect;

use std::sync::{Arc, RwLock};
use std::time::Instant;

use crate::engine::{EngineEvent, PairingUpdate, ProtocolEngine};
use crate::jid::Jid;
use crate::{Error, Result};

/// Connection state of the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// No live transport
    Disconnected,
    /// Transport coming up, or live but awaiting pairing
    Connecting,
    /// Transport live with a paired identity
    Connected,
}

impl Status {
    /// Wire name of this status
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct SessionState {
    status: Status,
    latest_qr: Option<String>,
    transport_started: bool,
}

/// Owns the connection state machine around the protocol engine
pub struct SessionManager {
    engine: Arc<dyn ProtocolEngine>,
    state: Arc<RwLock<SessionState>>,
    started_at: Instant,
}

impl SessionManager {
    /// Create a manager over the given engine
    #[must_use]
    pub fn new(engine: Arc<dyn ProtocolEngine>) -> Self {
        Self {
            engine,
            state: Arc::new(RwLock::new(SessionState {
                status: Status::Disconnected,
                latest_qr: None,
                transport_started: false,
            })),
            started_at: Instant::now(),
        }
    }

    /// Establish the connection. Safe to call repeatedly — a connected
    /// session is left alone. Without a stored session this starts QR
    /// pairing and returns once the transport is up; a listener task tracks
    /// pairing progress. Any engine error marks the session Disconnected
    /// and is returned; retries belong to the reconnect supervisor.
    ///
    /// # Errors
    ///
    /// Returns the engine error that aborted the attempt.
    pub async fn connect(&self) -> Result<()> {
        {
            let state = self.state.read().expect("session state lock poisoned");
            if state.status == Status::Connected && self.engine.is_connected() {
                return Ok(());
            }
        }
        self.set_status(Status::Connecting);

        if self.engine.device_id().is_none() {
            // Fresh device: pairing channel first, then transport.
            let updates = match self.engine.pairing_channel().await {
                Ok(updates) => updates,
                Err(e) => {
                    self.set_status(Status::Disconnected);
                    return Err(e);
                }
            };

            if let Err(e) = self.engine.start().await {
                self.set_status(Status::Disconnected);
                return Err(e);
            }

            self.state
                .write()
                .expect("session state lock poisoned")
                .transport_started = true;

            tokio::spawn(pairing_listener(updates, Arc::clone(&self.state)));
            tracing::info!("qr pairing started, waiting for scan");
        } else {
            // Stored session: resume directly.
            if let Err(e) = self.engine.start().await {
                self.set_status(Status::Disconnected);
                return Err(e);
            }

            let mut state = self.state.write().expect("session state lock poisoned");
            state.status = Status::Connected;
            state.transport_started = true;
            drop(state);

            tracing::info!(
                device_id = %self.engine.device_id().unwrap_or_default(),
                "connected with existing session"
            );
        }

        Ok(())
    }

    /// Tear down the transport, keeping the stored session
    pub async fn disconnect(&self) {
        self.engine.stop().await;

        let mut state = self.state.write().expect("session state lock poisoned");
        state.status = Status::Disconnected;
        state.latest_qr = None;
        state.transport_started = false;
    }

    /// Log out: invalidate the stored session, then disconnect. A transport
    /// that was never started makes this a no-op.
    ///
    /// # Errors
    ///
    /// Returns the engine error when the logout is rejected.
    pub async fn logout(&self) -> Result<()> {
        {
            let state = self.state.read().expect("session state lock poisoned");
            if !state.transport_started {
                return Ok(());
            }
        }

        self.engine.logout().await?;
        self.disconnect().await;
        tracing::info!("logged out");
        Ok(())
    }

    /// Resolve the current status from live engine state.
    ///
    /// Connected requires both a live transport and a paired identity; a
    /// live transport without one means pairing is still pending. The
    /// stored value only decides between Connecting (attempt in flight) and
    /// Disconnected.
    #[must_use]
    pub fn status(&self) -> Status {
        let transport_live = self.engine.is_connected();
        let paired = self.engine.device_id().is_some();

        if transport_live && paired {
            return Status::Connected;
        }
        if transport_live {
            return Status::Connecting;
        }
        let state = self.state.read().expect("session state lock poisoned");
        if state.status == Status::Connecting {
            Status::Connecting
        } else {
            Status::Disconnected
        }
    }

    /// Whether the engine transport is currently live
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.engine.is_connected()
    }

    /// Whether a stored session exists (the device has been paired)
    #[must_use]
    pub fn has_session(&self) -> bool {
        self.engine.device_id().is_some()
    }

    /// Most recent pairing code, if a pairing attempt is showing one
    #[must_use]
    pub fn latest_qr(&self) -> Option<String> {
        self.state
            .read()
            .expect("session state lock poisoned")
            .latest_qr
            .clone()
    }

    /// JID of the paired device, if any
    #[must_use]
    pub fn device_id(&self) -> Option<String> {
        self.engine.device_id()
    }

    /// When this manager was created (for uptime reporting)
    #[must_use]
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Apply a transport-level engine event to the state machine.
    /// Message events are not handled here — the pipeline owns those.
    pub fn apply_engine_event(&self, event: &EngineEvent) {
        let mut state = self.state.write().expect("session state lock poisoned");
        match event {
            EngineEvent::Connected { device_id } => {
                state.status = Status::Connected;
                tracing::info!(device_id, "engine connected");
            }
            EngineEvent::Disconnected => {
                state.status = Status::Disconnected;
                tracing::info!("engine disconnected");
            }
            EngineEvent::LoggedOut => {
                state.status = Status::Disconnected;
                state.latest_qr = None;
                tracing::warn!("logged out remotely");
            }
            EngineEvent::SessionReplaced => {
                state.status = Status::Disconnected;
                tracing::warn!("session replaced by another device");
            }
            EngineEvent::Message(_) => {}
        }
    }

    /// Send a text message. The recipient may be a full JID or a bare phone
    /// number; invalid identifiers are rejected before anything is sent.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid recipient, a disconnected engine, or
    /// an engine send failure.
    pub async fn send_text(&self, to: &str, body: &str) -> Result<String> {
        let jid = Jid::parse(to)?;
        if !self.engine.is_connected() {
            return Err(Error::Session("not connected".into()));
        }
        self.engine.send_text(&jid, body).await
    }

    /// Upload and send a media file
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid recipient, a disconnected engine, or
    /// an engine upload/send failure.
    pub async fn send_file(
        &self,
        to: &str,
        data: &[u8],
        mime_type: &str,
        filename: &str,
        caption: &str,
    ) -> Result<String> {
        let jid = Jid::parse(to)?;
        if !self.engine.is_connected() {
            return Err(Error::Session("not connected".into()));
        }
        self.engine
            .send_file(&jid, data, mime_type, filename, caption)
            .await
    }

    fn set_status(&self, status: Status) {
        self.state
            .write()
            .expect("session state lock poisoned")
            .status = status;
    }
}

/// Consume pairing updates until the attempt ends one way or the other
async fn pairing_listener(
    mut updates: tokio::sync::mpsc::Receiver<PairingUpdate>,
    state: Arc<RwLock<SessionState>>,
) {
    while let Some(update) = updates.recv().await {
        match update {
            PairingUpdate::Code(code) => {
                state
                    .write()
                    .expect("session state lock poisoned")
                    .latest_qr = Some(code);
                tracing::info!("new pairing code available");
            }
            PairingUpdate::Success => {
                let mut s = state.write().expect("session state lock poisoned");
                s.status = Status::Connected;
                s.latest_qr = None;
                drop(s);
                tracing::info!("qr pairing successful");
                break;
            }
            PairingUpdate::Timeout => {
                let mut s = state.write().expect("session state lock poisoned");
                s.status = Status::Disconnected;
                s.latest_qr = None;
                drop(s);
                tracing::warn!("qr pairing timed out");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::*;
    use crate::engine::{MediaRef, Presence};

    /// Scriptable engine stub for lifecycle tests
    #[derive(Default)]
    struct FakeEngine {
        connected: AtomicBool,
        device: Mutex<Option<String>>,
        fail_start: AtomicBool,
        pairing_tx: Mutex<Option<mpsc::Sender<PairingUpdate>>>,
    }

    impl FakeEngine {
        fn with_session(device: &str) -> Self {
            let engine = Self::default();
            *engine.device.lock().unwrap() = Some(device.to_string());
            engine
        }

        fn pairing_sender(&self) -> mpsc::Sender<PairingUpdate> {
            self.pairing_tx
                .lock()
                .unwrap()
                .clone()
                .expect("pairing channel not requested")
        }
    }

    #[async_trait]
    impl ProtocolEngine for FakeEngine {
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
        fn device_id(&self) -> Option<String> {
            self.device.lock().unwrap().clone()
        }
        async fn start(&self) -> Result<()> {
            if self.fail_start.load(Ordering::SeqCst) {
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
            *self.pairing_tx.lock().unwrap() = Some(tx);
            Ok(rx)
        }
        async fn send_text(&self, _: &Jid, _: &str) -> Result<String> {
            Ok("sent".into())
        }
        async fn send_file(&self, _: &Jid, _: &[u8], _: &str, _: &str, _: &str) -> Result<String> {
            Ok("sent".into())
        }
        async fn download(&self, _: &MediaRef) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
        async fn chat_presence(&self, _: &Jid, _: Presence) -> Result<()> {
            Ok(())
        }
        async fn group_name(&self, _: &Jid) -> Result<Option<String>> {
            Ok(None)
        }
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) {
        for _ in 0..100 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    // -- status resolution ----------------------------------------------------

    #[test]
    fn disconnected_by_default() {
        let session = SessionManager::new(Arc::new(FakeEngine::default()));
        assert_eq!(session.status(), Status::Disconnected);
        assert!(!session.has_session());
    }

    #[test]
    fn live_transport_without_identity_is_connecting() {
        let engine = Arc::new(FakeEngine::default());
        engine.connected.store(true, Ordering::SeqCst);
        let session = SessionManager::new(engine);
        assert_eq!(session.status(), Status::Connecting);
    }

    #[test]
    fn live_transport_with_identity_is_connected() {
        let engine = Arc::new(FakeEngine::with_session("1000@s.whatsapp.net"));
        engine.connected.store(true, Ordering::SeqCst);
        let session = SessionManager::new(engine);
        assert_eq!(session.status(), Status::Connected);
    }

    #[test]
    fn paired_identity_without_transport_is_disconnected() {
        let session =
            SessionManager::new(Arc::new(FakeEngine::with_session("1000@s.whatsapp.net")));
        assert_eq!(session.status(), Status::Disconnected);
        assert!(session.has_session());
    }

    // -- connect --------------------------------------------------------------

    #[tokio::test]
    async fn connect_with_stored_session() {
        let engine = Arc::new(FakeEngine::with_session("1000@s.whatsapp.net"));
        let session = SessionManager::new(Arc::clone(&engine) as Arc<dyn ProtocolEngine>);

        session.connect().await.unwrap();
        assert_eq!(session.status(), Status::Connected);
        assert_eq!(session.device_id().as_deref(), Some("1000@s.whatsapp.net"));
    }

    #[tokio::test]
    async fn connect_failure_marks_disconnected() {
        let engine = Arc::new(FakeEngine::with_session("1000@s.whatsapp.net"));
        engine.fail_start.store(true, Ordering::SeqCst);
        let session = SessionManager::new(Arc::clone(&engine) as Arc<dyn ProtocolEngine>);

        assert!(session.connect().await.is_err());
        assert_eq!(session.status(), Status::Disconnected);
    }

    #[tokio::test]
    async fn connect_is_idempotent_when_connected() {
        let engine = Arc::new(FakeEngine::with_session("1000@s.whatsapp.net"));
        let session = SessionManager::new(Arc::clone(&engine) as Arc<dyn ProtocolEngine>);

        session.connect().await.unwrap();
        session.connect().await.unwrap();
        assert_eq!(session.status(), Status::Connected);
    }

    // -- pairing --------------------------------------------------------------

    #[tokio::test]
    async fn pairing_codes_update_latest_qr() {
        let engine = Arc::new(FakeEngine::default());
        let session = SessionManager::new(Arc::clone(&engine) as Arc<dyn ProtocolEngine>);

        session.connect().await.unwrap();
        assert_eq!(session.status(), Status::Connecting);

        let tx = engine.pairing_sender();
        tx.send(PairingUpdate::Code("code-1".into())).await.unwrap();
        wait_for(|| session.latest_qr().as_deref() == Some("code-1")).await;

        tx.send(PairingUpdate::Code("code-2".into())).await.unwrap();
        wait_for(|| session.latest_qr().as_deref() == Some("code-2")).await;
    }

    #[tokio::test]
    async fn pairing_success_clears_qr_and_connects() {
        let engine = Arc::new(FakeEngine::default());
        let session = SessionManager::new(Arc::clone(&engine) as Arc<dyn ProtocolEngine>);

        session.connect().await.unwrap();
        let tx = engine.pairing_sender();
        tx.send(PairingUpdate::Code("code-1".into())).await.unwrap();
        wait_for(|| session.latest_qr().is_some()).await;

        *engine.device.lock().unwrap() = Some("1000@s.whatsapp.net".into());
        tx.send(PairingUpdate::Success).await.unwrap();
        wait_for(|| session.latest_qr().is_none()).await;
        assert_eq!(session.status(), Status::Connected);
    }

    #[tokio::test]
    async fn pairing_timeout_disconnects() {
        let engine = Arc::new(FakeEngine::default());
        let session = SessionManager::new(Arc::clone(&engine) as Arc<dyn ProtocolEngine>);

        session.connect().await.unwrap();
        let tx = engine.pairing_sender();
        tx.send(PairingUpdate::Code("code-1".into())).await.unwrap();
        wait_for(|| session.latest_qr().is_some()).await;

        engine.connected.store(false, Ordering::SeqCst);
        tx.send(PairingUpdate::Timeout).await.unwrap();
        wait_for(|| session.latest_qr().is_none()).await;
        assert_eq!(session.status(), Status::Disconnected);
    }

    // -- logout / events ------------------------------------------------------

    #[tokio::test]
    async fn logout_without_transport_is_noop() {
        let engine = Arc::new(FakeEngine::with_session("1000@s.whatsapp.net"));
        let session = SessionManager::new(Arc::clone(&engine) as Arc<dyn ProtocolEngine>);

        session.logout().await.unwrap();
        // Session untouched — the engine was never started.
        assert!(session.has_session());
    }

    #[tokio::test]
    async fn logout_clears_session() {
        let engine = Arc::new(FakeEngine::with_session("1000@s.whatsapp.net"));
        let session = SessionManager::new(Arc::clone(&engine) as Arc<dyn ProtocolEngine>);

        session.connect().await.unwrap();
        session.logout().await.unwrap();
        assert!(!session.has_session());
        assert_eq!(session.status(), Status::Disconnected);
    }

    #[tokio::test]
    async fn engine_events_drive_status() {
        let engine = Arc::new(FakeEngine::with_session("1000@s.whatsapp.net"));
        let session = SessionManager::new(Arc::clone(&engine) as Arc<dyn ProtocolEngine>);
        session.connect().await.unwrap();

        engine.connected.store(false, Ordering::SeqCst);
        session.apply_engine_event(&EngineEvent::Disconnected);
        assert_eq!(session.status(), Status::Disconnected);

        engine.connected.store(true, Ordering::SeqCst);
        session.apply_engine_event(&EngineEvent::Connected {
            device_id: "1000@s.whatsapp.net".into(),
        });
        assert_eq!(session.status(), Status::Connected);
    }

    // -- sends ----------------------------------------------------------------

    #[tokio::test]
    async fn send_rejects_invalid_recipient() {
        let engine = Arc::new(FakeEngine::with_session("1000@s.whatsapp.net"));
        let session = SessionManager::new(Arc::clone(&engine) as Arc<dyn ProtocolEngine>);
        session.connect().await.unwrap();

        assert!(matches!(
            session.send_text("", "hi").await,
            Err(Error::InvalidJid(_))
        ));
    }

    #[tokio::test]
    async fn send_requires_connection() {
        let engine = Arc::new(FakeEngine::with_session("1000@s.whatsapp.net"));
        let session = SessionManager::new(Arc::clone(&engine) as Arc<dyn ProtocolEngine>);

        assert!(matches!(
            session.send_text("+49123", "hi").await,
            Err(Error::Session(_))
        ));
    }
}
