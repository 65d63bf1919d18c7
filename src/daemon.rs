//! Bridge daemon
//!
//! Wires the components together and runs them to completion: message
//! store, session manager, event pipeline, reconnect supervisor, and the
//! HTTP API. The engine event stream is consumed by a single task so
//! events are processed one at a time, in arrival order.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent::AgentTrigger;
use crate::api::{self, ApiState};
use crate::config::Config;
use crate::engine::{EngineEvent, ProtocolEngine};
use crate::pipeline::EventPipeline;
use crate::session::{SessionManager, reconnect};
use crate::store::MessageStore;
use crate::webhook::WebhookSender;
use crate::Result;

/// The assembled bridge service
pub struct Daemon {
    config: Config,
}

impl Daemon {
    /// Create a daemon from configuration
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run the bridge until shutdown (ctrl-c).
    ///
    /// The initial connect failure is fatal — once up, every runtime error
    /// is isolated to its triggering operation and the supervisor owns
    /// reconnection.
    ///
    /// # Errors
    ///
    /// Returns an error when startup fails: data directories, message
    /// store, initial connect, or binding the API listener.
    pub async fn run(
        self,
        engine: Arc<dyn ProtocolEngine>,
        events: mpsc::Receiver<EngineEvent>,
    ) -> Result<()> {
        self.config.ensure_dirs()?;

        let store = MessageStore::open(self.config.db_path())?;
        let session = Arc::new(SessionManager::new(Arc::clone(&engine)));
        let webhook = WebhookSender::new(self.config.webhook.clone());
        let agent = AgentTrigger::new(self.config.agent.clone(), Arc::clone(&engine));
        if self.config.agent.enabled {
            tracing::info!(mode = ?self.config.agent.mode, "agent mode enabled");
        }

        let pipeline = Arc::new(EventPipeline::new(
            engine,
            Arc::clone(&session),
            store.clone(),
            webhook,
            agent,
            self.config.media_dir(),
        ));

        // Single consumer: the pipeline runs inline, one event at a time.
        let consumer = {
            let pipeline = Arc::clone(&pipeline);
            let mut events = events;
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    pipeline.handle_event(event).await;
                }
                tracing::info!("engine event stream ended");
            })
        };

        session.connect().await?;

        let cancel = CancellationToken::new();
        let supervisor = self.config.reconnect.enabled.then(|| {
            reconnect::spawn(
                Arc::clone(&session),
                self.config.reconnect.clone(),
                cancel.clone(),
            )
        });

        let state = Arc::new(ApiState {
            session: Arc::clone(&session),
            store,
            version: env!("CARGO_PKG_VERSION"),
        });
        let listener = TcpListener::bind(("0.0.0.0", self.config.port)).await?;
        tracing::info!(addr = %listener.local_addr()?, "http api listening");
        tracing::info!(
            qr_url = %format!("http://localhost:{}/qr", self.config.port),
            "bridge is running"
        );

        let shutdown = cancel.clone();
        axum::serve(listener, api::router(state))
            .with_graceful_shutdown(async move {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("shutting down");
                shutdown.cancel();
            })
            .await?;

        cancel.cancel();
        if let Some(handle) = supervisor {
            let _ = handle.await;
        }
        consumer.abort();
        session.disconnect().await;

        tracing::info!("bridge stopped");
        Ok(())
    }
}
