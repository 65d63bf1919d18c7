//! Wavelink — WhatsApp bridge for AI agents
//!
//! Pairs a WhatsApp session, persists every inbound message, and fans each
//! one out to a webhook endpoint and an optional AI agent.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │              Engine daemon (external)             │
//! │        wire protocol · crypto · media store       │
//! └───────────────────────┬──────────────────────────┘
//!                         │ WebSocket (engine::sidecar)
//! ┌───────────────────────▼──────────────────────────┐
//! │                  Wavelink bridge                  │
//! │  session ──► pipeline ──► store                   │
//! │     ▲            │    └──► webhook                │
//! │  reconnect       └───────► agent trigger          │
//! └───────────────────────┬──────────────────────────┘
//!                         │ HTTP API (axum)
//!                  status · qr · send · history
//! ```
//!
//! The bridge core is engine-agnostic: everything upstream of
//! [`engine::ProtocolEngine`] can be driven by synthetic events in tests.

pub mod agent;
pub mod api;
pub mod config;
pub mod daemon;
pub mod engine;
pub mod error;
pub mod jid;
pub mod pipeline;
pub mod session;
pub mod store;
pub mod webhook;

pub use agent::AgentTrigger;
pub use config::Config;
pub use daemon::Daemon;
pub use engine::{EngineEvent, ProtocolEngine, SidecarEngine};
pub use error::{Error, Result};
pub use jid::Jid;
pub use pipeline::EventPipeline;
pub use session::{SessionManager, Status};
pub use store::{MessageStore, StoredMessage};
pub use webhook::{WebhookPayload, WebhookSender};
