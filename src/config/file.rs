//! TOML configuration file loading
//!
//! All fields are optional — the file is a partial overlay on top of
//! defaults, and `WAVELINK_*` environment variables override both.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct BridgeConfigFile {
    /// HTTP API port
    pub port: Option<u16>,

    /// Data directory (session store, message db, media)
    pub data_dir: Option<PathBuf>,

    /// Protocol engine connection
    #[serde(default)]
    pub engine: EngineFileConfig,

    /// Webhook delivery
    #[serde(default)]
    pub webhook: WebhookFileConfig,

    /// Agent triggering
    #[serde(default)]
    pub agent: AgentFileConfig,

    /// Reconnect supervisor
    #[serde(default)]
    pub reconnect: ReconnectFileConfig,
}

/// Protocol engine connection configuration
#[derive(Debug, Default, Deserialize)]
pub struct EngineFileConfig {
    /// WebSocket URL of the engine daemon
    pub url: Option<String>,

    /// Directory the engine stores session credentials in
    pub auth_dir: Option<PathBuf>,
}

/// Webhook delivery configuration
#[derive(Debug, Default, Deserialize)]
pub struct WebhookFileConfig {
    /// Destination URL; empty disables delivery
    pub url: Option<String>,

    /// Forward direct messages only
    pub dm_only: Option<bool>,

    /// Chat JIDs or group names to silently drop
    pub ignore_groups: Option<Vec<String>>,
}

/// Agent trigger configuration
#[derive(Debug, Default, Deserialize)]
pub struct AgentFileConfig {
    /// Master switch
    pub enabled: Option<bool>,

    /// "command" or "http"
    pub mode: Option<String>,

    /// Command template for command mode
    pub command: Option<String>,

    /// Endpoint for http mode
    pub http_url: Option<String>,

    /// Reply callback URL passed to the agent
    pub reply_endpoint: Option<String>,

    /// System prompt passed to the agent
    pub system_prompt: Option<String>,

    /// Trigger on direct messages only
    pub dm_only: Option<bool>,

    /// Never trigger on messages sent by this device
    pub ignore_from_me: Option<bool>,

    /// Senders allowed to trigger (empty = all)
    pub allowlist: Option<Vec<String>>,

    /// Senders never allowed to trigger
    pub blocklist: Option<Vec<String>>,

    /// Deadline for a single agent run, in seconds
    pub timeout_secs: Option<u64>,
}

/// Reconnect supervisor configuration
#[derive(Debug, Default, Deserialize)]
pub struct ReconnectFileConfig {
    /// Run the supervisor loop
    pub enabled: Option<bool>,

    /// Connection check interval, in seconds
    pub interval_secs: Option<u64>,

    /// Backoff ceiling, in seconds
    pub max_backoff_secs: Option<u64>,
}

/// Load the TOML config file at `path`.
///
/// A missing file is not an error and yields the empty overlay.
///
/// # Errors
///
/// Returns an error when the file exists but cannot be read or parsed.
pub fn load(path: &Path) -> Result<BridgeConfigFile> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(BridgeConfigFile::default());
        }
        Err(e) => return Err(Error::Io(e)),
    };

    toml::from_str(&raw).map_err(Error::Toml)
}
