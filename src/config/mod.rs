//! Configuration for the wavelink bridge
//!
//! Values are resolved in three layers: built-in defaults, the optional
//! TOML config file, then `WAVELINK_*` environment variables.

pub mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::Result;

/// Default HTTP API port
pub const DEFAULT_PORT: u16 = 8555;

/// Default engine daemon WebSocket URL
pub const DEFAULT_ENGINE_URL: &str = "ws://127.0.0.1:8766";

/// Bridge configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP API port
    pub port: u16,

    /// Data directory (message db, downloaded media)
    pub data_dir: PathBuf,

    /// Protocol engine connection
    pub engine: EngineConfig,

    /// Webhook delivery
    pub webhook: WebhookConfig,

    /// Agent triggering
    pub agent: AgentConfig,

    /// Reconnect supervisor
    pub reconnect: ReconnectConfig,
}

/// Protocol engine connection settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// WebSocket URL of the engine daemon
    pub url: String,

    /// Directory the engine stores session credentials in
    pub auth_dir: PathBuf,
}

/// Webhook delivery settings
#[derive(Debug, Clone, Default)]
pub struct WebhookConfig {
    /// Destination URL; `None` disables delivery entirely
    pub url: Option<String>,

    /// Forward direct messages only
    pub dm_only: bool,

    /// Chat JIDs or group names to silently drop
    pub ignore_groups: Vec<String>,
}

/// How the agent is invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AgentMode {
    /// Expand a shell command template and execute it
    #[default]
    Command,
    /// POST a JSON payload to an HTTP endpoint
    Http,
}

/// Agent trigger settings
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Master switch
    pub enabled: bool,

    /// Invocation mode
    pub mode: AgentMode,

    /// Command template for command mode
    pub command: String,

    /// Endpoint for http mode
    pub http_url: String,

    /// Reply callback URL passed to the agent
    pub reply_endpoint: String,

    /// System prompt passed to the agent
    pub system_prompt: String,

    /// Trigger on direct messages only
    pub dm_only: bool,

    /// Never trigger on messages sent by this device
    pub ignore_from_me: bool,

    /// Senders allowed to trigger (empty = all)
    pub allowlist: Vec<String>,

    /// Senders never allowed to trigger
    pub blocklist: Vec<String>,

    /// Deadline for a single agent run
    pub timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: AgentMode::Command,
            command: String::new(),
            http_url: String::new(),
            reply_endpoint: String::new(),
            system_prompt: String::new(),
            dm_only: false,
            ignore_from_me: true,
            allowlist: Vec::new(),
            blocklist: Vec::new(),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Reconnect supervisor settings
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Run the supervisor loop
    pub enabled: bool,

    /// Connection check interval
    pub interval: Duration,

    /// Backoff ceiling
    pub max_backoff: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(30),
            max_backoff: Duration::from_secs(300),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let home = std::env::var_os("HOME").map_or_else(|| PathBuf::from("."), PathBuf::from);
        let data_dir = home.join(".wavelink");
        Self {
            port: DEFAULT_PORT,
            engine: EngineConfig {
                url: DEFAULT_ENGINE_URL.to_string(),
                auth_dir: data_dir.join("sessions"),
            },
            data_dir,
            webhook: WebhookConfig::default(),
            agent: AgentConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, overlaying defaults and applying
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error when the config file exists but cannot be parsed,
    /// or when a configured agent mode is unknown.
    pub fn load(path: &Path) -> Result<Self> {
        let mut cfg = Self::default();
        cfg.apply_file(file::load(path)?)?;
        cfg.apply_env();
        Ok(cfg)
    }

    /// Directory downloaded media is written to
    #[must_use]
    pub fn media_dir(&self) -> PathBuf {
        self.data_dir.join("media")
    }

    /// Path of the message database
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("messages.db")
    }

    /// Create the data and media directories if they do not exist
    ///
    /// # Errors
    ///
    /// Returns an error when a directory cannot be created.
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(self.media_dir())?;
        Ok(())
    }

    fn apply_file(&mut self, f: file::BridgeConfigFile) -> Result<()> {
        if let Some(port) = f.port {
            self.port = port;
        }
        if let Some(dir) = f.data_dir {
            self.engine.auth_dir = dir.join("sessions");
            self.data_dir = dir;
        }
        if let Some(url) = f.engine.url {
            self.engine.url = url;
        }
        if let Some(dir) = f.engine.auth_dir {
            self.engine.auth_dir = dir;
        }

        if let Some(url) = f.webhook.url {
            self.webhook.url = (!url.is_empty()).then_some(url);
        }
        if let Some(dm_only) = f.webhook.dm_only {
            self.webhook.dm_only = dm_only;
        }
        if let Some(groups) = f.webhook.ignore_groups {
            self.webhook.ignore_groups = groups;
        }

        let a = f.agent;
        if let Some(enabled) = a.enabled {
            self.agent.enabled = enabled;
        }
        if let Some(mode) = a.mode {
            self.agent.mode = parse_agent_mode(&mode)?;
        }
        if let Some(command) = a.command {
            self.agent.command = command;
        }
        if let Some(url) = a.http_url {
            self.agent.http_url = url;
        }
        if let Some(endpoint) = a.reply_endpoint {
            self.agent.reply_endpoint = endpoint;
        }
        if let Some(prompt) = a.system_prompt {
            self.agent.system_prompt = prompt;
        }
        if let Some(dm_only) = a.dm_only {
            self.agent.dm_only = dm_only;
        }
        if let Some(ignore) = a.ignore_from_me {
            self.agent.ignore_from_me = ignore;
        }
        if let Some(allow) = a.allowlist {
            self.agent.allowlist = allow;
        }
        if let Some(block) = a.blocklist {
            self.agent.blocklist = block;
        }
        if let Some(secs) = a.timeout_secs {
            self.agent.timeout = Duration::from_secs(secs);
        }

        let r = f.reconnect;
        if let Some(enabled) = r.enabled {
            self.reconnect.enabled = enabled;
        }
        if let Some(secs) = r.interval_secs {
            self.reconnect.interval = Duration::from_secs(secs);
        }
        if let Some(secs) = r.max_backoff_secs {
            self.reconnect.max_backoff = Duration::from_secs(secs);
        }

        Ok(())
    }

    fn apply_env(&mut self) {
        if let Some(port) = env_parse("WAVELINK_PORT") {
            self.port = port;
        }
        if let Ok(dir) = std::env::var("WAVELINK_DATA_DIR") {
            self.data_dir = PathBuf::from(&dir);
            self.engine.auth_dir = self.data_dir.join("sessions");
        }
        if let Ok(url) = std::env::var("WAVELINK_ENGINE_URL") {
            self.engine.url = url;
        }
        if let Ok(url) = std::env::var("WAVELINK_WEBHOOK_URL") {
            self.webhook.url = (!url.is_empty()).then_some(url);
        }
        if let Some(enabled) = env_bool("WAVELINK_RECONNECT") {
            self.reconnect.enabled = enabled;
        }
        if let Some(secs) = env_parse::<u64>("WAVELINK_RECONNECT_INTERVAL") {
            self.reconnect.interval = Duration::from_secs(secs);
        }
    }
}

fn parse_agent_mode(s: &str) -> Result<AgentMode> {
    match s {
        "command" => Ok(AgentMode::Command),
        "http" => Ok(AgentMode::Http),
        other => Err(crate::Error::Config(format!("unknown agent mode {other:?}"))),
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.parse().ok()
}

fn env_bool(key: &str) -> Option<bool> {
    match std::env::var(key).ok()?.to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}
