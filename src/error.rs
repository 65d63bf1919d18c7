//! Error types for the wavelink bridge

use thiserror::Error;

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the wavelink bridge
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Protocol engine error
    #[error("engine error: {0}")]
    Engine(String),

    /// Session lifecycle error
    #[error("session error: {0}")]
    Session(String),

    /// QR pairing error
    #[error("pairing error: {0}")]
    Pairing(String),

    /// Invalid recipient or chat identifier
    #[error("invalid jid: {0}")]
    InvalidJid(String),

    /// Webhook delivery error
    #[error("webhook error: {0}")]
    Webhook(String),

    /// Agent trigger error
    #[error("agent error: {0}")]
    Agent(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
