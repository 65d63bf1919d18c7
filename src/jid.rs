//! WhatsApp JID parsing and normalization
//!
//! A JID is `user@server`. Direct chats live on `s.whatsapp.net`, groups on
//! `g.us`. Bare phone numbers are accepted anywhere a JID is expected and
//! resolved onto the default user server.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Server for direct (one-to-one) chats
pub const USER_SERVER: &str = "s.whatsapp.net";

/// Server for group chats
pub const GROUP_SERVER: &str = "g.us";

/// Chat id carrying status broadcasts; never processed by the pipeline
pub const STATUS_BROADCAST: &str = "status@broadcast";

/// A parsed WhatsApp identifier (`user@server`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Jid(String);

impl Jid {
    /// Parse a JID from a string.
    ///
    /// Strings containing `@` are taken as full JIDs. Anything else is
    /// treated as a phone number: a leading `+` or `00` is stripped and the
    /// remaining digits are placed on the default user server.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidJid`] for empty input, a JID with an empty
    /// user or server part, or a phone number with no digits.
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(Error::InvalidJid("empty jid".into()));
        }

        if let Some((user, server)) = s.split_once('@') {
            if user.is_empty() || server.is_empty() {
                return Err(Error::InvalidJid(format!("malformed jid {s:?}")));
            }
            return Ok(Self(s.to_string()));
        }

        // Treat as a phone number.
        let cleaned = s
            .strip_prefix('+')
            .or_else(|| s.strip_prefix("00"))
            .unwrap_or(s);

        let digits: String = cleaned.chars().filter(char::is_ascii_digit).collect();
        if digits.is_empty() {
            return Err(Error::InvalidJid(format!("no digits in jid {s:?}")));
        }

        Ok(Self(format!("{digits}@{USER_SERVER}")))
    }

    /// The user part (before `@`)
    #[must_use]
    pub fn user(&self) -> &str {
        self.0.split_once('@').map_or(self.0.as_str(), |(u, _)| u)
    }

    /// The server part (after `@`)
    #[must_use]
    pub fn server(&self) -> &str {
        self.0.split_once('@').map_or("", |(_, s)| s)
    }

    /// Whether this identifies a group chat
    #[must_use]
    pub fn is_group(&self) -> bool {
        self.server() == GROUP_SERVER
    }

    /// Whether this is the status broadcast pseudo-chat
    #[must_use]
    pub fn is_status_broadcast(&self) -> bool {
        self.0 == STATUS_BROADCAST
    }

    /// The full JID string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalize a sender identifier for allow/block list comparison.
///
/// Strips the `@s.whatsapp.net` suffix and a leading `+` so that list
/// entries can be written as plain phone numbers or full JIDs
/// interchangeably.
#[must_use]
pub fn normalize_sender(s: &str) -> String {
    let s = s.strip_suffix("@s.whatsapp.net").unwrap_or(s);
    let s = s.strip_prefix('+').unwrap_or(s);
    s.to_string()
}
