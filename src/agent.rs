//! Agent triggering for inbound messages
//!
//! When enabled, each inbound message that survives the filters wakes an AI
//! agent — either by expanding a shell command template or by POSTing a JSON
//! payload to an HTTP endpoint. The side-effecting step runs on a detached
//! task bounded by a deadline so subprocess or HTTP latency never blocks the
//! event loop. A "composing" presence indicator is shown while the agent
//! runs and cleared when it finishes, whatever the outcome.

use std::collections::HashSet;
use std::process::Stdio;
use std::sync::Arc;

use serde::Serialize;
use tokio::process::Command;
use tokio::time::timeout;

use crate::config::{AgentConfig, AgentMode};
use crate::engine::{Presence, ProtocolEngine};
use crate::jid::{normalize_sender, Jid};
use crate::webhook::WebhookPayload;

/// JSON body sent to the agent endpoint in http mode
#[derive(Debug, Serialize)]
pub struct AgentPayload {
    /// Chat JID the message arrived in
    pub from: String,
    /// Sender display name
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Extracted text or caption
    pub message: String,
    /// Chat JID (duplicate of `from` for reply routing)
    pub chat_jid: String,
    /// Message type
    #[serde(rename = "type")]
    pub kind: String,
    /// Whether the chat is a group
    pub is_group: bool,
    /// Group name when the chat is a group
    #[serde(skip_serializing_if = "String::is_empty")]
    pub group_name: String,
    /// Network message id
    pub message_id: String,
    /// Unix timestamp (seconds)
    pub timestamp: i64,
    /// URL the agent can POST replies to
    #[serde(skip_serializing_if = "String::is_empty")]
    pub reply_endpoint: String,
    /// System prompt for the agent
    #[serde(skip_serializing_if = "String::is_empty")]
    pub system_prompt: String,
}

/// Wakes an agent for inbound messages
pub struct AgentTrigger {
    inner: Arc<Inner>,
}

struct Inner {
    config: AgentConfig,
    allowlist: HashSet<String>,
    blocklist: HashSet<String>,
    engine: Arc<dyn ProtocolEngine>,
    client: reqwest::Client,
}

impl AgentTrigger {
    /// Create a trigger. Allow/block lists are normalized once here so
    /// entries can be written as phone numbers or full JIDs.
    #[must_use]
    pub fn new(config: AgentConfig, engine: Arc<dyn ProtocolEngine>) -> Self {
        let allowlist = config
            .allowlist
            .iter()
            .map(|s| normalize_sender(s))
            .collect();
        let blocklist = config
            .blocklist
            .iter()
            .map(|s| normalize_sender(s))
            .collect();
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();

        Self {
            inner: Arc::new(Inner {
                config,
                allowlist,
                blocklist,
                engine,
                client,
            }),
        }
    }

    /// Fire the agent for an inbound message.
    ///
    /// Filters run first; a dropped message produces no side effect at all,
    /// presence signals included. The actual invocation is detached — this
    /// returns as soon as the task is spawned.
    pub async fn trigger(&self, payload: &WebhookPayload, from_me: bool) {
        let inner = &self.inner;
        if !inner.config.enabled {
            return;
        }
        if inner.config.ignore_from_me && from_me {
            return;
        }
        if inner.config.dm_only && payload.is_group() {
            tracing::debug!(
                message_id = %payload.message_id,
                "agent skipping group message (dm_only)"
            );
            return;
        }

        let sender = normalize_sender(&payload.from);
        if !inner.blocklist.is_empty() && inner.blocklist.contains(&sender) {
            tracing::debug!(
                from = %payload.from,
                message_id = %payload.message_id,
                "agent skipping blocklisted sender"
            );
            return;
        }
        if !inner.allowlist.is_empty() && !inner.allowlist.contains(&sender) {
            tracing::debug!(
                from = %payload.from,
                message_id = %payload.message_id,
                "agent skipping non-allowlisted sender"
            );
            return;
        }

        inner.send_presence(&payload.from, Presence::Composing).await;

        let this = Arc::clone(inner);
        let payload = payload.clone();
        tokio::spawn(async move {
            match this.config.mode {
                AgentMode::Http => this.run_http(&payload).await,
                AgentMode::Command => this.run_command(&payload).await,
            }
            // Clear the typing indicator no matter how the run ended.
            this.send_presence(&payload.from, Presence::Paused).await;
        });
    }

    /// The configured system prompt
    #[must_use]
    pub fn system_prompt(&self) -> &str {
        &self.inner.config.system_prompt
    }
}

impl Inner {
    async fn run_command(&self, payload: &WebhookPayload) {
        if self.config.command.is_empty() {
            tracing::warn!("agent command mode enabled but no command configured");
            return;
        }

        let cmd = expand_template(&self.config.command, payload, &self.config.system_prompt);
        tracing::info!(command = %cmd, message_id = %payload.message_id, "agent running command");

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&cmd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match timeout(self.config.timeout, command.output()).await {
            Err(_) => {
                tracing::error!(
                    message_id = %payload.message_id,
                    timeout = ?self.config.timeout,
                    "agent command timed out"
                );
            }
            Ok(Err(e)) => {
                tracing::error!(
                    error = %e,
                    message_id = %payload.message_id,
                    "agent command failed to start"
                );
            }
            Ok(Ok(out)) => {
                let combined = combined_output(&out);
                if out.status.success() {
                    tracing::info!(
                        output = %combined,
                        message_id = %payload.message_id,
                        "agent command completed"
                    );
                } else {
                    tracing::error!(
                        code = out.status.code().unwrap_or(-1),
                        output = %combined,
                        message_id = %payload.message_id,
                        "agent command failed"
                    );
                }
            }
        }
    }

    async fn run_http(&self, payload: &WebhookPayload) {
        if self.config.http_url.is_empty() {
            tracing::warn!("agent http mode enabled but no http_url configured");
            return;
        }

        let body = AgentPayload {
            from: payload.from.clone(),
            name: payload.name.clone(),
            message: payload.message.clone(),
            chat_jid: payload.from.clone(),
            kind: payload.kind.clone(),
            is_group: payload.is_group(),
            group_name: payload.group_name.clone(),
            message_id: payload.message_id.clone(),
            timestamp: payload.timestamp,
            reply_endpoint: self.config.reply_endpoint.clone(),
            system_prompt: self.config.system_prompt.clone(),
        };

        tracing::info!(
            url = %self.config.http_url,
            message_id = %payload.message_id,
            "agent posting http"
        );

        match self.client.post(&self.config.http_url).json(&body).send().await {
            Err(e) => {
                tracing::error!(
                    error = %e,
                    message_id = %payload.message_id,
                    "agent http delivery failed"
                );
            }
            Ok(resp) if resp.status().is_success() => {
                tracing::info!(
                    status = resp.status().as_u16(),
                    message_id = %payload.message_id,
                    "agent http delivered"
                );
            }
            Ok(resp) => {
                tracing::warn!(
                    status = resp.status().as_u16(),
                    message_id = %payload.message_id,
                    "agent http non-2xx response"
                );
            }
        }
    }

    async fn send_presence(&self, chat: &str, presence: Presence) {
        let Ok(jid) = Jid::parse(chat) else {
            tracing::debug!(chat, "agent presence: could not parse jid");
            return;
        };
        if let Err(e) = self.engine.chat_presence(&jid, presence).await {
            tracing::debug!(error = %e, chat, state = presence.as_str(), "agent presence failed");
        }
    }
}

/// Expand `{placeholder}` variables in a command template.
///
/// Every value is shell-escaped before substitution; `{is_group}` expands to
/// a bare `true`/`false`.
#[must_use]
pub fn expand_template(template: &str, p: &WebhookPayload, system_prompt: &str) -> String {
    let pairs = [
        ("{from}", shell_escape(&p.from)),
        ("{name}", shell_escape(&p.name)),
        ("{message}", shell_escape(&p.message)),
        ("{chat_jid}", shell_escape(&p.from)),
        ("{type}", shell_escape(&p.kind)),
        ("{is_group}", p.is_group().to_string()),
        ("{group_name}", shell_escape(&p.group_name)),
        ("{message_id}", shell_escape(&p.message_id)),
        ("{system_prompt}", shell_escape(system_prompt)),
    ];

    let mut out = template.to_string();
    for (key, value) in pairs {
        out = out.replace(key, &value);
    }
    out
}

/// Escape a value for inclusion inside a single-quoted shell argument.
///
/// A single quote cannot be escaped inside single quotes; the standard
/// sequence `'"'"'` closes the quote, emits a literal `'`, and reopens it.
#[must_use]
pub fn shell_escape(s: &str) -> String {
    s.replace('\'', r#"'"'"'"#)
}

fn combined_output(out: &std::process::Output) -> String {
    let mut combined = String::from_utf8_lossy(&out.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&out.stderr));
    combined.trim_end().to_string()
}
