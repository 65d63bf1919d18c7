//! Message persistence
//!
//! Append + query store for processed messages, backed by `SQLite` through a
//! small connection pool. Inserts are idempotent on message id, so replayed
//! events never produce duplicate rows. An FTS5 index over content and
//! sender names backs the search endpoint.

mod schema;

use std::path::Path;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub use schema::SCHEMA_VERSION;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Pooled database connection
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// A stored message row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Network message id
    pub id: String,
    /// Chat the message belongs to
    pub chat_jid: String,
    /// Sender JID
    pub sender_jid: String,
    /// Sender display name
    #[serde(default)]
    pub sender_name: String,
    /// Extracted text or caption
    #[serde(default)]
    pub content: String,
    /// Message type ("text", "image", …)
    pub msg_type: String,
    /// Local path of the downloaded attachment, if any
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub media_path: String,
    /// Unix timestamp (seconds)
    pub timestamp: i64,
    /// Whether this device sent the message
    pub is_from_me: bool,
    /// Whether the chat is a group
    pub is_group: bool,
    /// Group name when known
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group_name: String,
}

/// A conversation summary for chat listings
#[derive(Debug, Clone, Serialize)]
pub struct ChatSummary {
    /// Chat JID
    pub jid: String,
    /// Display name (group name, sender name, or the JID itself)
    pub name: String,
    /// Content of the most recent message
    pub last_message: String,
    /// Timestamp of the most recent message
    pub last_time: i64,
    /// Whether the chat is a group
    pub is_group: bool,
}

/// `SQLite`-backed message store
#[derive(Clone)]
pub struct MessageStore {
    pool: DbPool,
}

impl MessageStore {
    /// Open (or create) the store at `path` and run migrations.
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be opened or migrated.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")
        });
        Self::build(manager, 4)
    }

    /// Open an in-memory store (for testing)
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be initialized.
    pub fn open_in_memory() -> Result<Self> {
        Self::build(SqliteConnectionManager::memory(), 1)
    }

    fn build(manager: SqliteConnectionManager, max_size: u32) -> Result<Self> {
        let pool = Pool::builder()
            .max_size(max_size)
            .build(manager)
            .map_err(|e| Error::Database(e.to_string()))?;

        let conn = pool.get().map_err(|e| Error::Database(e.to_string()))?;
        schema::init(&conn)?;

        tracing::info!(version = SCHEMA_VERSION, "message store initialized");
        Ok(Self { pool })
    }

    fn conn(&self) -> Result<DbConn> {
        self.pool.get().map_err(|e| Error::Database(e.to_string()))
    }

    /// Insert a message. A row with the same id is silently ignored.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails.
    pub fn save(&self, msg: &StoredMessage) -> Result<()> {
        self.conn()?.execute(
            "INSERT OR IGNORE INTO messages
                (id, chat_jid, sender_jid, sender_name, content, msg_type,
                 media_path, timestamp, is_from_me, is_group, group_name)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                msg.id,
                msg.chat_jid,
                msg.sender_jid,
                msg.sender_name,
                msg.content,
                msg.msg_type,
                msg.media_path,
                msg.timestamp,
                i32::from(msg.is_from_me),
                i32::from(msg.is_group),
                msg.group_name,
            ],
        )?;
        Ok(())
    }

    /// Messages for a chat, newest first, paginated
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub fn messages_for_chat(
        &self,
        chat_jid: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<StoredMessage>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, chat_jid, sender_jid, sender_name, content, msg_type,
                    media_path, timestamp, is_from_me, is_group, group_name
             FROM messages
             WHERE chat_jid = ?1
             ORDER BY timestamp DESC
             LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt.query_map(params![chat_jid, limit, offset], row_to_message)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::Sqlite)
    }

    /// Full-text search across content and sender names, ranked by relevance
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub fn search(&self, query: &str, limit: u32) -> Result<Vec<StoredMessage>> {
        // Quote the query so FTS5 operators in user input cannot break it.
        let fts_query = format!("\"{}\"", query.replace('"', "\"\""));

        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT m.id, m.chat_jid, m.sender_jid, m.sender_name, m.content,
                    m.msg_type, m.media_path, m.timestamp, m.is_from_me,
                    m.is_group, m.group_name
             FROM messages m
             JOIN messages_fts fts ON m.rowid = fts.rowid
             WHERE messages_fts MATCH ?1
             ORDER BY rank
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![fts_query, limit], row_to_message)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::Sqlite)
    }

    /// Distinct chats with their most recent message, newest first
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub fn chats(&self, limit: u32) -> Result<Vec<ChatSummary>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT
                m.chat_jid,
                CASE WHEN m.is_group = 1 AND m.group_name != '' THEN m.group_name
                     WHEN m.sender_name != '' THEN m.sender_name
                     ELSE m.chat_jid END AS name,
                m.content,
                m.timestamp,
                m.is_group
             FROM messages m
             INNER JOIN (
                 SELECT chat_jid, MAX(timestamp) AS max_ts
                 FROM messages
                 GROUP BY chat_jid
             ) latest ON m.chat_jid = latest.chat_jid AND m.timestamp = latest.max_ts
             GROUP BY m.chat_jid
             ORDER BY m.timestamp DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok(ChatSummary {
                jid: row.get(0)?,
                name: row.get(1)?,
                last_message: row.get(2)?,
                last_time: row.get(3)?,
                is_group: row.get::<_, i32>(4)? != 0,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::Sqlite)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    Ok(StoredMessage {
        id: row.get(0)?,
        chat_jid: row.get(1)?,
        sender_jid: row.get(2)?,
        sender_name: row.get(3)?,
        content: row.get(4)?,
        msg_type: row.get(5)?,
        media_path: row.get(6)?,
        timestamp: row.get(7)?,
        is_from_me: row.get::<_, i32>(8)? != 0,
        is_group: row.get::<_, i32>(9)? != 0,
        group_name: row.get(10)?,
    })
}
