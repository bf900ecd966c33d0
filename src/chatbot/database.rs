//! Persistent SQLite database for messages, prompts and per-chat settings.

use crate::chatbot::message::{Role, StoredMessage};
use rusqlite::{params, Connection, OptionalExtension};
use std::fmt;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Errors from the embedded store.
#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    Poisoned,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Sqlite(e) => write!(f, "database error: {e}"),
            StoreError::Poisoned => write!(f, "database lock poisoned"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Sqlite(e) => Some(e),
            StoreError::Poisoned => None,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Sqlite(e)
    }
}

/// A named system instruction owned by one chat.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptRecord {
    pub chat_id: i64,
    pub name: String,
    pub text: String,
}

/// Stored per-chat settings. `None` fields fall back to defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatSettings {
    pub temperature: Option<f64>,
    pub top_k: Option<f64>,
    pub top_p: Option<f64>,
    pub max_output_tokens: Option<f64>,
    /// Weak reference into the prompts table, by name.
    pub active_prompt: Option<String>,
}

/// Persistent SQLite database for the chatbot.
pub struct Database {
    conn: Mutex<Connection>,
    /// Rows kept per chat (`2 * max_history`).
    retention: usize,
}

impl Database {
    /// Create a new in-memory database.
    pub fn in_memory(max_history: usize) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, max_history)
    }

    /// Open (or create) a database file.
    pub fn open(path: &Path, max_history: usize) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let db = Self::with_connection(conn, max_history)?;
        let (messages, prompts) = db.get_counts()?;
        info!(
            "Loaded database from {:?} ({} messages, {} prompts, keeping {} per chat)",
            path,
            messages,
            prompts,
            db.retention()
        );
        Ok(db)
    }

    fn with_connection(conn: Connection, max_history: usize) -> Result<Self, StoreError> {
        let db = Self {
            conn: Mutex::new(conn),
            retention: max_history.saturating_mul(2),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;

        conn.execute_batch(r#"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id INTEGER NOT NULL,
                sender TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                role TEXT NOT NULL CHECK(role IN ('user', 'bot'))
            );

            CREATE TABLE IF NOT EXISTS prompts (
                chat_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                text TEXT NOT NULL,
                PRIMARY KEY (chat_id, name)
            );

            CREATE TABLE IF NOT EXISTS chat_config (
                chat_id INTEGER PRIMARY KEY,
                temperature REAL,
                top_k REAL,
                top_p REAL,
                max_output_tokens REAL,
                active_prompt TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_messages_chat_time ON messages(chat_id, timestamp DESC, id DESC);
        "#)?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn get_counts(&self) -> Result<(usize, usize), StoreError> {
        let conn = self.lock()?;
        let messages: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        let prompts: i64 = conn.query_row("SELECT COUNT(*) FROM prompts", [], |row| row.get(0))?;
        Ok((messages as usize, prompts as usize))
    }

    /// Maximum number of message rows kept per chat.
    pub fn retention(&self) -> usize {
        self.retention
    }

    // ==================== MESSAGE METHODS ====================

    /// Append a message, then trim the chat to the retention window.
    ///
    /// Insert and trim are separate statements; an interruption in between
    /// leaves extra rows that the next append removes.
    pub fn append_message(&self, chat_id: i64, sender: &str, content: &str, role: Role) -> Result<(), StoreError> {
        let timestamp = chrono::Utc::now().timestamp_millis();
        {
            let conn = self.lock()?;
            conn.execute(
                "INSERT INTO messages (chat_id, sender, content, timestamp, role) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![chat_id, sender, content, timestamp, role.as_str()],
            )?;
        }
        let removed = self.trim_history(chat_id)?;
        if removed > 0 {
            debug!("Trimmed {} old message(s) from chat {}", removed, chat_id);
        }
        Ok(())
    }

    /// Delete every record for the chat beyond the most recent `retention` rows.
    fn trim_history(&self, chat_id: i64) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM messages WHERE chat_id = ?1 AND id IN (
                SELECT id FROM messages WHERE chat_id = ?1
                ORDER BY timestamp DESC, id DESC
                LIMIT -1 OFFSET ?2
            )",
            params![chat_id, self.retention as i64],
        )?;
        Ok(removed)
    }

    /// Most recent records for the chat, oldest first.
    pub fn recent_messages(&self, chat_id: i64) -> Result<Vec<StoredMessage>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT chat_id, sender, content, timestamp, role FROM messages
             WHERE chat_id = ?1
             ORDER BY timestamp DESC, id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![chat_id, self.retention as i64], |row| {
            Ok(StoredMessage {
                chat_id: row.get(0)?,
                sender: row.get(1)?,
                content: row.get(2)?,
                timestamp: row.get(3)?,
                role: Role::from_str(&row.get::<_, String>(4)?),
            })
        })?;

        let mut result = rows.collect::<Result<Vec<_>, _>>()?;
        result.reverse();
        Ok(result)
    }

    /// Prompt context window: each record rendered as `"{sender}: {content}"`.
    pub fn history(&self, chat_id: i64) -> Result<Vec<String>, StoreError> {
        Ok(self.recent_messages(chat_id)?.iter().map(|m| m.format()).collect())
    }

    /// Delete all message records for the chat.
    pub fn reset_history(&self, chat_id: i64) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM messages WHERE chat_id = ?1", params![chat_id])?;
        info!("Reset history for chat {} ({} messages)", chat_id, removed);
        Ok(removed)
    }

    /// Total message count for a chat.
    pub fn message_count(&self, chat_id: i64) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE chat_id = ?1",
            params![chat_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // ==================== PROMPT METHODS ====================

    pub fn upsert_prompt(&self, chat_id: i64, name: &str, text: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO prompts (chat_id, name, text) VALUES (?1, ?2, ?3)
             ON CONFLICT(chat_id, name) DO UPDATE SET text = excluded.text",
            params![chat_id, name, text],
        )?;
        Ok(())
    }

    pub fn get_prompt(&self, chat_id: i64, name: &str) -> Result<Option<PromptRecord>, StoreError> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                "SELECT chat_id, name, text FROM prompts WHERE chat_id = ?1 AND name = ?2",
                params![chat_id, name],
                |row| Ok(PromptRecord {
                    chat_id: row.get(0)?,
                    name: row.get(1)?,
                    text: row.get(2)?,
                }),
            )
            .optional()?;
        Ok(record)
    }

    /// All prompts of a chat, ordered by name.
    pub fn list_prompts(&self, chat_id: i64) -> Result<Vec<PromptRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT chat_id, name, text FROM prompts WHERE chat_id = ?1 ORDER BY name ASC",
        )?;
        let rows = stmt.query_map(params![chat_id], |row| {
            Ok(PromptRecord {
                chat_id: row.get(0)?,
                name: row.get(1)?,
                text: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // ==================== SETTINGS METHODS ====================

    pub fn chat_settings(&self, chat_id: i64) -> Result<ChatSettings, StoreError> {
        let conn = self.lock()?;
        let settings = conn
            .query_row(
                "SELECT temperature, top_k, top_p, max_output_tokens, active_prompt
                 FROM chat_config WHERE chat_id = ?1",
                params![chat_id],
                |row| Ok(ChatSettings {
                    temperature: row.get(0)?,
                    top_k: row.get(1)?,
                    top_p: row.get(2)?,
                    max_output_tokens: row.get(3)?,
                    active_prompt: row.get(4)?,
                }),
            )
            .optional()?;
        Ok(settings.unwrap_or_default())
    }

    /// Upsert a single numeric column. `column` must come from the parameter allow-list.
    pub(crate) fn set_setting(&self, chat_id: i64, column: &'static str, value: f64) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let sql = format!(
            "INSERT INTO chat_config (chat_id, {column}) VALUES (?1, ?2)
             ON CONFLICT(chat_id) DO UPDATE SET {column} = excluded.{column}"
        );
        conn.execute(&sql, params![chat_id, value])?;
        Ok(())
    }

    pub fn set_active_prompt(&self, chat_id: i64, name: Option<&str>) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO chat_config (chat_id, active_prompt) VALUES (?1, ?2)
             ON CONFLICT(chat_id) DO UPDATE SET active_prompt = excluded.active_prompt",
            params![chat_id, name],
        )?;
        Ok(())
    }

    /// Run raw SQL against the store, for simulating failures in tests.
    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> Result<(), StoreError> {
        self.lock()?.execute_batch(sql)?;
        Ok(())
    }
}
