//! SQLite store for conversations, messages, and app memory
//!
//! The browsing surface is deliberately small: conversations carry a soft
//! delete flag, messages order by `(created_at, id)`, and app memory is a
//! key/value table of long-term facts injected into chat prompts.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;
use std::sync::Mutex;

#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: i64,
    pub title: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredMessage {
    pub role: String,
    pub content: String,
    pub created_at: String,
}

/// Connection wrapper. SQLite writes are serialized behind one mutex; the
/// store is shared across handlers via `Arc`.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir).context("Failed to create data dir")?;
        let conn = Connection::open(data_dir.join("vivoice.db"))
            .context("Failed to open SQLite database")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS conversation (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 title TEXT NOT NULL DEFAULT '',
                 created_at TEXT NOT NULL,
                 is_deleted INTEGER NOT NULL DEFAULT 0
             );
             CREATE TABLE IF NOT EXISTS message (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 conversation_id INTEGER NOT NULL REFERENCES conversation(id),
                 role TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
                 content TEXT NOT NULL,
                 created_at TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_message_conv
                 ON message (conversation_id, created_at, id);
             CREATE TABLE IF NOT EXISTS app_memory (
                 key TEXT PRIMARY KEY,
                 value TEXT NOT NULL
             );",
        )?;
        Ok(())
    }

    /// Insert a message, creating the conversation row if needed.
    pub fn save_message(&self, conversation_id: i64, role: &str, content: &str) -> Result<i64> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT OR IGNORE INTO conversation (id, title, created_at) VALUES (?1, '', ?2)",
            params![conversation_id, now],
        )?;
        conn.execute(
            "INSERT INTO message (conversation_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![conversation_id, role, content, now],
        )?;
        Ok(conversation_id)
    }

    pub fn create_conversation(&self) -> Result<i64> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let now = chrono::Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO conversation (title, created_at) VALUES ('', ?1)",
            params![now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn set_title(&self, conversation_id: i64, title: &str) -> Result<()> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "UPDATE conversation SET title = ?1 WHERE id = ?2",
            params![title, conversation_id],
        )?;
        Ok(())
    }

    /// Non-deleted conversations, newest first
    pub fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, title, created_at FROM conversation
             WHERE is_deleted = 0 ORDER BY id DESC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Conversation {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    created_at: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn conversation_exists(&self, conversation_id: i64) -> Result<bool> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let found: Option<i64> = conn
            .query_row(
                "SELECT id FROM conversation WHERE id = ?1 AND is_deleted = 0",
                params![conversation_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn soft_delete(&self, conversation_id: i64) -> Result<bool> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let n = conn.execute(
            "UPDATE conversation SET is_deleted = 1 WHERE id = ?1",
            params![conversation_id],
        )?;
        Ok(n > 0)
    }

    /// All messages of a conversation ordered by `(created_at, id)`
    pub fn history(&self, conversation_id: i64) -> Result<Vec<StoredMessage>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT role, content, created_at FROM message
             WHERE conversation_id = ?1 ORDER BY created_at, id",
        )?;
        let rows = stmt
            .query_map(params![conversation_id], |row| {
                Ok(StoredMessage {
                    role: row.get(0)?,
                    content: row.get(1)?,
                    created_at: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Upsert a long-term fact; empty values are ignored.
    pub fn set_app_memory(&self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        if value.is_empty() {
            return Ok(());
        }
        let conn = self.conn.lock().expect("store mutex poisoned");
        conn.execute(
            "INSERT INTO app_memory (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn app_memory(&self) -> Result<Vec<(String, String)>> {
        let conn = self.conn.lock().expect("store mutex poisoned");
        let mut stmt = conn.prepare("SELECT key, value FROM app_memory ORDER BY key")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Long-term facts formatted as a prompt block, empty string if none
    pub fn app_memory_text(&self) -> Result<String> {
        let mem = self.app_memory()?;
        if mem.is_empty() {
            return Ok(String::new());
        }
        let mut lines = vec!["APP_MEMORY (long-term facts):".to_string()];
        for (k, v) in mem {
            lines.push(format!("- {}: {}", k, v));
        }
        Ok(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_ordering() {
        let store = Store::open_in_memory().unwrap();
        let id = store.create_conversation().unwrap();
        store.save_message(id, "user", "hi").unwrap();
        store.save_message(id, "assistant", "hello").unwrap();
        store.save_message(id, "user", "bye").unwrap();

        let history = store.history(id).unwrap();
        let roles: Vec<&str> = history.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "assistant", "user"]);
        assert_eq!(history[2].content, "bye");
    }

    #[test]
    fn test_soft_delete_hides_conversation() {
        let store = Store::open_in_memory().unwrap();
        let id = store.create_conversation().unwrap();
        assert_eq!(store.list_conversations().unwrap().len(), 1);
        assert!(store.soft_delete(id).unwrap());
        assert!(store.list_conversations().unwrap().is_empty());
        assert!(!store.conversation_exists(id).unwrap());
        // deleting an unknown id reports false
        assert!(!store.soft_delete(9999).unwrap());
    }

    #[test]
    fn test_app_memory_upsert() {
        let store = Store::open_in_memory().unwrap();
        store.set_app_memory("name", "An").unwrap();
        store.set_app_memory("name", "Binh").unwrap();
        store.set_app_memory("empty", "   ").unwrap();

        let mem = store.app_memory().unwrap();
        assert_eq!(mem, vec![("name".to_string(), "Binh".to_string())]);
        assert!(store.app_memory_text().unwrap().contains("- name: Binh"));
    }

    #[test]
    fn test_save_message_creates_conversation() {
        let store = Store::open_in_memory().unwrap();
        store.save_message(42, "user", "hi").unwrap();
        assert!(store.conversation_exists(42).unwrap());
    }
}
