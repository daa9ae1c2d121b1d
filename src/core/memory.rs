//! Session storage using SQLite
//!
//! Persists each session's message history and cart, and serializes turns
//! within a session while letting different sessions run in parallel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

const UPSERT_SESSION: &str = r#"
    INSERT INTO sessions (id, created_at, updated_at) VALUES (?, ?, ?)
    ON CONFLICT(id) DO UPDATE SET updated_at = excluded.updated_at
"#;

const INSERT_MESSAGE: &str = r#"
    INSERT INTO messages (session_id, role, content, created_at)
    VALUES (?, ?, ?, ?)
"#;

use crate::conversation::{ConversationState, Message, Role};

use super::cart::Cart;

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt cart data: {0}")]
    Cart(#[from] serde_json::Error),
}

/// A stored message with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl From<StoredMessage> for Message {
    fn from(stored: StoredMessage) -> Self {
        Message {
            role: stored.role,
            content: stored.content,
        }
    }
}

/// Memory store for session persistence
pub struct MemoryStore {
    pool: SqlitePool,
}

impl MemoryStore {
    /// Create a new memory store with the given SQLite database path
    pub async fn new(db_path: &Path) -> Result<Self, MemoryError> {
        // Create parent directories if they don't exist
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create an in-memory store
    pub async fn new_in_memory() -> Result<Self, MemoryError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                cart TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (session_id) REFERENCES sessions(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_messages_session
            ON messages(session_id, id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Append a message to a session
    pub async fn save_message(&self, session_id: &str, message: &Message) -> Result<i64, MemoryError> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        sqlx::query(UPSERT_SESSION)
            .bind(session_id)
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query(INSERT_MESSAGE)
            .bind(session_id)
            .bind(message.role.as_str())
            .bind(&message.content)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.last_insert_rowid())
    }

    /// Store the input side of a turn atomically: the user message (if any)
    /// and the reduced cart (if it changed). Either both land or neither.
    pub async fn record_user_turn(
        &self,
        session_id: &str,
        user: Option<&Message>,
        cart: Option<&Cart>,
    ) -> Result<(), MemoryError> {
        let cart_json = cart.map(serde_json::to_string).transpose()?;
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        sqlx::query(UPSERT_SESSION)
            .bind(session_id)
            .bind(&now)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

        if let Some(message) = user {
            sqlx::query(INSERT_MESSAGE)
                .bind(session_id)
                .bind(message.role.as_str())
                .bind(&message.content)
                .bind(&now)
                .execute(&mut *tx)
                .await?;
        }

        if let Some(json) = cart_json {
            sqlx::query("UPDATE sessions SET cart = ? WHERE id = ?")
                .bind(json)
                .bind(session_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// The session's cart; empty for unknown sessions
    pub async fn get_cart(&self, session_id: &str) -> Result<Cart, MemoryError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT cart FROM sessions WHERE id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some((json,)) => Ok(serde_json::from_str(&json)?),
            None => Ok(Cart::new()),
        }
    }

    /// Full message history of a session, oldest first
    pub async fn get_transcript(&self, session_id: &str) -> Result<Vec<StoredMessage>, MemoryError> {
        let rows: Vec<(i64, String, String, String)> = sqlx::query_as(
            r#"
            SELECT id, role, content, created_at
            FROM messages
            WHERE session_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, role, content, created_at)| StoredMessage {
                id,
                session_id: session_id.to_string(),
                role: Role::from_stored(&role),
                content,
                created_at: DateTime::parse_from_rfc3339(&created_at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            })
            .collect())
    }

    /// Rebuild a session's conversation state; new sessions start empty
    pub async fn load_state(&self, session_id: &str) -> Result<ConversationState, MemoryError> {
        let messages = self
            .get_transcript(session_id)
            .await?
            .into_iter()
            .map(Message::from)
            .collect();
        let cart = self.get_cart(session_id).await?;

        Ok(ConversationState::restore(messages, cart))
    }

    /// All session IDs, most recently active first
    pub async fn list_sessions(&self) -> Result<Vec<String>, MemoryError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT id FROM sessions ORDER BY updated_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

type LockMap = HashMap<String, Arc<AsyncMutex<()>>>;

/// One async mutex per session, so a session runs a single turn at a time
///
/// Entries live only while a turn holds or waits for them.
#[derive(Default)]
pub struct SessionLocks {
    locks: Arc<Mutex<LockMap>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a session
    pub async fn acquire(&self, session_id: &str) -> SessionGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        SessionGuard {
            guard: Some(lock.lock_owned().await),
            session_id: session_id.to_string(),
            locks: self.locks.clone(),
        }
    }

    /// Number of sessions currently holding or awaiting a lock
    pub fn active(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Exclusive access to one session; dropping it releases the session and
/// forgets its lock once nobody else is waiting
pub struct SessionGuard {
    guard: Option<OwnedMutexGuard<()>>,
    session_id: String,
    locks: Arc<Mutex<LockMap>>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        // Release first so the map holds the last reference unless a waiter cloned it
        drop(self.guard.take());

        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks
            .get(&self.session_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.session_id);
        }
    }
}
