//! Local offline cache.
//!
//! A SQLite mirror of messages, chats, and media metadata, plus the sync
//! queue of writes accumulated while offline. Upserts are last write wins;
//! there is no conflict resolution against the remote copy. Messages are
//! keyed by `(chat_id, message_id)`, with [`MessageKey`] as the typed
//! handle.

pub mod schema;


use crate::sync::PendingOp;
use crate::types::{Chat, ChatMessage, MessageStatus};
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Composite key of a cached message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageKey {
    pub chat_id: String,
    pub message_id: String,
}

impl MessageKey {
    pub fn new(chat_id: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            message_id: message_id.into(),
        }
    }
}

/// Cached metadata for a message attachment.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaRecord {
    pub key: MessageKey,
    pub object_path: String,
    /// Where the downloaded copy lives on disk, if it was fetched.
    pub local_path: Option<String>,
    pub size_bytes: u64,
}

/// A sync-queue entry with its persisted attempt count.
#[derive(Debug, Clone)]
pub struct QueuedOp {
    pub id: i64,
    pub op: PendingOp,
    pub attempts: u32,
}

fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn status_str(status: MessageStatus) -> &'static str {
    match status {
        MessageStatus::Pending => "pending",
        MessageStatus::Sent => "sent",
        MessageStatus::Delivered => "delivered",
        MessageStatus::Read => "read",
    }
}

/// Handle to the cache database. Cheap to clone; all clones share one
/// connection behind a mutex.
#[derive(Clone)]
pub struct LocalCache {
    conn: Arc<Mutex<Connection>>,
}

impl LocalCache {
    /// Opens (or creates) the cache at `path`; `None` opens an in-memory
    /// database, which the tests use.
    pub fn open(path: Option<&Path>) -> Result<Self, CacheError> {
        let conn = match path {
            Some(p) => Connection::open(p)?,
            None => Connection::open_in_memory()?,
        };

        let cache = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        cache.init_schema()?;
        Ok(cache)
    }

    fn init_schema(&self) -> Result<(), CacheError> {
        let conn = self.conn.lock();

        conn.execute_batch(schema::CREATE_TABLES)?;

        let version: Option<i32> = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .optional()?;

        match version {
            None => {
                conn.execute(
                    "INSERT INTO schema_version (version) VALUES (?1)",
                    params![schema::SCHEMA_VERSION],
                )?;
                tracing::info!(version = schema::SCHEMA_VERSION, "cache schema created");
            }
            Some(v) if v == schema::SCHEMA_VERSION => {}
            Some(v) => {
                // No migrations yet; version 1 is the only shape that exists.
                tracing::warn!(found = v, expected = schema::SCHEMA_VERSION, "cache schema version mismatch");
            }
        }

        Ok(())
    }

    // ---- messages ----

    /// Inserts or replaces the cached copy of a message.
    pub fn upsert_message(&self, message: &ChatMessage) -> Result<(), CacheError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO messages
                (chat_id, message_id, payload, status, sent_at, read_at, cached_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                message.chat_id,
                message.id,
                serde_json::to_string(message)?,
                status_str(message.status),
                ts(&message.sent_at),
                message.read_at.as_ref().map(ts),
                ts(&Utc::now()),
            ],
        )?;
        Ok(())
    }

    pub fn get_message(&self, key: &MessageKey) -> Result<Option<ChatMessage>, CacheError> {
        let conn = self.conn.lock();
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM messages WHERE chat_id = ?1 AND message_id = ?2",
                params![key.chat_id, key.message_id],
                |row| row.get(0),
            )
            .optional()?;

        match payload {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// The newest `limit` messages of a chat, most recent first.
    pub fn messages_for_chat(
        &self,
        chat_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, CacheError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT payload FROM messages WHERE chat_id = ?1
             ORDER BY sent_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![chat_id, limit as i64], |row| {
            row.get::<_, String>(0)
        })?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(serde_json::from_str(&row?)?);
        }
        Ok(messages)
    }

    /// Marks a cached message read at `read_at`; a no-op when the message is
    /// not cached.
    pub fn mark_read(&self, key: &MessageKey, read_at: DateTime<Utc>) -> Result<(), CacheError> {
        let Some(mut message) = self.get_message(key)? else {
            return Ok(());
        };
        message.status = MessageStatus::Read;
        message.read_at = Some(read_at);
        self.upsert_message(&message)
    }

    pub fn delete_message(&self, key: &MessageKey) -> Result<bool, CacheError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "DELETE FROM messages WHERE chat_id = ?1 AND message_id = ?2",
            params![key.chat_id, key.message_id],
        )?;
        Ok(changed > 0)
    }

    /// Keys of messages past their retention threshold: read before
    /// `read_cutoff`, or never read and sent before `unread_cutoff`.
    pub fn expired_messages(
        &self,
        read_cutoff: DateTime<Utc>,
        unread_cutoff: DateTime<Utc>,
    ) -> Result<Vec<MessageKey>, CacheError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT chat_id, message_id FROM messages
             WHERE (read_at IS NOT NULL AND read_at < ?1)
                OR (read_at IS NULL AND sent_at < ?2)
             ORDER BY sent_at ASC",
        )?;
        let rows = stmt.query_map(params![ts(&read_cutoff), ts(&unread_cutoff)], |row| {
            Ok(MessageKey {
                chat_id: row.get(0)?,
                message_id: row.get(1)?,
            })
        })?;

        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }

    // ---- chats ----

    pub fn upsert_chat(&self, chat: &Chat) -> Result<(), CacheError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO chats (chat_id, payload, cached_at) VALUES (?1, ?2, ?3)",
            params![chat.id, serde_json::to_string(chat)?, ts(&Utc::now())],
        )?;
        Ok(())
    }

    pub fn chats(&self) -> Result<Vec<Chat>, CacheError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT payload FROM chats ORDER BY chat_id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut chats = Vec::new();
        for row in rows {
            chats.push(serde_json::from_str(&row?)?);
        }
        Ok(chats)
    }

    // ---- media ----

    pub fn record_media(&self, record: &MediaRecord) -> Result<(), CacheError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO media
                (chat_id, message_id, object_path, local_path, size_bytes, cached_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.key.chat_id,
                record.key.message_id,
                record.object_path,
                record.local_path,
                record.size_bytes as i64,
                ts(&Utc::now()),
            ],
        )?;
        Ok(())
    }

    pub fn media_for_message(&self, key: &MessageKey) -> Result<Option<MediaRecord>, CacheError> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                "SELECT object_path, local_path, size_bytes FROM media
                 WHERE chat_id = ?1 AND message_id = ?2",
                params![key.chat_id, key.message_id],
                |row| {
                    Ok(MediaRecord {
                        key: key.clone(),
                        object_path: row.get(0)?,
                        local_path: row.get(1)?,
                        size_bytes: row.get::<_, i64>(2)? as u64,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    pub fn delete_media(&self, key: &MessageKey) -> Result<bool, CacheError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "DELETE FROM media WHERE chat_id = ?1 AND message_id = ?2",
            params![key.chat_id, key.message_id],
        )?;
        Ok(changed > 0)
    }

    // ---- sync queue ----

    /// Appends an op to the queue and returns its id. The queue is unbounded
    /// and drained FIFO.
    pub fn enqueue(&self, op: &PendingOp) -> Result<i64, CacheError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO sync_queue (op, attempts, queued_at) VALUES (?1, 0, ?2)",
            params![serde_json::to_string(op)?, ts(&Utc::now())],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// All queued ops in insertion order.
    pub fn pending_ops(&self) -> Result<Vec<QueuedOp>, CacheError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT id, op, attempts FROM sync_queue ORDER BY id ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut ops = Vec::new();
        for row in rows {
            let (id, op_json, attempts) = row?;
            ops.push(QueuedOp {
                id,
                op: serde_json::from_str(&op_json)?,
                attempts: attempts as u32,
            });
        }
        Ok(ops)
    }

    /// Increments the persisted attempt count and returns the new value.
    pub fn bump_attempts(&self, id: i64) -> Result<u32, CacheError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE sync_queue SET attempts = attempts + 1 WHERE id = ?1",
            params![id],
        )?;
        let attempts: i64 = conn.query_row(
            "SELECT attempts FROM sync_queue WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(attempts as u32)
    }

    pub fn remove_op(&self, id: i64) -> Result<(), CacheError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM sync_queue WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn queue_len(&self) -> Result<usize, CacheError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM sync_queue", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
