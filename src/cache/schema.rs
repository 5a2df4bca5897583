//! SQLite schema for the offline cache.

/// Bump when the shape below changes and add a migration arm in
/// `LocalCache::init_schema`.
pub const SCHEMA_VERSION: i32 = 1;

/// Composite keys are real columns; timestamps are RFC 3339 UTC strings,
/// which compare lexicographically in chronological order.
pub const CREATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    chat_id    TEXT NOT NULL,
    message_id TEXT NOT NULL,
    payload    TEXT NOT NULL,
    status     TEXT NOT NULL,
    sent_at    TEXT NOT NULL,
    read_at    TEXT,
    cached_at  TEXT NOT NULL,
    PRIMARY KEY (chat_id, message_id)
);

CREATE INDEX IF NOT EXISTS idx_messages_sent_at ON messages (sent_at);
CREATE INDEX IF NOT EXISTS idx_messages_read_at ON messages (read_at);

CREATE TABLE IF NOT EXISTS chats (
    chat_id   TEXT PRIMARY KEY,
    payload   TEXT NOT NULL,
    cached_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS media (
    chat_id     TEXT NOT NULL,
    message_id  TEXT NOT NULL,
    object_path TEXT NOT NULL,
    local_path  TEXT,
    size_bytes  INTEGER NOT NULL DEFAULT 0,
    cached_at   TEXT NOT NULL,
    PRIMARY KEY (chat_id, message_id)
);

CREATE TABLE IF NOT EXISTS sync_queue (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    op        TEXT NOT NULL,
    attempts  INTEGER NOT NULL DEFAULT 0,
    queued_at TEXT NOT NULL
);
";
