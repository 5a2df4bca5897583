use chrono::Duration as ChronoDuration;
use std::time::Duration;

/// Tunables for the background lifecycle.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How often the sync worker checks connectivity and drains the queue.
    pub sync_interval: Duration,
    /// Consecutive failures before a queued op is dropped.
    pub sync_max_retries: u32,
    /// Linear backoff step between attempts on the same op.
    pub sync_backoff_step: Duration,

    /// Scheduled-message sweep cadence.
    pub schedule_interval: Duration,
    /// Failures before a scheduled message is marked permanently failed.
    pub schedule_max_retries: u32,

    /// Cleanup sweep cadence.
    pub cleanup_interval: Duration,
    /// Whole-batch retries within one cleanup sweep.
    pub cleanup_max_retries: u32,
    /// A read message older than this (since `read_at`) is deleted.
    pub read_ttl: ChronoDuration,
    /// An unread message older than this (since `sent_at`) is deleted.
    pub unread_ttl: ChronoDuration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(30),
            sync_max_retries: 3,
            sync_backoff_step: Duration::from_secs(2),
            schedule_interval: Duration::from_secs(60),
            schedule_max_retries: 3,
            cleanup_interval: Duration::from_secs(6 * 60 * 60),
            cleanup_max_retries: 3,
            read_ttl: ChronoDuration::days(3),
            unread_ttl: ChronoDuration::days(7),
        }
    }
}
