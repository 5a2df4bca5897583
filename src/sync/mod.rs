//! Offline sync queue worker.
//!
//! Writes made while the device is offline land in the cache's sync queue;
//! this worker polls connectivity on a fixed interval and, once online,
//! drains the queue FIFO against Firestore and Cloud Storage. Each item gets
//! `sync_max_retries` consecutive attempts with a linear backoff between
//! them and is dropped afterwards. There is no ordering guarantee across
//! items and no idempotency key; remote state is last write wins.


use crate::cache::{CacheError, LocalCache};
use crate::config::EngineConfig;
use crate::firestore::FirestoreClient;
use crate::media::MediaStore;
use crate::types::{ChatMessage, MessageStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// A write waiting for connectivity, serialized into the queue as tagged
/// JSON.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PendingOp {
    SendMessage {
        message: ChatMessage,
    },
    MarkRead {
        chat_id: String,
        message_id: String,
        read_at: DateTime<Utc>,
    },
    DeleteMessage {
        chat_id: String,
        message_id: String,
    },
    UploadMedia {
        object_path: String,
        local_path: String,
        mime_type: String,
    },
}

/// Reachability check the worker runs before each drain and between items.
#[async_trait::async_trait]
pub trait Connectivity: Send + Sync {
    async fn is_online(&self) -> bool;
}

const PROBE_URL: &str = "http://connectivitycheck.gstatic.com/generate_204";

/// Probes a generate-204 endpoint with a short timeout.
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new() -> Self {
        Self::new_with_url(PROBE_URL.to_string())
    }

    pub fn new_with_url(url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self { client, url }
    }
}

impl Default for HttpProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Connectivity for HttpProbe {
    async fn is_online(&self) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

#[derive(Error, Debug)]
enum ApplyError {
    #[error(transparent)]
    Firestore(#[from] crate::firestore::FirestoreError),
    #[error(transparent)]
    Media(#[from] crate::media::MediaError),
    #[error("local media file unreadable: {0}")]
    Io(#[from] std::io::Error),
}

/// Drains the offline queue when connectivity returns.
pub struct SyncWorker {
    firestore: FirestoreClient,
    media: MediaStore,
    cache: LocalCache,
    connectivity: Arc<dyn Connectivity>,
    config: EngineConfig,
}

impl SyncWorker {
    pub fn new(
        firestore: FirestoreClient,
        media: MediaStore,
        cache: LocalCache,
        connectivity: Arc<dyn Connectivity>,
        config: EngineConfig,
    ) -> Self {
        Self {
            firestore,
            media,
            cache,
            connectivity,
            config,
        }
    }

    /// Runs until the shutdown signal fires.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.sync_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if !self.connectivity.is_online().await {
                        tracing::debug!("offline, skipping sync drain");
                        continue;
                    }
                    if let Err(e) = self.drain().await {
                        tracing::error!(error = %e, "sync drain aborted");
                    }
                }
                _ = shutdown.changed() => {
                    tracing::info!("sync worker stopping");
                    break;
                }
            }
        }
    }

    /// One pass over the queue. Public so callers (and tests) can force a
    /// drain without waiting for the interval.
    pub async fn drain(&self) -> Result<(), CacheError> {
        for queued in self.cache.pending_ops()? {
            // Connectivity can drop mid-drain; leave the rest queued.
            if !self.connectivity.is_online().await {
                tracing::debug!("went offline mid-drain, stopping");
                break;
            }

            loop {
                match self.apply(&queued.op).await {
                    Ok(()) => {
                        self.cache.remove_op(queued.id)?;
                        break;
                    }
                    Err(e) => {
                        let attempts = self.cache.bump_attempts(queued.id)?;
                        tracing::warn!(
                            op_id = queued.id,
                            attempts,
                            error = %e,
                            "sync op failed"
                        );
                        if attempts >= self.config.sync_max_retries {
                            tracing::warn!(op_id = queued.id, "dropping op after max retries");
                            self.cache.remove_op(queued.id)?;
                            break;
                        }
                        tokio::time::sleep(self.config.sync_backoff_step * attempts).await;
                    }
                }
            }
        }
        Ok(())
    }

    async fn apply(&self, op: &PendingOp) -> Result<(), ApplyError> {
        match op {
            PendingOp::SendMessage { message } => {
                let mut message = message.clone();
                message.status = MessageStatus::Sent;
                self.firestore
                    .doc(&format!("chats/{}/messages/{}", message.chat_id, message.id))
                    .set(&message)
                    .await?;
                // Reflect the delivered status locally; ignore a cache miss.
                if let Err(e) = self.cache.upsert_message(&message) {
                    tracing::warn!(error = %e, "failed to update cached message status");
                }
                Ok(())
            }
            PendingOp::MarkRead {
                chat_id,
                message_id,
                read_at,
            } => {
                self.firestore
                    .doc(&format!("chats/{}/messages/{}", chat_id, message_id))
                    .update(
                        &serde_json::json!({
                            "status": MessageStatus::Read,
                            "readAt": read_at,
                        }),
                        &["status", "readAt"],
                    )
                    .await?;
                Ok(())
            }
            PendingOp::DeleteMessage {
                chat_id,
                message_id,
            } => {
                self.firestore
                    .doc(&format!("chats/{}/messages/{}", chat_id, message_id))
                    .delete()
                    .await?;
                Ok(())
            }
            PendingOp::UploadMedia {
                object_path,
                local_path,
                mime_type,
            } => {
                let bytes = tokio::fs::read(local_path).await?;
                self.media.upload(object_path, bytes, mime_type).await?;
                Ok(())
            }
        }
    }
}
