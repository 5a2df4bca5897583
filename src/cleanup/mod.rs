//! Retention sweep.
//!
//! Every few hours the worker collects cached messages past their TTL and
//! deletes each one remotely and locally: the Firestore document, the
//! attachment object in Cloud Storage if one was recorded, then the cache
//! rows. Keys that fail get the whole-batch treatment again, up to
//! `cleanup_max_retries` passes per sweep; whatever is left stays cached and
//! is picked up by the next sweep.

#[cfg(test)]
mod tests;

use crate::cache::{CacheError, LocalCache, MessageKey};
use crate::config::EngineConfig;
use crate::firestore::FirestoreClient;
use crate::media::MediaStore;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

#[derive(Error, Debug)]
enum PurgeError {
    #[error(transparent)]
    Firestore(#[from] crate::firestore::FirestoreError),
    #[error(transparent)]
    Media(#[from] crate::media::MediaError),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Deletes expired messages remotely and locally.
pub struct CleanupWorker {
    firestore: FirestoreClient,
    media: MediaStore,
    cache: LocalCache,
    config: EngineConfig,
}

impl CleanupWorker {
    pub fn new(
        firestore: FirestoreClient,
        media: MediaStore,
        cache: LocalCache,
        config: EngineConfig,
    ) -> Self {
        Self {
            firestore,
            media,
            cache,
            config,
        }
    }

    /// Runs until the shutdown signal fires.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.cleanup_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.sweep(Utc::now()).await {
                        Ok(0) => {}
                        Ok(deleted) => tracing::info!(deleted, "cleanup sweep done"),
                        Err(e) => tracing::error!(error = %e, "cleanup sweep failed"),
                    }
                }
                _ = shutdown.changed() => {
                    tracing::info!("cleanup worker stopping");
                    break;
                }
            }
        }
    }

    /// One sweep at `now`; returns how many messages were purged. Public so
    /// callers (and tests) can sweep without waiting for the interval.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<u32, CacheError> {
        let mut batch = self.cache.expired_messages(
            now - self.config.read_ttl,
            now - self.config.unread_ttl,
        )?;
        if batch.is_empty() {
            return Ok(0);
        }
        tracing::debug!(expired = batch.len(), "cleanup sweep starting");

        let mut deleted = 0;
        let mut attempt = 0;
        while !batch.is_empty() {
            attempt += 1;
            if attempt > self.config.cleanup_max_retries {
                tracing::warn!(
                    remaining = batch.len(),
                    "cleanup giving up until the next sweep"
                );
                break;
            }

            let mut failed = Vec::new();
            for key in std::mem::take(&mut batch) {
                match self.purge(&key).await {
                    Ok(()) => deleted += 1,
                    Err(e) => {
                        tracing::warn!(
                            chat = %key.chat_id,
                            message = %key.message_id,
                            error = %e,
                            "purge failed"
                        );
                        failed.push(key);
                    }
                }
            }
            batch = failed;
        }

        Ok(deleted)
    }

    /// Remote first so a crash leaves the cache row behind to retry from.
    async fn purge(&self, key: &MessageKey) -> Result<(), PurgeError> {
        self.firestore
            .doc(&format!("chats/{}/messages/{}", key.chat_id, key.message_id))
            .delete()
            .await?;

        if let Some(record) = self.cache.media_for_message(key)? {
            self.media.delete(&record.object_path).await?;
            self.cache.delete_media(key)?;
        }

        self.cache.delete_message(key)?;
        Ok(())
    }
}
