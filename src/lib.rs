//! A headless Firebase chat engine: Firestore-backed chats with an offline
//! SQLite cache, a sync queue for writes made without connectivity, FCM push
//! fan-out, Cloud Storage attachments, scheduled and recurring messages, and
//! a retention sweep for old ones.
//!
//! [`ChatApp`] is the entry point: give it a service account key and a cache
//! location, then hand out service clients and spawn the background workers.

pub mod auth;
pub mod cache;
pub mod chat;
pub mod cleanup;
pub mod config;
pub mod core;
pub mod firestore;
pub mod media;
pub mod messaging;
pub mod permissions;
pub mod scheduler;
pub mod sync;
pub mod types;

#[cfg(test)]
pub(crate) mod testutil;

use auth::verifier::IdTokenVerifier;
use auth::AuthClient;
use cache::{CacheError, LocalCache};
use chat::ChatService;
use cleanup::CleanupWorker;
use config::EngineConfig;
use crate::core::middleware::AuthMiddleware;
use firestore::FirestoreClient;
use media::MediaStore;
use messaging::PushClient;
use permissions::CapabilityGate;
use scheduler::ScheduleWorker;
use std::path::Path;
use std::sync::Arc;
use sync::{Connectivity, HttpProbe, SyncWorker};
use yup_oauth2::ServiceAccountKey;

/// Shared root for all service clients and workers.
pub struct ChatApp {
    middleware: AuthMiddleware,
    cache: LocalCache,
    connectivity: Arc<dyn Connectivity>,
    config: EngineConfig,
}

impl ChatApp {
    /// Creates the app with an HTTP connectivity probe and default tuning.
    pub fn new(key: ServiceAccountKey, cache_path: Option<&Path>) -> Result<Self, CacheError> {
        Self::with_parts(
            key,
            cache_path,
            Arc::new(HttpProbe::new()),
            EngineConfig::default(),
        )
    }

    /// Full-control constructor for hosts that bring their own connectivity
    /// signal or tuning.
    pub fn with_parts(
        key: ServiceAccountKey,
        cache_path: Option<&Path>,
        connectivity: Arc<dyn Connectivity>,
        config: EngineConfig,
    ) -> Result<Self, CacheError> {
        Ok(Self {
            middleware: AuthMiddleware::new(key),
            cache: LocalCache::open(cache_path)?,
            connectivity,
            config,
        })
    }

    pub fn firestore(&self) -> FirestoreClient {
        FirestoreClient::new(self.middleware.clone())
    }

    pub fn messaging(&self) -> PushClient {
        PushClient::new(self.middleware.clone())
    }

    pub fn media(&self) -> MediaStore {
        MediaStore::new(self.middleware.clone(), None)
    }

    pub fn auth(&self) -> AuthClient {
        AuthClient::new(self.middleware.clone())
    }

    pub fn token_verifier(&self) -> IdTokenVerifier {
        IdTokenVerifier::new(self.middleware.project_id())
    }

    pub fn cache(&self) -> LocalCache {
        self.cache.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The chat surface, wired to this app's cache and connectivity probe.
    pub fn chat(&self, gate: Arc<dyn CapabilityGate>) -> ChatService {
        ChatService::new(
            self.firestore(),
            self.messaging(),
            self.media(),
            self.cache(),
            self.connectivity.clone(),
            gate,
        )
    }

    /// The sync-queue drain worker; spawn its `run` on the runtime.
    pub fn sync_worker(&self) -> SyncWorker {
        SyncWorker::new(
            self.firestore(),
            self.media(),
            self.cache(),
            self.connectivity.clone(),
            self.config.clone(),
        )
    }

    /// The scheduled-message delivery worker.
    pub fn schedule_worker(&self) -> ScheduleWorker {
        ScheduleWorker::new(self.firestore(), self.config.clone())
    }

    /// The retention sweep worker.
    pub fn cleanup_worker(&self) -> CleanupWorker {
        CleanupWorker::new(
            self.firestore(),
            self.media(),
            self.cache(),
            self.config.clone(),
        )
    }
}
