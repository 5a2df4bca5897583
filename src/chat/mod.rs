//! The chat engine's front door.
//!
//! [`ChatService`] ties the Firestore, FCM, and Cloud Storage clients to the
//! offline cache: reads come from the cache and are refreshed from the
//! server when online, writes go remote when the network is up and into the
//! sync queue when it is not. Push fan-out to the other chat members is best
//! effort and never fails the write that triggered it.


use crate::cache::{CacheError, LocalCache, MediaRecord, MessageKey};
use crate::firestore::models::FieldOperator;
use crate::firestore::query::Query;
use crate::firestore::value::fields_to_serde_value;
use crate::firestore::{FirestoreClient, FirestoreError};
use crate::media::{MediaError, MediaStore};
use crate::messaging::models::PushMessage;
use crate::messaging::{PushClient, PushError};
use crate::permissions::{Capability, CapabilityGate};
use crate::sync::{Connectivity, PendingOp};
use crate::types::{
    AdminLogEntry, Chat, ChatMessage, DeviceToken, FriendRequest, FriendRequestStatus, MediaKind,
    MediaAttachment, MessageStatus, Report, UserProfile,
};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error(transparent)]
    Firestore(#[from] FirestoreError),
    #[error(transparent)]
    Push(#[from] PushError),
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("local media file unreadable: {0}")]
    Io(#[from] std::io::Error),
    #[error("permission denied for {0:?}")]
    PermissionDenied(Capability),
    #[error("not found: {0}")]
    NotFound(String),
}

fn message_path(chat_id: &str, message_id: &str) -> String {
    format!("chats/{}/messages/{}", chat_id, message_id)
}

/// Chat operations over the cache and the Google backends.
pub struct ChatService {
    firestore: FirestoreClient,
    push: PushClient,
    media: MediaStore,
    cache: LocalCache,
    connectivity: Arc<dyn Connectivity>,
    gate: Arc<dyn CapabilityGate>,
}

impl ChatService {
    pub fn new(
        firestore: FirestoreClient,
        push: PushClient,
        media: MediaStore,
        cache: LocalCache,
        connectivity: Arc<dyn Connectivity>,
        gate: Arc<dyn CapabilityGate>,
    ) -> Self {
        Self {
            firestore,
            push,
            media,
            cache,
            connectivity,
            gate,
        }
    }

    // ---- chats ----

    pub async fn create_chat(&self, members: &[&str]) -> Result<Chat, ChatError> {
        let chat = Chat {
            id: uuid::Uuid::new_v4().to_string(),
            members: members.iter().map(|m| m.to_string()).collect(),
            created_at: Utc::now(),
            last_message_at: None,
            last_message_preview: None,
        };

        self.firestore
            .doc(&format!("chats/{}", chat.id))
            .set(&chat)
            .await?;
        self.cache.upsert_chat(&chat)?;
        Ok(chat)
    }

    /// The chats `uid` belongs to, refreshed from the server when online.
    pub async fn chats_for_user(&self, uid: &str) -> Result<Vec<Chat>, ChatError> {
        if self.connectivity.is_online().await {
            let query =
                Query::collection("chats").filter("members", FieldOperator::ArrayContains, uid)?;
            match self.firestore.run_query(query).await {
                Ok(hits) => {
                    for hit in hits {
                        match hit.data::<Chat>() {
                            Ok(chat) => self.cache.upsert_chat(&chat)?,
                            Err(e) => {
                                tracing::warn!(doc = hit.relative_path(), error = %e, "malformed chat, skipping")
                            }
                        }
                    }
                }
                Err(e) if e.is_transient() => {
                    tracing::debug!(error = %e, "chat refresh failed, serving cache");
                }
                Err(e) => return Err(e.into()),
            }
        }
        // The cache holds every chat this device has seen; keep only the
        // ones `uid` is a member of.
        let mut chats = self.cache.chats()?;
        chats.retain(|chat| chat.members.iter().any(|m| m == uid));
        Ok(chats)
    }

    // ---- messages ----

    /// Sends a message: straight to Firestore when online, into the cache
    /// and sync queue as `Pending` otherwise. A transient delivery failure
    /// also falls back to the queue instead of surfacing an error.
    pub async fn send_message(&self, mut message: ChatMessage) -> Result<ChatMessage, ChatError> {
        if !self.connectivity.is_online().await {
            return self.queue_message(message).await;
        }

        message.status = MessageStatus::Sent;
        match self
            .firestore
            .doc(&message_path(&message.chat_id, &message.id))
            .set(&message)
            .await
        {
            Ok(()) => {
                self.cache.upsert_message(&message)?;
                self.touch_chat(&message).await;
                self.notify_members(&message).await;
                Ok(message)
            }
            Err(e) if e.is_transient() => {
                tracing::debug!(error = %e, "delivery failed, queueing");
                self.queue_message(message).await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn queue_message(&self, mut message: ChatMessage) -> Result<ChatMessage, ChatError> {
        message.status = MessageStatus::Pending;
        self.cache.upsert_message(&message)?;
        self.cache.enqueue(&PendingOp::SendMessage {
            message: message.clone(),
        })?;
        tracing::debug!(chat = %message.chat_id, message = %message.id, "message queued");
        Ok(message)
    }

    /// The newest `limit` messages of a chat, cache first.
    pub async fn messages(
        &self,
        chat_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        if self.connectivity.is_online().await {
            match self
                .firestore
                .collection(&format!("chats/{}/messages", chat_id))
                .list()
                .await
            {
                Ok(page) => {
                    for doc in page.documents {
                        let parsed = fields_to_serde_value(doc.fields)
                            .and_then(|v| Ok(serde_json::from_value::<ChatMessage>(v)?));
                        match parsed {
                            Ok(message) => self.cache.upsert_message(&message)?,
                            Err(e) => {
                                tracing::warn!(doc = %doc.name, error = %e, "malformed message, skipping")
                            }
                        }
                    }
                }
                Err(e) if e.is_transient() => {
                    tracing::debug!(error = %e, "message refresh failed, serving cache");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(self.cache.messages_for_chat(chat_id, limit)?)
    }

    /// Marks a message read now, locally always and remotely when possible.
    pub async fn mark_read(&self, key: &MessageKey) -> Result<(), ChatError> {
        let read_at = Utc::now();
        self.cache.mark_read(key, read_at)?;

        let op = PendingOp::MarkRead {
            chat_id: key.chat_id.clone(),
            message_id: key.message_id.clone(),
            read_at,
        };

        if !self.connectivity.is_online().await {
            self.cache.enqueue(&op)?;
            return Ok(());
        }

        match self
            .firestore
            .doc(&message_path(&key.chat_id, &key.message_id))
            .update(
                &serde_json::json!({ "status": MessageStatus::Read, "readAt": read_at }),
                &["status", "readAt"],
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_transient() => {
                tracing::debug!(error = %e, "read receipt failed, queueing");
                self.cache.enqueue(&op)?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Deletes a message locally and remotely (or queues the remote delete).
    pub async fn delete_message(&self, key: &MessageKey) -> Result<(), ChatError> {
        if let Some(record) = self.cache.media_for_message(key)? {
            if self.connectivity.is_online().await {
                if let Err(e) = self.media.delete(&record.object_path).await {
                    tracing::warn!(object = %record.object_path, error = %e, "media delete failed");
                }
            }
            self.cache.delete_media(key)?;
        }
        self.cache.delete_message(key)?;

        let op = PendingOp::DeleteMessage {
            chat_id: key.chat_id.clone(),
            message_id: key.message_id.clone(),
        };

        if !self.connectivity.is_online().await {
            self.cache.enqueue(&op)?;
            return Ok(());
        }

        match self
            .firestore
            .doc(&message_path(&key.chat_id, &key.message_id))
            .delete()
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_transient() => {
                self.cache.enqueue(&op)?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    // ---- media ----

    /// Attaches a local file to an already-sent (or queued) message.
    ///
    /// `source` names the capability that produced the file (camera capture
    /// vs photo library). Offline, the blob upload and the document update
    /// both go through the sync queue.
    pub async fn attach_media(
        &self,
        key: &MessageKey,
        local_path: &Path,
        kind: MediaKind,
        mime_type: &str,
        source: Capability,
    ) -> Result<MediaAttachment, ChatError> {
        if !self.gate.request(source).await.is_granted() {
            return Err(ChatError::PermissionDenied(source));
        }

        let size_bytes = tokio::fs::metadata(local_path).await?.len();
        let object_path = MediaStore::object_path(&key.chat_id, &key.message_id);
        let attachment = MediaAttachment {
            object_path: object_path.clone(),
            kind,
            mime_type: mime_type.to_string(),
            size_bytes,
        };

        let cached = self.cache.get_message(key)?;
        let mut message = cached.ok_or_else(|| {
            ChatError::NotFound(format!("{}/{}", key.chat_id, key.message_id))
        })?;
        message.media = Some(attachment.clone());
        self.cache.upsert_message(&message)?;
        self.cache.record_media(&MediaRecord {
            key: key.clone(),
            object_path: object_path.clone(),
            local_path: Some(local_path.to_string_lossy().into_owned()),
            size_bytes,
        })?;

        if self.connectivity.is_online().await {
            let bytes = tokio::fs::read(local_path).await?;
            self.media.upload(&object_path, bytes, mime_type).await?;
            self.firestore
                .doc(&message_path(&key.chat_id, &key.message_id))
                .update(&serde_json::json!({ "media": attachment }), &["media"])
                .await?;
        } else {
            self.cache.enqueue(&PendingOp::UploadMedia {
                object_path,
                local_path: local_path.to_string_lossy().into_owned(),
                mime_type: mime_type.to_string(),
            })?;
            // Full document rewrite carries the media field once online.
            self.cache.enqueue(&PendingOp::SendMessage { message })?;
        }

        Ok(attachment)
    }

    // ---- friend requests ----

    pub async fn send_friend_request(
        &self,
        from_uid: &str,
        to_uid: &str,
    ) -> Result<FriendRequest, ChatError> {
        let request = FriendRequest {
            id: uuid::Uuid::new_v4().to_string(),
            from_uid: from_uid.to_string(),
            to_uid: to_uid.to_string(),
            status: FriendRequestStatus::Pending,
            sent_at: Utc::now(),
            responded_at: None,
        };

        self.firestore
            .doc(&format!("friend_requests/{}", request.id))
            .set(&request)
            .await?;

        let from_name = self.display_name(from_uid).await;
        for device in self.device_tokens(to_uid).await.unwrap_or_default() {
            let alert = PushMessage::friend_request_alert(&device.token, &from_name, &request.id);
            if let Err(e) = self.push.send(&alert).await {
                tracing::warn!(to = %to_uid, error = %e, "friend request push failed");
            }
        }

        Ok(request)
    }

    /// Accepts or declines a request. Accepting opens a chat between the two
    /// users and returns it.
    pub async fn respond_to_friend_request(
        &self,
        request_id: &str,
        accept: bool,
    ) -> Result<Option<Chat>, ChatError> {
        let path = format!("friend_requests/{}", request_id);
        let request: FriendRequest = self
            .firestore
            .doc(&path)
            .get()
            .await?
            .ok_or_else(|| ChatError::NotFound(path.clone()))?;

        let status = if accept {
            FriendRequestStatus::Accepted
        } else {
            FriendRequestStatus::Declined
        };
        self.firestore
            .doc(&path)
            .update(
                &serde_json::json!({ "status": status, "respondedAt": Utc::now() }),
                &["status", "respondedAt"],
            )
            .await?;

        if accept {
            let chat = self
                .create_chat(&[request.from_uid.as_str(), request.to_uid.as_str()])
                .await?;
            Ok(Some(chat))
        } else {
            Ok(None)
        }
    }

    // ---- moderation ----

    /// Files an abuse report and leaves a trace in the admin log.
    pub async fn file_report(&self, report: Report) -> Result<(), ChatError> {
        self.firestore
            .doc(&format!("reports/{}", report.id))
            .set(&report)
            .await?;

        let entry = AdminLogEntry {
            action: "report_filed".to_string(),
            actor_uid: report.reporter_uid.clone(),
            subject: Some(report.subject_uid.clone()),
            at: Utc::now(),
        };
        self.firestore.collection("admin_logs").add(&entry).await?;
        Ok(())
    }

    // ---- device tokens ----

    pub async fn register_device(&self, token: DeviceToken) -> Result<(), ChatError> {
        self.firestore.collection("device_tokens").add(&token).await?;
        Ok(())
    }

    pub async fn unregister_device(&self, token: &str) -> Result<(), ChatError> {
        let query =
            Query::collection("device_tokens").filter("token", FieldOperator::Equal, token)?;
        for hit in self.firestore.run_query(query).await? {
            self.firestore.doc(hit.relative_path()).delete().await?;
        }
        Ok(())
    }

    async fn device_tokens(&self, uid: &str) -> Result<Vec<DeviceToken>, ChatError> {
        let query =
            Query::collection("device_tokens").filter("userId", FieldOperator::Equal, uid)?;
        let mut tokens = Vec::new();
        for hit in self.firestore.run_query(query).await? {
            match hit.data::<DeviceToken>() {
                Ok(token) => tokens.push(token),
                Err(e) => {
                    tracing::warn!(doc = hit.relative_path(), error = %e, "malformed device token")
                }
            }
        }
        Ok(tokens)
    }

    // ---- notification fan-out ----

    async fn display_name(&self, uid: &str) -> String {
        match self
            .firestore
            .doc(&format!("users/{}", uid))
            .get::<UserProfile>()
            .await
        {
            Ok(Some(profile)) => profile.display_name,
            _ => uid.to_string(),
        }
    }

    /// Updates the chat's last-message summary fields.
    async fn touch_chat(&self, message: &ChatMessage) {
        let preview = message.body.clone().unwrap_or_else(|| "\u{1F4CE}".to_string());
        let result = self
            .firestore
            .doc(&format!("chats/{}", message.chat_id))
            .update(
                &serde_json::json!({
                    "lastMessageAt": message.sent_at,
                    "lastMessagePreview": preview,
                }),
                &["lastMessageAt", "lastMessagePreview"],
            )
            .await;
        if let Err(e) = result {
            tracing::warn!(chat = %message.chat_id, error = %e, "chat summary update failed");
        }
    }

    /// Pushes an alert to every other member's devices. Failures are logged
    /// and swallowed; a notification must never fail the send.
    async fn notify_members(&self, message: &ChatMessage) {
        let chat: Chat = match self
            .firestore
            .doc(&format!("chats/{}", message.chat_id))
            .get()
            .await
        {
            Ok(Some(chat)) => chat,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(chat = %message.chat_id, error = %e, "fan-out chat lookup failed");
                return;
            }
        };

        let sender_name = self.display_name(&message.sender_id).await;
        let preview = message.body.as_deref().unwrap_or("\u{1F4CE}");

        for member in chat.members.iter().filter(|m| **m != message.sender_id) {
            let devices = match self.device_tokens(member).await {
                Ok(devices) => devices,
                Err(e) => {
                    tracing::warn!(member = %member, error = %e, "fan-out token lookup failed");
                    continue;
                }
            };
            for device in devices {
                let alert = PushMessage::message_alert(
                    &device.token,
                    &sender_name,
                    &message.chat_id,
                    preview,
                );
                if let Err(e) = self.push.send(&alert).await {
                    tracing::warn!(member = %member, error = %e, "push failed");
                }
            }
        }
    }
}
