//! Typed domain objects for everything the app persists.
//!
//! Every document shape is a struct with camelCase wire names, so two
//! differently-shaped documents cannot coexist silently under one
//! collection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A document in the `users` collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub uid: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_line: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A document in the `chats` collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    pub members: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message_preview: Option<String>,
}

/// Delivery state of a message, local status included.
///
/// `Pending` only ever exists locally: it marks a message written to the
/// cache while offline and waiting in the sync queue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum MessageStatus {
    Pending,
    Sent,
    Delivered,
    Read,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    File,
}

/// Metadata for a stored attachment. `object_path` is the structured Cloud
/// Storage path (`chats/{chat_id}/media/{message_id}`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MediaAttachment {
    pub object_path: String,
    pub kind: MediaKind,
    pub mime_type: String,
    pub size_bytes: u64,
}

/// A document in `chats/{chat_id}/messages`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaAttachment>,
    pub status: MessageStatus,
    pub sent_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
}

impl ChatMessage {
    /// A plain text message with a fresh id, stamped now.
    pub fn text(chat_id: &str, sender_id: &str, body: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            chat_id: chat_id.to_string(),
            sender_id: sender_id.to_string(),
            body: Some(body.to_string()),
            media: None,
            status: MessageStatus::Pending,
            sent_at: Utc::now(),
            read_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FriendRequestStatus {
    Pending,
    Accepted,
    Declined,
}

/// A document in the `friend_requests` collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequest {
    pub id: String,
    pub from_uid: String,
    pub to_uid: String,
    pub status: FriendRequestStatus,
    pub sent_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub responded_at: Option<DateTime<Utc>>,
}

/// A document in the `reports` collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: String,
    pub reporter_uid: String,
    pub subject_uid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub reason: String,
    pub filed_at: DateTime<Utc>,
}

/// A document in the `admin_logs` collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AdminLogEntry {
    pub action: String,
    pub actor_uid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DevicePlatform {
    Android,
    Ios,
    Web,
}

/// A document in the `device_tokens` collection, one per FCM registration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceToken {
    pub token: String,
    pub user_id: String,
    pub platform: DevicePlatform,
    pub registered_at: DateTime<Utc>,
}

/// How a scheduled message repeats after each delivery.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Recurrence {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ScheduleStatus {
    Pending,
    Delivered,
    Failed,
}

/// A document in the `scheduled_messages` collection.
///
/// `anchor_day` remembers the day-of-month the schedule was created with, so
/// a monthly schedule anchored on the 31st delivers on Feb 29 and then again
/// on Mar 31 instead of drifting to the 29th forever.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledMessage {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaAttachment>,
    #[serde(with = "ts_micros")]
    pub scheduled_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<Recurrence>,
    pub anchor_day: u32,
    pub status: ScheduleStatus,
    pub retries: u32,
}

/// Serializes with a fixed six-digit fraction so the stored strings and the
/// scheduler's cutoff compare lexicographically in chronological order
/// regardless of subsecond precision.
pub(crate) mod ts_micros {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::Micros, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

impl ScheduledMessage {
    pub fn once(chat_id: &str, sender_id: &str, body: &str, at: DateTime<Utc>) -> Self {
        Self::recurring_inner(chat_id, sender_id, body, at, None)
    }

    pub fn recurring(
        chat_id: &str,
        sender_id: &str,
        body: &str,
        at: DateTime<Utc>,
        recurrence: Recurrence,
    ) -> Self {
        Self::recurring_inner(chat_id, sender_id, body, at, Some(recurrence))
    }

    fn recurring_inner(
        chat_id: &str,
        sender_id: &str,
        body: &str,
        at: DateTime<Utc>,
        recurrence: Option<Recurrence>,
    ) -> Self {
        use chrono::Datelike;
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            chat_id: chat_id.to_string(),
            sender_id: sender_id.to_string(),
            body: body.to_string(),
            media: None,
            scheduled_at: at,
            recurrence,
            anchor_day: at.day(),
            status: ScheduleStatus::Pending,
            retries: 0,
        }
    }
}
