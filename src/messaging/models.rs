use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A push message for the FCM v1 API.
///
/// Exactly one of `token`, `topic`, or `condition` must be set; `send`
/// validates this before any request goes out.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    /// Registration token of a single device.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Topic name, without the `/topics/` prefix.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,

    /// Topic condition, e.g. `"'a' in topics && 'b' in topics"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    /// Visible notification content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<PushNotification>,

    /// Arbitrary key/value payload delivered to the app.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PushNotification {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl PushMessage {
    /// The alert sent to a recipient device when a chat message arrives.
    /// The data payload lets the app route straight to the chat.
    pub fn message_alert(token: &str, sender_name: &str, chat_id: &str, preview: &str) -> Self {
        let mut data = HashMap::new();
        data.insert("kind".to_string(), "message".to_string());
        data.insert("chatId".to_string(), chat_id.to_string());

        Self {
            token: Some(token.to_string()),
            notification: Some(PushNotification {
                title: Some(sender_name.to_string()),
                body: Some(preview.to_string()),
                image: None,
            }),
            data: Some(data),
            ..Default::default()
        }
    }

    /// The alert sent when a friend request comes in.
    pub fn friend_request_alert(token: &str, from_name: &str, request_id: &str) -> Self {
        let mut data = HashMap::new();
        data.insert("kind".to_string(), "friendRequest".to_string());
        data.insert("requestId".to_string(), request_id.to_string());

        Self {
            token: Some(token.to_string()),
            notification: Some(PushNotification {
                title: Some("Friend request".to_string()),
                body: Some(format!("{} wants to connect", from_name)),
                image: None,
            }),
            data: Some(data),
            ..Default::default()
        }
    }
}

/// Summary of a topic subscribe/unsubscribe batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopicManagementResponse {
    pub success_count: usize,
    pub failure_count: usize,
    pub errors: Vec<TopicManagementError>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopicManagementError {
    /// Index into the token slice passed to the call.
    pub index: usize,
    pub reason: String,
}
