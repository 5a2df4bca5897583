//! Firebase Cloud Messaging client.
//!
//! Sends the chat push notifications (new message, friend request) and
//! manages topic subscriptions for the registration tokens stored in
//! `device_tokens`. Delivery guarantees are FCM's, not ours.

pub mod models;


use crate::core::middleware::AuthMiddleware;
use crate::core::{build_client, error_from_response, is_transient_status};
use models::{PushMessage, TopicManagementError, TopicManagementResponse};
use reqwest::header;
use reqwest_middleware::ClientWithMiddleware;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const FCM_V1_API: &str = "https://fcm.googleapis.com/v1/projects/{project_id}/messages:send";
const IID_API: &str = "https://iid.googleapis.com";

/// Topic management batches are capped by the IID API.
const IID_BATCH_SIZE: usize = 1000;

#[derive(Error, Debug)]
pub enum PushError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("middleware error: {0}")]
    Middleware(#[from] reqwest_middleware::Error),
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

impl PushError {
    pub fn is_transient(&self) -> bool {
        match self {
            PushError::Request(_) | PushError::Middleware(_) => true,
            PushError::Api { status, .. } => is_transient_status(*status),
            PushError::Serialization(_) | PushError::InvalidMessage(_) => false,
        }
    }
}

/// Client for FCM sends and topic management.
#[derive(Clone)]
pub struct PushClient {
    client: ClientWithMiddleware,
    send_url: String,
    iid_url: String,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    validate_only: bool,
    message: &'a PushMessage,
}

#[derive(Deserialize)]
struct SendResponse {
    name: String,
}

#[derive(Serialize)]
struct TopicRequest<'a> {
    to: String,
    registration_tokens: &'a [&'a str],
}

#[derive(Deserialize)]
struct TopicApiResponse {
    results: Option<Vec<TopicApiResult>>,
}

#[derive(Deserialize)]
struct TopicApiResult {
    error: Option<String>,
}

impl PushClient {
    /// Creates a client against the production endpoints.
    ///
    /// This is typically called via `ChatApp::messaging()`.
    pub fn new(middleware: AuthMiddleware) -> Self {
        let send_url = FCM_V1_API.replace("{project_id}", &middleware.project_id());
        Self {
            client: build_client(middleware),
            send_url,
            iid_url: IID_API.to_string(),
        }
    }

    #[cfg(test)]
    pub(crate) fn new_with_client(
        client: ClientWithMiddleware,
        send_url: String,
        iid_url: String,
    ) -> Self {
        Self {
            client,
            send_url,
            iid_url,
        }
    }

    /// Sends one push message and returns the FCM message name.
    pub async fn send(&self, message: &PushMessage) -> Result<String, PushError> {
        self.validate(message)?;

        let request = SendRequest {
            validate_only: false,
            message,
        };

        let response = self
            .client
            .post(&self.send_url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(&request)?)
            .send()
            .await?;

        if !response.status().is_success() {
            let (status, message) = error_from_response(response, "FCM send failed").await;
            return Err(PushError::Api { status, message });
        }

        let result: SendResponse = response.json().await?;
        Ok(result.name)
    }

    fn validate(&self, message: &PushMessage) -> Result<(), PushError> {
        let num_targets = [
            message.token.is_some(),
            message.topic.is_some(),
            message.condition.is_some(),
        ]
        .iter()
        .filter(|&&t| t)
        .count();

        if num_targets != 1 {
            return Err(PushError::InvalidMessage(
                "message must have exactly one of token, topic, or condition".to_string(),
            ));
        }

        Ok(())
    }

    pub async fn subscribe_to_topic(
        &self,
        topic: &str,
        tokens: &[&str],
    ) -> Result<TopicManagementResponse, PushError> {
        self.manage_topic(topic, tokens, true).await
    }

    pub async fn unsubscribe_from_topic(
        &self,
        topic: &str,
        tokens: &[&str],
    ) -> Result<TopicManagementResponse, PushError> {
        self.manage_topic(topic, tokens, false).await
    }

    async fn manage_topic(
        &self,
        topic: &str,
        tokens: &[&str],
        subscribe: bool,
    ) -> Result<TopicManagementResponse, PushError> {
        let topic_path = if topic.starts_with("/topics/") {
            topic.to_string()
        } else {
            format!("/topics/{}", topic)
        };

        let url = if subscribe {
            format!("{}/iid/v1:batchAdd", self.iid_url)
        } else {
            format!("{}/iid/v1:batchRemove", self.iid_url)
        };

        let mut summary = TopicManagementResponse::default();

        for (batch_idx, chunk) in tokens.chunks(IID_BATCH_SIZE).enumerate() {
            let request = TopicRequest {
                to: topic_path.clone(),
                registration_tokens: chunk,
            };

            let response = self
                .client
                .post(&url)
                .header(header::CONTENT_TYPE, "application/json")
                .header("access_token_auth", "true")
                .body(serde_json::to_vec(&request)?)
                .send()
                .await?;

            if !response.status().is_success() {
                let (status, message) =
                    error_from_response(response, "Topic management failed").await;
                return Err(PushError::Api { status, message });
            }

            let api_response: TopicApiResponse = response.json().await?;

            if let Some(results) = api_response.results {
                for (i, result) in results.iter().enumerate() {
                    match &result.error {
                        Some(error) => {
                            summary.failure_count += 1;
                            summary.errors.push(TopicManagementError {
                                index: batch_idx * IID_BATCH_SIZE + i,
                                reason: error.clone(),
                            });
                        }
                        None => summary.success_count += 1,
                    }
                }
            }
        }

        Ok(summary)
    }
}
