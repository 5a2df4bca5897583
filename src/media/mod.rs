//! Cloud Storage client for chat attachments.
//!
//! Attachments live under the structured path
//! `chats/{chat_id}/media/{message_id}` in one bucket; the path is built by
//! [`MediaStore::object_path`] instead of ad hoc string concatenation.


use crate::core::middleware::AuthMiddleware;
use crate::core::{build_client, error_from_response, is_transient_status};
use reqwest::header;
use reqwest_middleware::ClientWithMiddleware;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const STORAGE_V1_API: &str = "https://storage.googleapis.com/storage/v1";
const STORAGE_UPLOAD_API: &str = "https://storage.googleapis.com/upload/storage/v1";

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("middleware error: {0}")]
    Middleware(#[from] reqwest_middleware::Error),
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },
}

impl MediaError {
    pub fn is_transient(&self) -> bool {
        match self {
            MediaError::Request(_) | MediaError::Middleware(_) => true,
            MediaError::Api { status, .. } => is_transient_status(*status),
        }
    }
}

/// Metadata of a stored object, as returned by the JSON API.
#[derive(Debug, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMetadata {
    pub name: Option<String>,
    pub bucket: Option<String>,
    pub content_type: Option<String>,
    pub time_created: Option<String>,
    pub updated: Option<String>,
    pub size: Option<String>,
    pub md5_hash: Option<String>,
}

/// Client for the chat media bucket.
#[derive(Clone)]
pub struct MediaStore {
    client: ClientWithMiddleware,
    api_url: String,
    upload_url: String,
    bucket: String,
}

impl MediaStore {
    /// Creates a store against the production endpoints. With `bucket: None`
    /// the default `{project_id}.appspot.com` bucket is used.
    pub fn new(middleware: AuthMiddleware, bucket: Option<&str>) -> Self {
        let bucket = match bucket {
            Some(b) => b.to_string(),
            None => format!("{}.appspot.com", middleware.project_id()),
        };
        Self {
            client: build_client(middleware),
            api_url: STORAGE_V1_API.to_string(),
            upload_url: STORAGE_UPLOAD_API.to_string(),
            bucket,
        }
    }

    #[cfg(test)]
    pub(crate) fn new_with_client(
        client: ClientWithMiddleware,
        api_url: String,
        upload_url: String,
        bucket: String,
    ) -> Self {
        Self {
            client,
            api_url,
            upload_url,
            bucket,
        }
    }

    /// The canonical object path for a message attachment.
    pub fn object_path(chat_id: &str, message_id: &str) -> String {
        format!("chats/{}/media/{}", chat_id, message_id)
    }

    fn object_url(&self, object_path: &str) -> String {
        let encoded =
            url::form_urlencoded::byte_serialize(object_path.as_bytes()).collect::<String>();
        format!("{}/b/{}/o/{}", self.api_url, self.bucket, encoded)
    }

    /// Uploads object content via the simple upload API.
    pub async fn upload(
        &self,
        object_path: &str,
        body: impl Into<reqwest::Body>,
        mime_type: &str,
    ) -> Result<(), MediaError> {
        let url = format!("{}/b/{}/o", self.upload_url, self.bucket);

        let response = self
            .client
            .post(&url)
            .query(&[("uploadType", "media"), ("name", object_path)])
            .header(header::CONTENT_TYPE, mime_type)
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let (status, message) = error_from_response(response, "Upload failed").await;
            return Err(MediaError::Api { status, message });
        }

        Ok(())
    }

    /// Downloads the object content.
    pub async fn download(&self, object_path: &str) -> Result<bytes::Bytes, MediaError> {
        let response = self
            .client
            .get(self.object_url(object_path))
            .query(&[("alt", "media")])
            .send()
            .await?;

        if !response.status().is_success() {
            let (status, message) = error_from_response(response, "Download failed").await;
            return Err(MediaError::Api { status, message });
        }

        Ok(response.bytes().await?)
    }

    /// Deletes the object. A missing object counts as deleted so the cleanup
    /// sweep can re-run after a partial failure.
    pub async fn delete(&self, object_path: &str) -> Result<(), MediaError> {
        let response = self.client.delete(self.object_url(object_path)).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }

        if !response.status().is_success() {
            let (status, message) = error_from_response(response, "Delete failed").await;
            return Err(MediaError::Api { status, message });
        }

        Ok(())
    }

    /// Fetches the object's metadata.
    pub async fn metadata(&self, object_path: &str) -> Result<ObjectMetadata, MediaError> {
        let response = self.client.get(self.object_url(object_path)).send().await?;

        if !response.status().is_success() {
            let (status, message) = error_from_response(response, "Get metadata failed").await;
            return Err(MediaError::Api { status, message });
        }

        Ok(response.json().await?)
    }
}
