//! Cloud Firestore REST client.
//!
//! Covers the document surface the chat app owns: `users`, `chats`,
//! `chats/{id}/messages`, `friend_requests`, `reports`, `admin_logs`,
//! `scheduled_messages`, and `device_tokens`. Documents are read and written
//! as typed structs; `Query` drives the scheduler and cleanup scans.

pub mod models;
pub mod query;
pub mod value;

#[cfg(test)]
mod tests;

use self::models::{Document, ListDocumentsResponse, RunQueryRequest, RunQueryResponse};
use self::query::Query;
use self::value::{fields_to_serde_value, serializable_to_fields};
use crate::core::middleware::AuthMiddleware;
use crate::core::{build_client, error_from_response, is_transient_status};
use reqwest::header;
use reqwest_middleware::ClientWithMiddleware;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

const FIRESTORE_V1_API: &str =
    "https://firestore.googleapis.com/v1/projects/{project_id}/databases/(default)/documents";

/// Errors that can occur during Firestore operations.
#[derive(Error, Debug)]
pub enum FirestoreError {
    /// Wrapper for `reqwest::Error`.
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Wrapper for `reqwest_middleware::Error`.
    #[error("middleware error: {0}")]
    Middleware(#[from] reqwest_middleware::Error),
    /// Errors returned by the Firestore API, with the HTTP status kept.
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },
    /// Wrapper for `serde_json::Error`.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FirestoreError {
    /// Transport failures and retryable statuses; permanent rejections
    /// (permission denied, bad request) are not transient.
    pub fn is_transient(&self) -> bool {
        match self {
            FirestoreError::Request(_) | FirestoreError::Middleware(_) => true,
            FirestoreError::Api { status, .. } => is_transient_status(*status),
            FirestoreError::Serialization(_) => false,
        }
    }

    async fn from_response(response: reqwest::Response, default_msg: &str) -> Self {
        let (status, message) = error_from_response(response, default_msg).await;
        FirestoreError::Api { status, message }
    }
}

/// Client for the Firestore REST API.
#[derive(Clone)]
pub struct FirestoreClient {
    client: ClientWithMiddleware,
    base_url: String,
}

impl FirestoreClient {
    /// Creates a client against the production endpoint.
    ///
    /// This is typically called via `ChatApp::firestore()`.
    pub fn new(middleware: AuthMiddleware) -> Self {
        let base_url = FIRESTORE_V1_API.replace("{project_id}", &middleware.project_id());
        Self {
            client: build_client(middleware),
            base_url,
        }
    }

    /// Creates a client with a custom base URL (emulator or tests).
    pub fn new_with_url(middleware: AuthMiddleware, base_url: String) -> Self {
        Self {
            client: build_client(middleware),
            base_url,
        }
    }

    #[cfg(test)]
    pub(crate) fn new_with_client(client: ClientWithMiddleware, base_url: String) -> Self {
        Self { client, base_url }
    }

    /// A reference to the collection at `collection_path`, e.g. `"chats"` or
    /// `"chats/c1/messages"`.
    pub fn collection(&self, collection_path: &str) -> CollectionRef<'_> {
        CollectionRef {
            client: &self.client,
            path: format!("{}/{}", self.base_url, collection_path),
        }
    }

    /// A reference to the document at `document_path`, e.g. `"users/u1"`.
    pub fn doc(&self, document_path: &str) -> DocumentRef<'_> {
        DocumentRef {
            client: &self.client,
            path: format!("{}/{}", self.base_url, document_path),
        }
    }

    /// Runs a structured query against the database root and returns the
    /// matching documents.
    pub async fn run_query(&self, query: Query) -> Result<Vec<DocumentHit>, FirestoreError> {
        let url = format!("{}:runQuery", self.base_url);

        let request = RunQueryRequest {
            structured_query: query.query,
        };

        let response = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(&request)?)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FirestoreError::from_response(response, "Run query failed").await);
        }

        let responses: Vec<RunQueryResponse> = response.json().await?;

        let hits = responses
            .into_iter()
            .filter_map(|r| r.document)
            .map(DocumentHit::new)
            .collect();

        Ok(hits)
    }
}

/// A document returned by a query, with its id and database-relative path.
#[derive(Debug, Clone)]
pub struct DocumentHit {
    id: String,
    relative_path: String,
    document: Document,
}

impl DocumentHit {
    fn new(document: Document) -> Self {
        let id = document
            .name
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        let relative_path = document
            .name
            .split_once("/documents/")
            .map(|(_, rest)| rest.to_string())
            .unwrap_or_else(|| document.name.clone());
        Self {
            id,
            relative_path,
            document,
        }
    }

    /// The document id (last path segment).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The path below the database root, usable with `FirestoreClient::doc`.
    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    /// Deserializes the document fields into `T`.
    pub fn data<T: DeserializeOwned>(&self) -> Result<T, FirestoreError> {
        let serde_value = fields_to_serde_value(self.document.fields.clone())?;
        Ok(serde_json::from_value(serde_value)?)
    }
}

/// A reference to a single document.
#[derive(Clone)]
pub struct DocumentRef<'a> {
    client: &'a ClientWithMiddleware,
    path: String,
}

impl<'a> DocumentRef<'a> {
    /// Fetches the document, `Ok(None)` if it does not exist.
    pub async fn get<T: DeserializeOwned>(&self) -> Result<Option<T>, FirestoreError> {
        let response = self.client.get(&self.path).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !response.status().is_success() {
            return Err(FirestoreError::from_response(response, "Get document failed").await);
        }

        let doc: Document = response.json().await?;
        let serde_value = fields_to_serde_value(doc.fields)?;
        let obj = serde_json::from_value(serde_value)?;
        Ok(Some(obj))
    }

    /// Writes the full document, creating or replacing it (last write wins).
    pub async fn set<T: Serialize>(&self, value: &T) -> Result<(), FirestoreError> {
        let fields = serializable_to_fields(value)?;
        let body = serde_json::to_vec(&serde_json::json!({ "fields": fields }))?;

        let response = self
            .client
            .patch(&self.path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FirestoreError::from_response(response, "Set document failed").await);
        }

        Ok(())
    }

    /// Patches only the fields named in `mask`.
    pub async fn update<T: Serialize>(
        &self,
        value: &T,
        mask: &[&str],
    ) -> Result<(), FirestoreError> {
        let fields = serializable_to_fields(value)?;

        let mut url = self.path.clone();
        for (i, field) in mask.iter().enumerate() {
            url.push(if i == 0 { '?' } else { '&' });
            url.push_str("updateMask.fieldPaths=");
            url.push_str(field);
        }

        let body = serde_json::to_vec(&serde_json::json!({ "fields": fields }))?;

        let response = self
            .client
            .patch(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FirestoreError::from_response(response, "Update document failed").await);
        }

        Ok(())
    }

    /// Deletes the document. Deleting a missing document succeeds.
    pub async fn delete(&self) -> Result<(), FirestoreError> {
        let response = self.client.delete(&self.path).send().await?;

        if !response.status().is_success() {
            return Err(FirestoreError::from_response(response, "Delete document failed").await);
        }

        Ok(())
    }
}

/// A reference to a collection of documents.
#[derive(Clone)]
pub struct CollectionRef<'a> {
    client: &'a ClientWithMiddleware,
    path: String,
}

impl<'a> CollectionRef<'a> {
    /// A reference to the document with the given id inside this collection.
    pub fn doc(&self, document_id: &str) -> DocumentRef<'a> {
        DocumentRef {
            client: self.client,
            path: format!("{}/{}", self.path, document_id),
        }
    }

    /// Adds a document with a server-assigned id.
    pub async fn add<T: Serialize>(&self, value: &T) -> Result<Document, FirestoreError> {
        let fields = serializable_to_fields(value)?;
        let body = serde_json::to_vec(&serde_json::json!({ "fields": fields }))?;

        let response = self
            .client
            .post(&self.path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FirestoreError::from_response(response, "Add document failed").await);
        }

        Ok(response.json().await?)
    }

    /// Lists one page of documents in the collection.
    pub async fn list(&self) -> Result<ListDocumentsResponse, FirestoreError> {
        let response = self.client.get(&self.path).send().await?;

        if !response.status().is_success() {
            return Err(FirestoreError::from_response(response, "List documents failed").await);
        }

        Ok(response.json().await?)
    }
}
