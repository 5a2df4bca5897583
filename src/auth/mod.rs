//! Firebase Auth integration.
//!
//! Two concerns: resolving accounts through the Identity Toolkit API and
//! verifying client ID tokens (RS256 against Google's published certs) so a
//! backend embedding this crate can trust the `uid` a device claims.

pub mod verifier;


use crate::core::middleware::AuthMiddleware;
use crate::core::{build_client, error_from_response, is_transient_status};
use reqwest::header;
use reqwest_middleware::ClientWithMiddleware;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const IDENTITY_TOOLKIT_API: &str = "https://identitytoolkit.googleapis.com/v1/projects";

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("middleware error: {0}")]
    Middleware(#[from] reqwest_middleware::Error),
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("user not found")]
    UserNotFound,
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AuthError {
    pub fn is_transient(&self) -> bool {
        match self {
            AuthError::Request(_) | AuthError::Middleware(_) => true,
            AuthError::Api { status, .. } => is_transient_status(*status),
            AuthError::UserNotFound | AuthError::Serialization(_) => false,
        }
    }
}

/// An account record from the Identity Toolkit API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
    pub local_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LookupRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    local_id: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct LookupResponse {
    users: Option<Vec<AccountRecord>>,
}

/// Client for account lookups.
#[derive(Clone)]
pub struct AuthClient {
    client: ClientWithMiddleware,
    base_url: String,
    project_id: String,
}

impl AuthClient {
    /// Creates a client against the production endpoint.
    ///
    /// This is typically called via `ChatApp::auth()`.
    pub fn new(middleware: AuthMiddleware) -> Self {
        let project_id = middleware.project_id();
        Self {
            client: build_client(middleware),
            base_url: IDENTITY_TOOLKIT_API.to_string(),
            project_id,
        }
    }

    #[cfg(test)]
    pub(crate) fn new_with_client(
        client: ClientWithMiddleware,
        base_url: String,
        project_id: String,
    ) -> Self {
        Self {
            client,
            base_url,
            project_id,
        }
    }

    async fn lookup(&self, request: LookupRequest) -> Result<AccountRecord, AuthError> {
        let url = format!("{}/{}/accounts:lookup", self.base_url, self.project_id);

        let response = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(&request)?)
            .send()
            .await?;

        if !response.status().is_success() {
            let (status, message) = error_from_response(response, "Account lookup failed").await;
            return Err(AuthError::Api { status, message });
        }

        let result: LookupResponse = response.json().await?;

        result
            .users
            .and_then(|mut users| users.pop())
            .ok_or(AuthError::UserNotFound)
    }

    /// Resolves an account by uid.
    pub async fn get_user(&self, uid: &str) -> Result<AccountRecord, AuthError> {
        self.lookup(LookupRequest {
            local_id: Some(vec![uid.to_string()]),
            email: None,
        })
        .await
    }

    /// Resolves an account by email.
    pub async fn get_user_by_email(&self, email: &str) -> Result<AccountRecord, AuthError> {
        self.lookup(LookupRequest {
            local_id: None,
            email: Some(vec![email.to_string()]),
        })
        .await
    }
}
