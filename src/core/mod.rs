pub mod middleware;

#[cfg(test)]
mod tests;

use middleware::AuthMiddleware;
use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::Deserialize;

/// Builds the HTTP client every Google-facing service shares: transient
/// retries with exponential backoff, then bearer-token injection.
pub fn build_client(middleware: AuthMiddleware) -> ClientWithMiddleware {
    let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);

    ClientBuilder::new(Client::new())
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .with(middleware)
        .build()
}

/// Whether an HTTP status is worth retrying later.
///
/// Every service error carries its status so callers (the sync queue in
/// particular) can tell a network hiccup apart from a permanent rejection
/// instead of collapsing both into a silent failure.
pub fn is_transient_status(status: u16) -> bool {
    matches!(status, 408 | 429) || (500..600).contains(&status)
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorDetails,
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorDetails {
    pub code: u16,
    pub message: String,
    pub status: Option<String>,
}

/// Extracts a readable message (and keeps the status code) from a failed
/// Google API response.
pub async fn error_from_response(response: reqwest::Response, default_msg: &str) -> (u16, String) {
    let status = response.status().as_u16();
    match response.json::<ApiErrorBody>().await {
        Ok(body) => (status, format!("{} (code: {})", body.error.message, body.error.code)),
        Err(_) => (status, format!("{}: http {}", default_msg, status)),
    }
}
