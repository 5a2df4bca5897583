use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;

const GOOGLE_PUBLIC_KEYS_URL: &str =
    "https://www.googleapis.com/robot/v1/metadata/x509/securetoken@system.gserviceaccount.com";

#[derive(Error, Debug)]
pub enum TokenVerificationError {
    #[error("key fetch failed: {0}")]
    KeyFetch(#[from] reqwest::Error),
    #[error("JWT validation failed: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("no public key for kid {0}")]
    UnknownKey(String),
}

/// Claims of a Firebase ID token.
#[derive(Debug, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub aud: String,
    pub iss: String,
    pub sub: String,
    pub exp: usize,
    pub iat: usize,
    pub auth_time: usize,
    pub user_id: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Clone)]
struct CachedKeys {
    keys: HashMap<String, String>,
    expires_at: Instant,
}

/// Fetches and caches Google's x509 signing certs, honoring the
/// `Cache-Control: max-age` of the response.
struct PublicKeySet {
    client: Client,
    url: String,
    cache: RwLock<Option<CachedKeys>>,
}

impl PublicKeySet {
    fn new(url: String) -> Self {
        Self {
            client: Client::new(),
            url,
            cache: RwLock::new(None),
        }
    }

    async fn get(&self, kid: &str) -> Result<String, TokenVerificationError> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = &*cache {
                if Instant::now() < cached.expires_at {
                    if let Some(key) = cached.keys.get(kid) {
                        return Ok(key.clone());
                    }
                }
            }
        }

        self.refresh().await?;

        let cache = self.cache.read().await;
        cache
            .as_ref()
            .and_then(|cached| cached.keys.get(kid).cloned())
            .ok_or_else(|| TokenVerificationError::UnknownKey(kid.to_string()))
    }

    async fn refresh(&self) -> Result<(), TokenVerificationError> {
        let response = self.client.get(&self.url).send().await?;

        let max_age = response
            .headers()
            .get(reqwest::header::CACHE_CONTROL)
            .and_then(|h| h.to_str().ok())
            .and_then(|s| {
                s.split(',').find_map(|part| {
                    part.trim()
                        .strip_prefix("max-age=")
                        .and_then(|v| v.parse::<u64>().ok())
                })
            })
            .unwrap_or(3600);

        let keys: HashMap<String, String> = response.json().await?;

        let mut cache = self.cache.write().await;
        *cache = Some(CachedKeys {
            keys,
            expires_at: Instant::now() + Duration::from_secs(max_age),
        });

        Ok(())
    }
}

/// Verifies Firebase ID tokens issued for this project.
pub struct IdTokenVerifier {
    project_id: String,
    keys: Arc<PublicKeySet>,
}

impl IdTokenVerifier {
    pub fn new(project_id: String) -> Self {
        Self {
            project_id,
            keys: Arc::new(PublicKeySet::new(GOOGLE_PUBLIC_KEYS_URL.to_string())),
        }
    }

    #[cfg(test)]
    pub(crate) fn new_with_keys_url(project_id: String, keys_url: String) -> Self {
        Self {
            project_id,
            keys: Arc::new(PublicKeySet::new(keys_url)),
        }
    }

    /// Verifies signature, audience, issuer, and the auth_time sanity check.
    pub async fn verify(&self, token: &str) -> Result<IdTokenClaims, TokenVerificationError> {
        let header = decode_header(token)?;
        let kid = header
            .kid
            .ok_or_else(|| TokenVerificationError::InvalidToken("missing kid".to_string()))?;

        let pem = self.keys.get(&kid).await?;
        let key = DecodingKey::from_rsa_pem(pem.as_bytes())?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&self.project_id]);
        validation.set_issuer(&[format!(
            "https://securetoken.google.com/{}",
            self.project_id
        )]);

        let token_data = decode::<IdTokenClaims>(token, &key, &validation)?;
        let claims = token_data.claims;

        if claims.sub.is_empty() {
            return Err(TokenVerificationError::InvalidToken(
                "subject claim must not be empty".to_string(),
            ));
        }

        let now = chrono::Utc::now().timestamp().max(0) as usize;
        // 5 minutes of clock skew tolerance
        if claims.auth_time > now + 300 {
            return Err(TokenVerificationError::InvalidToken(
                "auth_time is in the future".to_string(),
            ));
        }

        Ok(claims)
    }
}
