//! Google OAuth2 access tokens for the Firestore REST surface.
//!
//! The service-account flow signs a JWT assertion with the account's private
//! key and exchanges it at the token endpoint. Tokens are cached until shortly
//! before expiry.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use snapsolve_core::{FirestoreConfig, Result, SnapSolveError};

const DATASTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: u64 = 3600;
const EXPIRY_LEEWAY: Duration = Duration::from_secs(60);

/// Supplies bearer tokens for outbound Firestore calls.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> Result<String>;
}

/// Fixed token, for tests and the Firestore emulator (which accepts any
/// bearer value).
pub struct StaticTokenSource(pub String);

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: u64,
    exp: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Service-account token source using the OAuth2 JWT bearer grant.
pub struct ServiceAccountTokenSource {
    client_email: String,
    token_uri: String,
    encoding_key: jsonwebtoken::EncodingKey,
    client: Client,
    cached: RwLock<Option<CachedToken>>,
}

impl ServiceAccountTokenSource {
    pub fn new(config: &FirestoreConfig) -> Result<Self> {
        if config.client_email.is_empty() || config.private_key.is_empty() {
            return Err(SnapSolveError::Config(
                "Firestore service account credentials are required. \
                 Set FIREBASE_CLIENT_EMAIL and FIREBASE_PRIVATE_KEY."
                    .into(),
            ));
        }

        // Keys delivered through env vars carry literal \n escapes
        let pem = config.private_key.replace("\\n", "\n");
        let encoding_key = jsonwebtoken::EncodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| SnapSolveError::Config(format!("invalid service account key: {e}")))?;

        Ok(Self {
            client_email: config.client_email.clone(),
            token_uri: config.token_uri.clone(),
            encoding_key,
            client: Client::new(),
            cached: RwLock::new(None),
        })
    }

    fn build_assertion(&self, now_unix: u64) -> Result<String> {
        let claims = AssertionClaims {
            iss: self.client_email.clone(),
            scope: DATASTORE_SCOPE.to_string(),
            aud: self.token_uri.clone(),
            iat: now_unix,
            exp: now_unix + ASSERTION_LIFETIME_SECS,
        };

        let header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256);
        jsonwebtoken::encode(&header, &claims, &self.encoding_key)
            .map_err(|e| SnapSolveError::Upstream(format!("failed to sign token assertion: {e}")))
    }

    async fn refresh(&self) -> Result<CachedToken> {
        let now_unix = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|e| SnapSolveError::Upstream(format!("system clock error: {e}")))?
            .as_secs();
        let assertion = self.build_assertion(now_unix)?;

        let response = self
            .client
            .post(&self.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", &assertion)])
            .send()
            .await
            .map_err(|e| SnapSolveError::Upstream(format!("token exchange failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SnapSolveError::Upstream(format!(
                "token exchange error ({status}): {body}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| SnapSolveError::Upstream(format!("malformed token response: {e}")))?;

        tracing::debug!(expires_in = token.expires_in, "refreshed firestore token");

        Ok(CachedToken {
            token: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        })
    }
}

#[async_trait]
impl TokenSource for ServiceAccountTokenSource {
    async fn token(&self) -> Result<String> {
        {
            let guard = self.cached.read();
            if let Some(cached) = guard.as_ref() {
                if cached.expires_at > Instant::now() + EXPIRY_LEEWAY {
                    return Ok(cached.token.clone());
                }
            }
        }

        let fresh = self.refresh().await?;
        let token = fresh.token.clone();
        *self.cached.write() = Some(fresh);
        Ok(token)
    }
}
